//! Normalization of campaign submissions.
//!
//! The admin UI sends either a JSON object or a `multipart/form-data` bag of
//! string fields plus image binaries. Both shapes are flattened into a
//! [`FieldBag`] first and then run through the same coercion table, so a
//! `goalAmount` of `"5000"` and one of `5000` end up identical.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use crate::campaign::{CampaignStatus, Milestone};
use crate::errors::{AppError, Result};

/// Flat field bag: JSON object members, or multipart text parts. A multipart
/// field that repeats is collected into a JSON array.
pub type FieldBag = Map<String, Value>;

/// One uploaded image binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    /// File extension derived from the content type, falling back to the
    /// original file name.
    pub fn extension(&self) -> &str {
        match self.content_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "image/svg+xml" => "svg",
            "image/avif" => "avif",
            _ => self
                .file_name
                .rsplit_once('.')
                .map(|(_, ext)| ext)
                .filter(|ext| !ext.is_empty() && ext.len() <= 5)
                .unwrap_or("bin"),
        }
    }
}

/// Canonical, typed view of a create or update submission. Every field is
/// optional here; the manager decides which ones a given operation requires.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CampaignInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub about: Option<String>,
    pub category: Option<String>,
    pub category_label: Option<String>,
    pub location: Option<String>,
    pub organizer: Option<String>,
    pub goal_amount: Option<f64>,
    pub raised_amount: Option<f64>,
    pub backers_count: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub expected_beneficiaries: Option<i64>,
    pub expected_duration: Option<String>,
    pub impact_description: Option<String>,
    pub tax_deductible: Option<bool>,
    pub secure_payment: Option<bool>,
    pub transparent_reporting: Option<bool>,
    pub status: Option<CampaignStatus>,
    pub milestones: Option<Vec<Milestone>>,
    /// Already-hosted image URLs supplied directly (JSON submissions).
    pub images: Option<Vec<String>>,
    pub existing_images: Option<Vec<String>>,
    pub images_to_remove: Vec<String>,
    pub featured_image: Option<String>,
    pub uploads: Vec<Upload>,
}

impl CampaignInput {
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Self::from_fields(fields, Vec::new()),
            _ => Err(AppError::validation("Request body must be a JSON object")),
        }
    }

    pub fn from_fields(fields: FieldBag, uploads: Vec<Upload>) -> Result<Self> {
        let f = &fields;

        // Derived on every write; coerced only so malformed values are rejected.
        number(f, "progress")?;
        integer(f, "daysLeft")?;

        Ok(CampaignInput {
            title: text(f, "title")?,
            description: text(f, "description")?,
            about: text(f, "about")?,
            category: text(f, "category")?,
            category_label: text(f, "categoryLabel")?,
            location: text(f, "location")?,
            organizer: text(f, "organizer")?,
            goal_amount: number(f, "goalAmount")?,
            raised_amount: number(f, "raisedAmount")?,
            backers_count: integer(f, "backersCount")?,
            start_date: date(f, "startDate")?,
            end_date: date(f, "endDate")?,
            expected_beneficiaries: integer(f, "expectedBeneficiaries")?,
            expected_duration: text(f, "expectedDuration")?,
            impact_description: text(f, "impactDescription")?,
            tax_deductible: boolean(f, "taxDeductible")?,
            secure_payment: boolean(f, "securePayment")?,
            transparent_reporting: boolean(f, "transparentReporting")?,
            status: status(f, "status")?,
            milestones: milestones(f, "milestones")?,
            images: list(f, "images")?,
            existing_images: list(f, "existingImages")?,
            images_to_remove: list(f, "imagesToRemove")?.unwrap_or_default(),
            featured_image: text(f, "featuredImage")?.filter(|s| !s.is_empty()),
            uploads,
        })
    }
}

// ─────────────────────────────────────────────────────────
// Coercion table
// ─────────────────────────────────────────────────────────

fn present<'a>(fields: &'a FieldBag, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|v| !v.is_null())
}

fn text(fields: &FieldBag, key: &str) -> Result<Option<String>> {
    match present(fields, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(_) => Err(AppError::validation(format!("{key} must be a string"))),
    }
}

fn number(fields: &FieldBag, key: &str) -> Result<Option<f64>> {
    let n = match present(fields, key) {
        None => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match n {
        Some(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(AppError::validation(format!("{key} must be a number"))),
    }
}

fn integer(fields: &FieldBag, key: &str) -> Result<Option<i64>> {
    match number(fields, key)? {
        None => Ok(None),
        Some(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Ok(Some(n as i64)),
        Some(_) => Err(AppError::validation(format!("{key} must be a whole number"))),
    }
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn boolean(fields: &FieldBag, key: &str) -> Result<Option<bool>> {
    match present(fields, key) {
        None => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => parse_bool(v)
            .map(Some)
            .ok_or_else(|| AppError::validation(format!("{key} must be true or false"))),
    }
}

/// Accepts `YYYY-MM-DD` (date inputs), `YYYY-MM-DDTHH:MM[:SS]` (datetime-local
/// inputs, read as UTC) and full RFC 3339.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn date(fields: &FieldBag, key: &str) -> Result<Option<DateTime<Utc>>> {
    match present(fields, key) {
        None => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => parse_date(s)
            .map(Some)
            .ok_or_else(|| AppError::validation(format!("{key} must be a valid date"))),
        Some(_) => Err(AppError::validation(format!("{key} must be a date string"))),
    }
}

fn status(fields: &FieldBag, key: &str) -> Result<Option<CampaignStatus>> {
    match text(fields, key)? {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => CampaignStatus::parse(&s).map(Some).ok_or_else(|| {
            AppError::validation(format!(
                "{key} must be one of active, completed, paused, cancelled"
            ))
        }),
    }
}

/// A JSON array, a JSON-encoded array inside a string, or a single string
/// (one-element list).
fn array_like(fields: &FieldBag, key: &str) -> Result<Option<Vec<Value>>> {
    match present(fields, key) {
        None => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items.clone())),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                Ok(Some(Vec::new()))
            } else if s.starts_with('[') {
                match serde_json::from_str::<Value>(s) {
                    Ok(Value::Array(items)) => Ok(Some(items)),
                    _ => Err(AppError::validation(format!("{key} is not a valid list"))),
                }
            } else {
                Ok(Some(vec![Value::String(s.to_string())]))
            }
        }
        Some(_) => Err(AppError::validation(format!("{key} must be a list"))),
    }
}

fn list(fields: &FieldBag, key: &str) -> Result<Option<Vec<String>>> {
    let Some(items) = array_like(fields, key)? else {
        return Ok(None);
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::String(s) if s.trim().starts_with('[') => {
                // A repeated multipart field whose parts are themselves JSON lists.
                let mut nested = FieldBag::new();
                nested.insert(key.to_string(), Value::String(s));
                out.extend(list(&nested, key)?.unwrap_or_default());
            }
            Value::String(s) if !s.trim().is_empty() => out.push(s.trim().to_string()),
            Value::String(_) => {}
            _ => return Err(AppError::validation(format!("{key} must be a list of URLs"))),
        }
    }
    Ok(Some(out))
}

/// Milestone amounts fall back to 0 when they do not parse; rows left with
/// neither an amount nor a description are empty form rows and are dropped.
fn milestones(fields: &FieldBag, key: &str) -> Result<Option<Vec<Milestone>>> {
    let Some(items) = array_like(fields, key)? else {
        return Ok(None);
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let Value::Object(obj) = item else {
            return Err(AppError::validation(format!(
                "{key}[{i}] must be an object"
            )));
        };
        let amount = match obj.get("amount") {
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        };
        let amount = if amount.is_finite() { amount } else { 0.0 };
        let description = match obj.get("description") {
            Some(Value::String(s)) => s.trim().to_string(),
            _ => String::new(),
        };
        let completed = obj.get("completed").and_then(parse_bool).unwrap_or(false);

        if amount == 0.0 && description.is_empty() {
            continue;
        }
        out.push(Milestone {
            amount,
            description,
            completed,
        });
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bag(value: Value) -> FieldBag {
        match value {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn multipart_strings_and_json_values_normalize_identically() {
        let from_form = CampaignInput::from_fields(
            bag(json!({
                "goalAmount": "100000",
                "backersCount": "3",
                "expectedBeneficiaries": "250",
                "taxDeductible": "false",
                "securePayment": "true",
                "milestones": r#"[{"amount":"5000","description":"Wells","completed":"true"}]"#,
            })),
            Vec::new(),
        )
        .unwrap();
        let from_json = CampaignInput::from_json(json!({
            "goalAmount": 100000,
            "backersCount": 3,
            "expectedBeneficiaries": 250,
            "taxDeductible": false,
            "securePayment": true,
            "milestones": [{"amount": 5000, "description": "Wells", "completed": true}],
        }))
        .unwrap();

        assert_eq!(from_form, from_json);
        assert_eq!(from_form.goal_amount, Some(100_000.0));
        assert_eq!(from_form.tax_deductible, Some(false));
        assert_eq!(
            from_form.milestones.unwrap(),
            vec![Milestone {
                amount: 5000.0,
                description: "Wells".into(),
                completed: true
            }]
        );
    }

    #[test]
    fn bad_numbers_and_booleans_are_rejected() {
        let err = CampaignInput::from_json(json!({ "goalAmount": "lots" })).unwrap_err();
        assert!(matches!(err, AppError::Validation(ref m) if m.contains("goalAmount")));

        let err = CampaignInput::from_json(json!({ "securePayment": "maybe" })).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = CampaignInput::from_json(json!({ "backersCount": "1.5" })).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = CampaignInput::from_json(json!({ "progress": "high" })).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn unparsable_milestone_amount_defaults_to_zero() {
        let input = CampaignInput::from_json(json!({
            "milestones": [
                {"amount": "n/a", "description": "Phase one"},
                {"amount": "", "description": ""},
            ]
        }))
        .unwrap();
        let ms = input.milestones.unwrap();
        assert_eq!(ms.len(), 1);
        assert_eq!(ms[0].amount, 0.0);
        assert!(!ms[0].completed);
    }

    #[test]
    fn image_lists_accept_arrays_json_strings_and_single_values() {
        let input = CampaignInput::from_fields(
            bag(json!({
                "existingImages": ["https://a", r#"["https://b"]"#],
                "imagesToRemove": "https://a",
                "featuredImage": "",
            })),
            Vec::new(),
        )
        .unwrap();
        assert_eq!(
            input.existing_images,
            Some(vec!["https://a".to_string(), "https://b".to_string()])
        );
        assert_eq!(input.images_to_remove, vec!["https://a".to_string()]);
        assert_eq!(input.featured_image, None);
    }

    #[test]
    fn dates_accept_form_formats() {
        let d = parse_date("2025-03-01").unwrap();
        assert_eq!(d.to_rfc3339(), "2025-03-01T00:00:00+00:00");
        assert!(parse_date("2025-03-01T10:30").is_some());
        assert!(parse_date("2025-03-01T10:30:00+05:30").is_some());
        assert!(parse_date("next tuesday").is_none());
    }

    #[test]
    fn upload_extension_prefers_content_type() {
        let up = Upload {
            file_name: "photo.jpeg".into(),
            content_type: "image/png".into(),
            bytes: vec![1],
        };
        assert_eq!(up.extension(), "png");
        let up = Upload {
            file_name: "photo.heic".into(),
            content_type: "image/heic".into(),
            bytes: vec![1],
        };
        assert_eq!(up.extension(), "heic");
    }
}
