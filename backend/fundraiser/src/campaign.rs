//! The Campaign entity and the rules that keep its derived fields honest.
//!
//! ## Derived fields
//!
//! `progress`, `days_left` and `featured_image` are stored alongside the
//! fields they derive from so list views stay cheap. Every write path goes
//! through the helpers in this module (or the equivalent SQL expression in
//! [`crate::db`]) so the stored copies never drift:
//!
//! ```text
//! progress       = clamp(round(raised_amount / goal_amount * 100), 0, 100)
//! days_left      = max(0, ceil((end_date - now) / 1 day))
//! featured_image ∈ images            (images is never empty)
//! ```
//!
//! ## Status
//!
//! Admin-driven only; reaching the goal does not complete a campaign.
//!
//! ```text
//! Active ──► Completed
//!   │  ▲
//!   ▼  │
//! Paused ──► Cancelled ◄── Active
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, Result};

/// Upper bound on images attached to one campaign.
pub const MAX_IMAGES: usize = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    #[default]
    Active,
    Completed,
    Paused,
    Cancelled,
}

impl CampaignStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "paused" => Some(Self::Paused),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether an admin may move a campaign from `self` to `next`.
    /// Staying in the same state is always allowed so that re-submitting an
    /// unchanged form is harmless.
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Self::Active, Self::Completed)
                | (Self::Active, Self::Paused)
                | (Self::Active, Self::Cancelled)
                | (Self::Paused, Self::Active)
                | (Self::Paused, Self::Cancelled)
        )
    }

    pub fn transition(self, next: CampaignStatus) -> Result<CampaignStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AppError::validation(format!(
                "Cannot change campaign status from '{}' to '{}'",
                self.as_str(),
                next.as_str()
            )))
        }
    }
}

/// A named funding threshold shown to donors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub amount: f64,
    pub description: String,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: String,
    pub title: String,
    pub description: String,
    pub about: String,
    pub category: String,
    pub category_label: String,
    pub location: String,
    pub organizer: String,
    pub goal_amount: f64,
    pub raised_amount: f64,
    pub backers_count: i64,
    pub progress: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub days_left: i64,
    pub expected_beneficiaries: i64,
    pub expected_duration: String,
    pub impact_description: String,
    pub tax_deductible: bool,
    pub secure_payment: bool,
    pub transparent_reporting: bool,
    pub images: Vec<String>,
    pub featured_image: String,
    pub milestones: Vec<Milestone>,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Recompute every derived field from its sources.
    pub fn rederive(&mut self, placeholder: &str, now: DateTime<Utc>) {
        self.progress = compute_progress(self.raised_amount, self.goal_amount);
        self.days_left = days_until(self.end_date, now);
        self.images = normalize_images(std::mem::take(&mut self.images), placeholder);
        self.featured_image =
            resolve_featured(&self.images, &[Some(self.featured_image.as_str())]);
    }

    /// `days_left` is a cache; bring it up to date for a read.
    pub fn refresh_days_left(&mut self, now: DateTime<Utc>) {
        self.days_left = days_until(self.end_date, now);
    }

    /// Final gate before a campaign is written.
    pub fn ensure_consistent(&self) -> Result<()> {
        if !(self.goal_amount.is_finite() && self.goal_amount > 0.0) {
            return Err(AppError::validation("goalAmount must be greater than 0"));
        }
        if !(self.raised_amount.is_finite() && self.raised_amount >= 0.0) {
            return Err(AppError::validation("raisedAmount cannot be negative"));
        }
        if self.backers_count < 0 {
            return Err(AppError::validation("backersCount cannot be negative"));
        }
        if self.end_date <= self.start_date {
            return Err(AppError::validation("endDate must be after startDate"));
        }
        if self.images.is_empty() || self.images.len() > MAX_IMAGES {
            return Err(AppError::validation(format!(
                "A campaign holds between 1 and {MAX_IMAGES} images"
            )));
        }
        if !self.images.contains(&self.featured_image) {
            return Err(AppError::validation(
                "featuredImage must be one of the campaign images",
            ));
        }
        for (i, m) in self.milestones.iter().enumerate() {
            if !(m.amount.is_finite() && m.amount > 0.0) {
                return Err(AppError::validation(format!(
                    "milestones[{i}].amount must be greater than 0"
                )));
            }
            if m.description.trim().is_empty() {
                return Err(AppError::validation(format!(
                    "milestones[{i}].description is required"
                )));
            }
        }
        Ok(())
    }
}

/// `clamp(round(raised * 100 / goal), 0, 100)`; a non-positive goal reads as 0%.
///
/// Multiplies before dividing, in the same order as the SQL in `db`, so both
/// write paths round `.5` boundaries identically.
pub fn compute_progress(raised: f64, goal: f64) -> i64 {
    if goal.is_nan() || goal <= 0.0 || !raised.is_finite() {
        return 0;
    }
    (raised * 100.0 / goal).round().clamp(0.0, 100.0) as i64
}

/// Whole days remaining until `end`, rounded up, never negative.
pub fn days_until(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let secs = (end - now).num_seconds();
    if secs <= 0 {
        return 0;
    }
    (secs + 86_399) / 86_400
}

/// Deduplicate (keeping first occurrence), drop blanks, and make sure the
/// list is never empty. The placeholder only survives when it is the sole
/// entry.
pub fn normalize_images(images: Vec<String>, placeholder: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(images.len());
    for url in images {
        let url = url.trim().to_string();
        if url.is_empty() || url == placeholder || out.contains(&url) {
            continue;
        }
        out.push(url);
    }
    if out.is_empty() {
        out.push(placeholder.to_string());
    }
    out
}

/// First candidate that is still present in `images`, else `images[0]`.
pub fn resolve_featured(images: &[String], candidates: &[Option<&str>]) -> String {
    candidates
        .iter()
        .flatten()
        .find(|c| images.iter().any(|i| i == *c))
        .map(|c| c.to_string())
        .or_else(|| images.first().cloned())
        .unwrap_or_default()
}
