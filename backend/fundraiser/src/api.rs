//! Axum REST API handlers.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        rejection::JsonRejection, DefaultBodyLimit, FromRequest, Multipart, Path, Request, State,
    },
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::services::ServeDir;

use crate::donation::{CheckoutOutcome, DonationFlow, DonationOptions};
use crate::errors::{AppError, Result};
use crate::input::{CampaignInput, FieldBag, Upload};
use crate::manager::{CampaignManager, Saved};

#[derive(Clone)]
pub struct ApiState {
    pub campaigns: CampaignManager,
    pub donations: DonationFlow,
}

/// Multipart parts carrying image binaries.
const FILE_FIELDS: [&str; 2] = ["images", "newImages"];

pub fn router(state: Arc<ApiState>, upload_dir: Option<&str>, body_limit: usize) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/api/campaigns", get(list_campaigns).post(create_campaign))
        .route(
            "/api/campaigns/:id",
            get(get_campaign)
                .put(update_campaign)
                .patch(update_campaign)
                .delete(delete_campaign),
        )
        .route("/api/campaigns/:id/donations", post(record_offline_donation))
        .route("/api/donations/orders", post(create_donation_order))
        .route("/api/donations/verify", post(verify_donation))
        .route("/api/donations/unattributed", get(unattributed_payments))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state);

    match upload_dir {
        Some(dir) => api.nest_service("/uploads", ServeDir::new(dir)),
        None => api,
    }
}

// ─────────────────────────────────────────────────────────
// Extractors
// ─────────────────────────────────────────────────────────

/// A campaign submission, from either a JSON body or `multipart/form-data`.
pub struct CampaignPayload(pub CampaignInput);

#[async_trait]
impl<S> FromRequest<S> for CampaignPayload
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let Json(value) = Json::<Value>::from_request(req, state)
                .await
                .map_err(|e| AppError::validation(e.body_text()))?;
            return Ok(Self(CampaignInput::from_json(value)?));
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| AppError::validation(e.body_text()))?;
        let mut fields = FieldBag::new();
        let mut uploads = Vec::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::validation(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field
                .content_type()
                .unwrap_or("application/octet-stream")
                .to_string();

            match file_name {
                Some(file_name) => {
                    if !FILE_FIELDS.contains(&name.as_str()) {
                        return Err(AppError::validation(format!(
                            "Unexpected file field '{name}'"
                        )));
                    }
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::validation(e.body_text()))?;
                    // Browsers send an empty part for an untouched file input.
                    if bytes.is_empty() {
                        continue;
                    }
                    uploads.push(Upload {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
                None => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| AppError::validation(e.body_text()))?;
                    push_field(&mut fields, name, text);
                }
            }
        }

        Ok(Self(CampaignInput::from_fields(fields, uploads)?))
    }
}

/// Repeated multipart text fields collect into an array.
fn push_field(fields: &mut FieldBag, name: String, text: String) {
    match fields.get_mut(&name) {
        None => {
            fields.insert(name, Value::String(text));
        }
        Some(Value::Array(items)) => items.push(Value::String(text)),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, Value::String(text)]);
        }
    }
}

fn json_body<T>(body: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    body.map(|Json(v)| v)
        .map_err(|e| AppError::validation(e.body_text()))
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

fn saved_response(saved: Saved) -> Value {
    let mut body = json!({ "success": true, "campaign": saved.campaign });
    if !saved.warnings.is_empty() {
        body["warnings"] = json!(saved.warnings);
    }
    body
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `GET /api/campaigns`
///
/// Every campaign, most recently created first.
pub async fn list_campaigns(State(state): State<Arc<ApiState>>) -> Result<impl IntoResponse> {
    let campaigns = state.campaigns.list().await?;
    Ok(Json(json!({
        "success": true,
        "count": campaigns.len(),
        "campaigns": campaigns,
    })))
}

/// `POST /api/campaigns`
pub async fn create_campaign(
    State(state): State<Arc<ApiState>>,
    CampaignPayload(input): CampaignPayload,
) -> Result<impl IntoResponse> {
    let saved = state.campaigns.create(input).await?;
    Ok((StatusCode::CREATED, Json(saved_response(saved))))
}

/// `GET /api/campaigns/:id`
pub async fn get_campaign(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let campaign = state.campaigns.get(&id).await?;
    Ok(Json(json!({ "success": true, "campaign": campaign })))
}

/// `PUT|PATCH /api/campaigns/:id`
pub async fn update_campaign(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    CampaignPayload(input): CampaignPayload,
) -> Result<impl IntoResponse> {
    let saved = state.campaigns.update(&id, input).await?;
    Ok(Json(saved_response(saved)))
}

/// `DELETE /api/campaigns/:id`
pub async fn delete_campaign(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    state.campaigns.delete(&id).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Campaign {id} deleted"),
    })))
}

#[derive(Deserialize)]
pub struct OfflineDonation {
    pub amount: f64,
}

/// `POST /api/campaigns/:id/donations`
///
/// Admin entry for a donation received outside the gateway (cash, cheque).
pub async fn record_offline_donation(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    body: std::result::Result<Json<OfflineDonation>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let donation = json_body(body)?;
    let campaign = state.campaigns.record_donation(&id, donation.amount).await?;
    Ok(Json(json!({ "success": true, "campaign": campaign })))
}

/// `POST /api/donations/orders`
pub async fn create_donation_order(
    State(state): State<Arc<ApiState>>,
    body: std::result::Result<Json<DonationOptions>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let opts = json_body(body)?;
    let started = state.donations.initiate(opts).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "orderId": started.attempt.order_id,
            "attempt": started.attempt,
            "checkout": started.checkout,
        })),
    ))
}

/// `POST /api/donations/verify`
///
/// Receives the checkout result relayed by the browser.
pub async fn verify_donation(
    State(state): State<Arc<ApiState>>,
    body: std::result::Result<Json<CheckoutOutcome>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let outcome = json_body(body)?;
    let result = state.donations.complete(outcome).await?;
    Ok(Json(result))
}

/// `GET /api/donations/unattributed`
///
/// Captured payments whose campaign vanished before they could be credited.
pub async fn unattributed_payments(
    State(state): State<Arc<ApiState>>,
) -> Result<impl IntoResponse> {
    let payments = state.campaigns.unattributed_payments().await?;
    Ok(Json(json!({
        "success": true,
        "count": payments.len(),
        "payments": payments,
    })))
}
