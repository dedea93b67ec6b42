//! Application-wide error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    // ── Campaign management ──────────────────────────────────
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Image upload failed: {0}")]
    AssetUpload(String),

    // ── Donation capture ─────────────────────────────────────
    #[error("{0}")]
    InvalidAmount(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// The gateway refused the request; repeating it will not help.
    #[error("Payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("Payment signature verification failed")]
    SignatureVerification,

    #[error(
        "Payment {payment_id} was captured but campaign {campaign_id} no longer exists; \
         flagged for manual reconciliation"
    )]
    CampaignNotFound {
        campaign_id: String,
        payment_id: String,
    },
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Coarse class shown to admins: whether editing the form can fix it,
    /// or the failure is on our side and a retry is the right move.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::InvalidAmount(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::SignatureVerification | Self::CampaignNotFound { .. } => "payment",
            _ => "system",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidAmount(_) | Self::SignatureVerification => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::CampaignNotFound { .. } => StatusCode::CONFLICT,
            Self::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::AssetUpload(_) | Self::GatewayRejected(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{field}: validation failed"))
                })
            })
            .collect();
        messages.sort();
        Self::Validation(messages.join(", "))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {self}");
        }
        (
            status,
            Json(serde_json::json!({
                "success": false,
                "error": self.to_string(),
                "kind": self.kind(),
            })),
        )
            .into_response()
    }
}
