//! Application configuration loaded from environment variables.

use crate::errors::{AppError, Result};

pub const DEFAULT_PLACEHOLDER_URL: &str = "https://placehold.co/800x600?text=Campaign";

/// Where uploaded campaign images end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetBackend {
    /// Content-addressed files under `upload_dir`, served by this process.
    Local,
    /// An external store reached over HTTP.
    Remote { upload_url: String, api_key: Option<String> },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Razorpay-compatible key id, also handed to the browser checkout
    pub gateway_key_id: String,
    /// Shared gateway secret (Basic auth + payment signatures)
    pub gateway_key_secret: String,
    /// Gateway REST base URL
    pub gateway_base_url: String,
    pub gateway_max_retries: u32,
    /// The single currency donations are taken in
    pub currency: String,
    /// Merchant name shown on the hosted checkout
    pub checkout_name: String,
    pub asset_backend: AssetBackend,
    pub upload_dir: String,
    /// Base URL used to build links to locally stored assets
    pub public_base_url: String,
    pub asset_max_retries: u32,
    pub placeholder_image_url: String,
    /// Request body limit for multipart uploads
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_port: u16 = env_var("API_PORT")
            .unwrap_or_else(|_| "3001".to_string())
            .parse()
            .map_err(|_| AppError::Config("Invalid API_PORT".to_string()))?;

        let asset_backend = match env_var("ASSET_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .as_str()
        {
            "local" => AssetBackend::Local,
            "remote" => AssetBackend::Remote {
                upload_url: env_var("ASSET_UPLOAD_URL").map_err(|_| {
                    AppError::Config(
                        "ASSET_UPLOAD_URL is required when ASSET_BACKEND=remote".to_string(),
                    )
                })?,
                api_key: env_var("ASSET_API_KEY").ok(),
            },
            other => {
                return Err(AppError::Config(format!(
                    "Invalid ASSET_BACKEND '{other}' (expected 'local' or 'remote')"
                )))
            }
        };

        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./fundraiser.db".to_string()),
            api_port,
            gateway_key_id: env_var("RAZORPAY_KEY_ID").map_err(|_| {
                AppError::Config("RAZORPAY_KEY_ID environment variable is required".to_string())
            })?,
            gateway_key_secret: env_var("RAZORPAY_KEY_SECRET").map_err(|_| {
                AppError::Config(
                    "RAZORPAY_KEY_SECRET environment variable is required".to_string(),
                )
            })?,
            gateway_base_url: env_var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://api.razorpay.com".to_string()),
            gateway_max_retries: env_var("GATEWAY_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| AppError::Config("Invalid GATEWAY_MAX_RETRIES".to_string()))?,
            currency: env_var("DONATION_CURRENCY")
                .unwrap_or_else(|_| "INR".to_string())
                .to_uppercase(),
            checkout_name: env_var("CHECKOUT_NAME")
                .unwrap_or_else(|_| "Campaign Donations".to_string()),
            asset_backend,
            upload_dir: env_var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()),
            public_base_url: env_var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{api_port}")),
            asset_max_retries: env_var("ASSET_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| AppError::Config("Invalid ASSET_MAX_RETRIES".to_string()))?,
            placeholder_image_url: env_var("PLACEHOLDER_IMAGE_URL")
                .unwrap_or_else(|_| DEFAULT_PLACEHOLDER_URL.to_string()),
            max_upload_bytes: env_var("MAX_UPLOAD_BYTES")
                .unwrap_or_else(|_| "10485760".to_string())
                .parse()
                .map_err(|_| AppError::Config("Invalid MAX_UPLOAD_BYTES".to_string()))?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| AppError::Config(format!("Missing env var: {key}")))
}
