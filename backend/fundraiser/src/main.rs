//! Campaign fundraiser entry point.
//!
//! Serves the admin campaign API and the two donation endpoints (order
//! creation, payment verification) over Axum, backed by SQLite. Campaign
//! images go to a local content-addressed directory or a remote store;
//! payments go through a Razorpay-compatible gateway.

mod api;
mod assets;
mod campaign;
mod config;
mod db;
mod donation;
mod errors;
mod gateway;
mod input;
mod manager;
mod retry;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use assets::{AssetStore, LocalAssetStore, RemoteAssetStore};
use config::{AssetBackend, Config};
use gateway::{PaymentGateway, RazorpayGateway};
use retry::RetryPolicy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    // Shared by the gateway and the remote asset store.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    // ─── Asset store ──────────────────────────────────────
    let (assets, serve_dir): (Arc<dyn AssetStore>, Option<&str>) = match &config.asset_backend {
        AssetBackend::Local => {
            tokio::fs::create_dir_all(&config.upload_dir).await?;
            info!("Storing campaign images under {}", config.upload_dir);
            let store: Arc<dyn AssetStore> = Arc::new(LocalAssetStore::new(
                &config.upload_dir,
                &config.public_base_url,
                config.placeholder_image_url.clone(),
            ));
            (store, Some(config.upload_dir.as_str()))
        }
        AssetBackend::Remote {
            upload_url,
            api_key,
        } => {
            info!("Storing campaign images at {upload_url}");
            let store: Arc<dyn AssetStore> = Arc::new(RemoteAssetStore::new(
                client.clone(),
                upload_url,
                api_key.clone(),
                RetryPolicy::new(config.asset_max_retries),
                config.placeholder_image_url.clone(),
            ));
            (store, None)
        }
    };

    // ─── Payment gateway ──────────────────────────────────
    let gateway: Arc<dyn PaymentGateway> = Arc::new(RazorpayGateway::new(
        client,
        &config.gateway_base_url,
        config.gateway_key_id.clone(),
        config.gateway_key_secret.clone(),
        config.checkout_name.clone(),
        RetryPolicy::new(config.gateway_max_retries),
    ));

    // ─── REST API ─────────────────────────────────────────
    let campaigns = manager::CampaignManager::new(pool, assets);
    let donations = donation::DonationFlow::new(gateway, campaigns.clone(), config.currency.clone());
    let api_state = Arc::new(api::ApiState {
        campaigns,
        donations,
    });

    let app = api::router(api_state, serve_dir, config.max_upload_bytes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
