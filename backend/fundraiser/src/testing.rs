//! In-memory stand-ins for the external collaborators, shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use axum::Router;
use chrono::{Duration, Utc};

use crate::assets::{AssetError, AssetStore};
use crate::errors::{AppError, Result};
use crate::gateway::{
    sign_payment, verify_payment_signature, CheckoutSession, Order, OrderRequest, PaymentGateway,
    Prefill,
};
use crate::input::{CampaignInput, Upload};

pub const PLACEHOLDER: &str = "https://assets.test/placeholder.png";

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A submission that satisfies every required field.
pub fn campaign_input() -> CampaignInput {
    let start = Utc::now();
    CampaignInput {
        title: Some("Clean water for Ward 12".into()),
        description: Some("Borewells and filters".into()),
        about: Some("Three villages share one contaminated well.".into()),
        category: Some("water".into()),
        category_label: Some("Water & Sanitation".into()),
        location: Some("Pune".into()),
        organizer: Some("Jal Seva Trust".into()),
        goal_amount: Some(10_000.0),
        start_date: Some(start),
        end_date: Some(start + Duration::days(30)),
        expected_beneficiaries: Some(1200),
        expected_duration: Some("6 months".into()),
        impact_description: Some("Safe drinking water for 1200 people".into()),
        ..Default::default()
    }
}

pub fn image(name: &str) -> Upload {
    Upload {
        file_name: name.into(),
        content_type: "image/png".into(),
        bytes: name.as_bytes().to_vec(),
    }
}

// ─────────────────────────────────────────────────────────
// Asset store
// ─────────────────────────────────────────────────────────

/// Hands out `https://assets.test/<file name>` and remembers what it was told.
#[derive(Default)]
pub struct FakeAssetStore {
    failure: Mutex<Option<AssetError>>,
    uploaded: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeAssetStore {
    pub fn url_for(&self, file_name: &str) -> String {
        format!("https://assets.test/{file_name}")
    }

    pub fn fail_uploads_with(&self, err: AssetError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetStore for FakeAssetStore {
    async fn upload(&self, upload: &Upload) -> std::result::Result<String, AssetError> {
        if let Some(err) = self.failure.lock().unwrap().clone() {
            return Err(err);
        }
        let url = self.url_for(&upload.file_name);
        self.uploaded.lock().unwrap().push(url.clone());
        Ok(url)
    }

    async fn delete(&self, url: &str) -> bool {
        self.deleted.lock().unwrap().push(url.to_string());
        true
    }

    fn placeholder_url(&self) -> &str {
        PLACEHOLDER
    }
}

// ─────────────────────────────────────────────────────────
// Payment gateway
// ─────────────────────────────────────────────────────────

pub const GATEWAY_SECRET: &str = "test_secret";

/// Keeps orders in memory and signs payments with [`GATEWAY_SECRET`].
#[derive(Default)]
pub struct FakeGateway {
    orders: Mutex<HashMap<String, Order>>,
    unavailable: AtomicBool,
    created: AtomicUsize,
}

impl FakeGateway {
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn orders_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn sign(&self, order_id: &str, payment_id: &str) -> String {
        sign_payment(GATEWAY_SECRET, order_id, payment_id)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::GatewayUnavailable("connection refused".into()));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let order = Order {
            id: format!("order_{n}"),
            amount: request.amount,
            currency: request.currency.clone(),
            receipt: Some(request.receipt.clone()),
            status: "created".into(),
            notes: request.notes.clone(),
        };
        self.orders
            .lock()
            .unwrap()
            .insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn fetch_order(&self, order_id: &str) -> Result<Order> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::GatewayUnavailable("connection refused".into()));
        }
        self.orders
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("Payment order {order_id} not found")))
    }

    fn checkout(&self, order: &Order, prefill: Prefill, description: String) -> CheckoutSession {
        CheckoutSession {
            key: "rzp_test_fake".into(),
            order_id: order.id.clone(),
            amount: order.amount,
            currency: order.currency.clone(),
            name: "Test Donations".into(),
            description,
            prefill,
            notes: order.notes.clone(),
        }
    }

    fn verify_signature(&self, payment_id: &str, order_id: &str, signature: &str) -> bool {
        verify_payment_signature(GATEWAY_SECRET, order_id, payment_id, signature)
    }
}
