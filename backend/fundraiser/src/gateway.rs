//! Payment gateway adapter for a Razorpay-compatible orders API.
//!
//! ## Signatures
//!
//! After a successful hosted checkout the gateway hands the browser
//! `(payment_id, order_id, signature)` where
//!
//! ```text
//! signature = hex(HMAC-SHA256(key_secret, "<order_id>|<payment_id>"))
//! ```
//!
//! The browser is untrusted, so the signature is recomputed here and
//! compared in constant time before anything is credited.
//!
//! ## Idempotent order creation
//!
//! Every retry of one `create_order` call carries the same `receipt` and the
//! same `X-Idempotency-Key` header, so a flaky network cannot turn one donor
//! intent into two live orders.

use std::collections::BTreeMap;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::errors::{AppError, Result};
use crate::retry::{classify_status, classify_transport, with_backoff, Attempt, RetryError, RetryPolicy};

type HmacSha256 = Hmac<Sha256>;

/// Order notes: a flat string map carried by the gateway alongside the order.
pub type Notes = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    /// Amount in the currency's minor unit (paise for INR).
    pub amount: i64,
    pub currency: String,
    /// Caller-chosen reference, reused on retries.
    pub receipt: String,
    pub notes: Notes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    /// Minor units.
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "notes_or_empty")]
    pub notes: Notes,
}

/// The gateway encodes "no notes" as `[]` rather than `{}`.
fn notes_or_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Notes, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Map(BTreeMap<String, serde_json::Value>),
        List(Vec<serde_json::Value>),
    }
    Ok(match Option::<Raw>::deserialize(d)? {
        Some(Raw::Map(map)) => map
            .into_iter()
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, v)
            })
            .collect(),
        Some(Raw::List(_)) | None => Notes::new(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prefill {
    pub name: String,
    pub email: String,
    pub contact: String,
}

/// Options handed to the browser checkout library. Field names follow the
/// library's option names so the object can be passed through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckoutSession {
    pub key: String,
    pub order_id: String,
    pub amount: i64,
    pub currency: String,
    pub name: String,
    pub description: String,
    pub prefill: Prefill,
    pub notes: Notes,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, request: &OrderRequest) -> Result<Order>;

    async fn fetch_order(&self, order_id: &str) -> Result<Order>;

    /// Build the hand-off for the hosted checkout.
    fn checkout(&self, order: &Order, prefill: Prefill, description: String) -> CheckoutSession;

    fn verify_signature(&self, payment_id: &str, order_id: &str, signature: &str) -> bool;
}

// ─────────────────────────────────────────────────────────
// Signature primitives
// ─────────────────────────────────────────────────────────

pub fn sign_payment(secret: &str, order_id: &str, payment_id: &str) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_payment_signature(
    secret: &str,
    order_id: &str,
    payment_id: &str,
    signature: &str,
) -> bool {
    if secret.is_empty() || order_id.is_empty() || payment_id.is_empty() {
        return false;
    }
    let expected = sign_payment(secret, order_id, payment_id);
    let provided = signature.trim().to_ascii_lowercase();
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}

// ─────────────────────────────────────────────────────────
// HTTP client
// ─────────────────────────────────────────────────────────

pub struct RazorpayGateway {
    client: Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    merchant_name: String,
    policy: RetryPolicy,
}

impl RazorpayGateway {
    pub fn new(
        client: Client,
        base_url: &str,
        key_id: String,
        key_secret: String,
        merchant_name: String,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            key_id,
            key_secret,
            merchant_name,
            policy,
        }
    }
}

fn gateway_error(e: RetryError<String>) -> AppError {
    match e {
        RetryError::Fatal(msg) => AppError::GatewayRejected(msg),
        RetryError::Exhausted { attempts, last } => {
            AppError::GatewayUnavailable(format!("gave up after {attempts} attempts: {last}"))
        }
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(&self, request: &OrderRequest) -> Result<Order> {
        let url = format!("{}/v1/orders", self.base_url);

        let order = with_backoff(self.policy, "Gateway order creation", || async {
            let resp = self
                .client
                .post(&url)
                .basic_auth(&self.key_id, Some(&self.key_secret))
                .header("X-Idempotency-Key", &request.receipt)
                .json(request)
                .send()
                .await
                .map_err(classify_transport)?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(classify_status(status, &body));
            }
            resp.json::<Order>()
                .await
                .map_err(|e| Attempt::Fatal(format!("malformed order response: {e}")))
        })
        .await
        .map_err(gateway_error)?;

        debug!("Created gateway order {} for receipt {}", order.id, request.receipt);
        Ok(order)
    }

    async fn fetch_order(&self, order_id: &str) -> Result<Order> {
        let url = format!("{}/v1/orders/{order_id}", self.base_url);

        let order = with_backoff(self.policy, "Gateway order lookup", || async {
            let resp = self
                .client
                .get(&url)
                .basic_auth(&self.key_id, Some(&self.key_secret))
                .send()
                .await
                .map_err(classify_transport)?;
            let status = resp.status();
            if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
                return Ok(None);
            }
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(classify_status(status, &body));
            }
            resp.json::<Order>()
                .await
                .map(Some)
                .map_err(|e| Attempt::Fatal(format!("malformed order response: {e}")))
        })
        .await
        .map_err(gateway_error)?;

        order.ok_or_else(|| AppError::not_found(format!("Payment order {order_id} not found")))
    }

    fn checkout(&self, order: &Order, prefill: Prefill, description: String) -> CheckoutSession {
        CheckoutSession {
            key: self.key_id.clone(),
            order_id: order.id.clone(),
            amount: order.amount,
            currency: order.currency.clone(),
            name: self.merchant_name.clone(),
            description,
            prefill,
            notes: order.notes.clone(),
        }
    }

    fn verify_signature(&self, payment_id: &str, order_id: &str, signature: &str) -> bool {
        verify_payment_signature(&self.key_secret, order_id, payment_id, signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::spawn_server;
    use axum::{
        extract::Path,
        http::HeaderMap,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    #[test]
    fn signature_round_trip_and_tampering() {
        let sig = sign_payment("s3cret", "order_1", "pay_1");
        assert_eq!(sig.len(), 64);
        assert!(verify_payment_signature("s3cret", "order_1", "pay_1", &sig));
        assert!(verify_payment_signature(
            "s3cret",
            "order_1",
            "pay_1",
            &sig.to_uppercase()
        ));
        assert!(!verify_payment_signature("other", "order_1", "pay_1", &sig));
        assert!(!verify_payment_signature("s3cret", "order_2", "pay_1", &sig));
        assert!(!verify_payment_signature("s3cret", "order_1", "pay_2", &sig));
        assert!(!verify_payment_signature("s3cret", "order_1", "pay_1", &sig[..63]));
        assert!(!verify_payment_signature("s3cret", "order_1", "pay_1", ""));
    }

    #[test]
    fn order_notes_accept_empty_list() {
        let order: Order = serde_json::from_value(json!({
            "id": "order_1", "amount": 50000, "currency": "INR", "status": "created", "notes": []
        }))
        .unwrap();
        assert!(order.notes.is_empty());

        let order: Order = serde_json::from_value(json!({
            "id": "order_1", "amount": 50000, "currency": "INR",
            "notes": { "campaign_id": "c1", "anonymous": true }
        }))
        .unwrap();
        assert_eq!(order.notes["campaign_id"], "c1");
        assert_eq!(order.notes["anonymous"], "true");
    }

    fn gateway(base: &str) -> RazorpayGateway {
        RazorpayGateway::new(
            Client::new(),
            base,
            "rzp_test_key".into(),
            "s3cret".into(),
            "Donations".into(),
            RetryPolicy::immediate(2),
        )
    }

    #[tokio::test]
    async fn create_order_retries_with_the_same_idempotency_key() {
        let seen: Arc<Mutex<Vec<(Option<String>, Value)>>> = Arc::default();
        let log = seen.clone();
        let app = Router::new().route(
            "/v1/orders",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let log = log.clone();
                async move {
                    let key = headers
                        .get("x-idempotency-key")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    let first = {
                        let mut log = log.lock().unwrap();
                        log.push((key, body.clone()));
                        log.len() == 1
                    };
                    if first {
                        return (axum::http::StatusCode::BAD_GATEWAY, Json(json!({})));
                    }
                    (
                        axum::http::StatusCode::OK,
                        Json(json!({
                            "id": "order_abc",
                            "amount": body["amount"],
                            "currency": body["currency"],
                            "receipt": body["receipt"],
                            "status": "created",
                            "notes": body["notes"],
                        })),
                    )
                }
            }),
        );
        let gw = gateway(&spawn_server(app).await);

        let mut notes = Notes::new();
        notes.insert("campaign_id".into(), "c1".into());
        let order = gw
            .create_order(&OrderRequest {
                amount: 50_000,
                currency: "INR".into(),
                receipt: "rcpt_1".into(),
                notes,
            })
            .await
            .unwrap();
        assert_eq!(order.id, "order_abc");
        assert_eq!(order.amount, 50_000);
        assert_eq!(order.notes["campaign_id"], "c1");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|(k, b)| k.as_deref() == Some("rcpt_1")
            && b["receipt"] == "rcpt_1"));
    }

    #[tokio::test]
    async fn fetch_order_maps_missing_orders_to_not_found() {
        let app = Router::new().route(
            "/v1/orders/:id",
            get(|Path(id): Path<String>| async move {
                if id == "order_ok" {
                    (
                        axum::http::StatusCode::OK,
                        Json(json!({ "id": id, "amount": 10_000, "currency": "INR", "notes": [] })),
                    )
                } else {
                    (axum::http::StatusCode::NOT_FOUND, Json(json!({ "error": {} })))
                }
            }),
        );
        let gw = gateway(&spawn_server(app).await);

        assert_eq!(gw.fetch_order("order_ok").await.unwrap().amount, 10_000);
        assert!(matches!(
            gw.fetch_order("order_missing").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_gateway_is_unavailable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let gw = gateway(&format!("http://{addr}"));
        assert!(matches!(
            gw.fetch_order("order_1").await,
            Err(AppError::GatewayUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn refused_credentials_are_rejected_not_retried() {
        let calls = Arc::new(Mutex::new(0_u32));
        let counter = calls.clone();
        let app = Router::new().route(
            "/v1/orders",
            post(move || {
                let counter = counter.clone();
                async move {
                    *counter.lock().unwrap() += 1;
                    (
                        axum::http::StatusCode::UNAUTHORIZED,
                        Json(json!({ "error": { "code": "BAD_REQUEST_ERROR" } })),
                    )
                }
            }),
        );
        let gw = gateway(&spawn_server(app).await);

        let err = gw
            .create_order(&OrderRequest {
                amount: 10_000,
                currency: "INR".into(),
                receipt: "rcpt_1".into(),
                notes: Notes::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GatewayRejected(_)));
        assert_eq!(err.kind(), "system");
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn checkout_carries_order_and_prefill() {
        let gw = gateway("http://unused");
        let order = Order {
            id: "order_1".into(),
            amount: 25_000,
            currency: "INR".into(),
            receipt: None,
            status: "created".into(),
            notes: Notes::new(),
        };
        let session = gw.checkout(
            &order,
            Prefill {
                name: "Asha".into(),
                email: "asha@example.org".into(),
                contact: "9999999999".into(),
            },
            "Clean water".into(),
        );
        assert_eq!(session.key, "rzp_test_key");
        assert_eq!(session.order_id, "order_1");
        assert_eq!(session.amount, 25_000);
        assert_eq!(session.prefill.name, "Asha");
    }
}
