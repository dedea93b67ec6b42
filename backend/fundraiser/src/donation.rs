//! Donation Capture Flow.
//!
//! ```text
//! initiate ──► gateway order ──► hosted checkout (browser, unbounded time)
//!                                        │
//!             ┌──────────────────────────┼─────────────────────┐
//!          success                   cancelled               failed
//!             │                          │                     │
//!     verify signature               no mutation           no mutation
//!             │
//!     re-fetch order ──► credit ledger + campaign (one transaction)
//! ```
//!
//! The server holds no session between the two halves. Everything needed to
//! credit a payment (target campaign, amount) travels in the gateway order and
//! is read back from the gateway at verification time, never from the client.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use validator::Validate;

use crate::campaign::{Campaign, CampaignStatus};
use crate::db::{CreditOutcome, VerifiedPayment};
use crate::errors::{AppError, Result};
use crate::gateway::{CheckoutSession, Notes, Order, OrderRequest, PaymentGateway, Prefill};
use crate::manager::CampaignManager;

pub const MIN_DONATION: f64 = 100.0;
pub const MAX_DONATION: f64 = 1_000_000.0;

/// Gateways cap each note value at this many characters.
const NOTE_LIMIT: usize = 256;
/// Gateways cap receipts at this many characters.
const RECEIPT_LIMIT: usize = 40;

pub fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount < MIN_DONATION || amount > MAX_DONATION {
        return Err(AppError::InvalidAmount(format!(
            "Donation amount must be between {MIN_DONATION} and {MAX_DONATION}"
        )));
    }
    Ok(())
}

pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

pub fn from_minor_units(minor: i64) -> f64 {
    minor as f64 / 100.0
}

/// Donor form for one gift. `amount` is checked separately by
/// [`validate_amount`] so a bad amount keeps its own error.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DonationOptions {
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    #[validate(length(max = 100, message = "donorName must be at most 100 characters"))]
    pub donor_name: String,
    #[serde(default)]
    #[validate(email(message = "donorEmail must be a valid email address"))]
    pub donor_email: String,
    #[serde(default)]
    #[validate(length(max = 20, message = "donorPhone must be at most 20 characters"))]
    pub donor_phone: String,
    #[serde(default)]
    #[validate(length(max = 200, message = "description must be at most 200 characters"))]
    pub description: Option<String>,
    /// Absent means a general-fund donation.
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    #[validate(length(max = 1000, message = "message must be at most 1000 characters"))]
    pub message: Option<String>,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub recurring: bool,
    /// Client-chosen key for one donor intent. Re-submitting the same intent
    /// reuses the same gateway receipt.
    #[serde(default)]
    pub intent_id: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Attempt lifecycle
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Verified,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "resolution")]
pub enum AttemptState {
    Created,
    HandedOff,
    Resolved(Resolution),
}

/// One donor intent, identified by its gateway order id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationAttempt {
    pub order_id: String,
    pub amount: f64,
    pub currency: String,
    pub campaign_id: Option<String>,
    pub state: AttemptState,
}

impl DonationAttempt {
    pub fn from_order(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            amount: from_minor_units(order.amount),
            currency: order.currency.clone(),
            campaign_id: order
                .notes
                .get("campaign_id")
                .filter(|id| !id.is_empty())
                .cloned(),
            state: AttemptState::Created,
        }
    }

    /// Rebuild an attempt that was handed to the checkout in an earlier request.
    pub fn resume(order: &Order) -> Self {
        Self {
            state: AttemptState::HandedOff,
            ..Self::from_order(order)
        }
    }

    pub fn hand_off(&mut self) -> Result<()> {
        match self.state {
            AttemptState::Created => {
                self.state = AttemptState::HandedOff;
                Ok(())
            }
            other => Err(self.illegal(other, "hand off")),
        }
    }

    pub fn resolve(&mut self, resolution: Resolution) -> Result<()> {
        match self.state {
            AttemptState::HandedOff => {
                self.state = AttemptState::Resolved(resolution);
                Ok(())
            }
            other => Err(self.illegal(other, "resolve")),
        }
    }

    fn illegal(&self, state: AttemptState, action: &str) -> AppError {
        AppError::validation(format!(
            "Cannot {action} donation attempt {} in state {state:?}",
            self.order_id
        ))
    }
}

/// What the hosted checkout reported back through the browser.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CheckoutOutcome {
    #[serde(rename_all = "camelCase")]
    Success {
        #[serde(alias = "razorpay_payment_id")]
        payment_id: String,
        #[serde(alias = "razorpay_order_id")]
        order_id: String,
        #[serde(alias = "razorpay_signature")]
        signature: String,
    },
    #[serde(rename_all = "camelCase")]
    Cancelled {
        #[serde(default)]
        order_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        #[serde(default)]
        order_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<Campaign>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_recorded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DonationResult {
    fn credited(payment_id: &str, order_id: &str, campaign: Option<Campaign>) -> Self {
        Self {
            success: true,
            payment_id: Some(payment_id.to_string()),
            order_id: Some(order_id.to_string()),
            campaign,
            already_recorded: false,
            error: None,
        }
    }

    fn unsuccessful(order_id: Option<String>, error: String) -> Self {
        Self {
            success: false,
            payment_id: None,
            order_id,
            campaign: None,
            already_recorded: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiated {
    pub attempt: DonationAttempt,
    pub checkout: CheckoutSession,
}

// ─────────────────────────────────────────────────────────
// Flow
// ─────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DonationFlow {
    gateway: Arc<dyn PaymentGateway>,
    campaigns: CampaignManager,
    currency: String,
}

impl DonationFlow {
    pub fn new(gateway: Arc<dyn PaymentGateway>, campaigns: CampaignManager, currency: String) -> Self {
        Self {
            gateway,
            campaigns,
            currency,
        }
    }

    /// Create a gateway order and build the checkout hand-off.
    pub async fn initiate(&self, opts: DonationOptions) -> Result<Initiated> {
        validate_amount(opts.amount)?;

        if let Some(currency) = opts.currency.as_deref().filter(|c| !c.is_empty()) {
            if !currency.eq_ignore_ascii_case(&self.currency) {
                return Err(AppError::validation(format!(
                    "Only {} donations are accepted",
                    self.currency
                )));
            }
        }
        if !opts.anonymous && opts.donor_name.trim().is_empty() {
            return Err(AppError::validation("donorName is required"));
        }
        opts.validate()?;

        let campaign_id = opts.campaign_id.as_deref().filter(|id| !id.is_empty());
        let campaign = match campaign_id {
            Some(id) => {
                let campaign = self.campaigns.get(id).await?;
                if campaign.status != CampaignStatus::Active {
                    return Err(AppError::validation(format!(
                        "Campaign {id} is {} and not accepting donations",
                        campaign.status.as_str()
                    )));
                }
                Some(campaign)
            }
            None => None,
        };

        let receipt = match opts.intent_id.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() && key.len() <= RECEIPT_LIMIT => key.to_string(),
            Some(_) => {
                return Err(AppError::validation(format!(
                    "intentId must be 1 to {RECEIPT_LIMIT} characters"
                )))
            }
            None => format!("don_{}", uuid::Uuid::new_v4().simple()),
        };

        let mut notes = Notes::new();
        if let Some(id) = campaign_id {
            notes.insert("campaign_id".into(), id.to_string());
        }
        notes.insert("donor_name".into(), truncate(&opts.donor_name, NOTE_LIMIT));
        notes.insert("donor_email".into(), truncate(&opts.donor_email, NOTE_LIMIT));
        if let Some(message) = opts.message.as_deref().filter(|m| !m.trim().is_empty()) {
            notes.insert("message".into(), truncate(message, NOTE_LIMIT));
        }
        notes.insert("anonymous".into(), opts.anonymous.to_string());
        notes.insert("recurring".into(), opts.recurring.to_string());

        let request = OrderRequest {
            amount: to_minor_units(opts.amount),
            currency: self.currency.clone(),
            receipt,
            notes,
        };
        let order = self.gateway.create_order(&request).await?;

        let mut attempt = DonationAttempt::from_order(&order);
        attempt.hand_off()?;

        let description = opts
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| match &campaign {
                Some(c) => format!("Donation to {}", c.title),
                None => "General donation".to_string(),
            });
        let prefill = Prefill {
            name: opts.donor_name,
            email: opts.donor_email,
            contact: opts.donor_phone,
        };
        let checkout = self.gateway.checkout(&order, prefill, description);

        info!(
            "Donation order {} created: {} {} for {}",
            order.id,
            attempt.amount,
            attempt.currency,
            attempt.campaign_id.as_deref().unwrap_or("general fund")
        );
        Ok(Initiated { attempt, checkout })
    }

    /// Handle whatever the checkout reported.
    pub async fn complete(&self, outcome: CheckoutOutcome) -> Result<DonationResult> {
        match outcome {
            CheckoutOutcome::Success {
                payment_id,
                order_id,
                signature,
            } => self.verify(&payment_id, &order_id, &signature).await,
            CheckoutOutcome::Cancelled { order_id } => {
                self.close_unpaid(order_id.as_deref(), Resolution::Cancelled).await;
                Ok(DonationResult::unsuccessful(
                    order_id,
                    "Payment cancelled by donor".to_string(),
                ))
            }
            CheckoutOutcome::Failed { order_id, error } => {
                self.close_unpaid(order_id.as_deref(), Resolution::Failed).await;
                Ok(DonationResult::unsuccessful(
                    order_id,
                    error.unwrap_or_else(|| "Payment failed".to_string()),
                ))
            }
        }
    }

    /// Credit a payment only if its signature checks out.
    pub async fn verify(
        &self,
        payment_id: &str,
        order_id: &str,
        signature: &str,
    ) -> Result<DonationResult> {
        if payment_id.is_empty() || order_id.is_empty() || signature.is_empty() {
            return Err(AppError::validation(
                "paymentId, orderId and signature are required",
            ));
        }
        if !self.gateway.verify_signature(payment_id, order_id, signature) {
            error!(
                target: "security",
                order_id,
                payment_id,
                "Payment signature mismatch; possible tampering attempt"
            );
            return Err(AppError::SignatureVerification);
        }

        let order = self.gateway.fetch_order(order_id).await?;
        let mut attempt = DonationAttempt::resume(&order);
        let payment = VerifiedPayment {
            payment_id: payment_id.to_string(),
            order_id: order.id.clone(),
            campaign_id: attempt.campaign_id.clone(),
            amount: attempt.amount,
            currency: attempt.currency.clone(),
        };

        match self.campaigns.credit_verified_payment(&payment).await? {
            CreditOutcome::Credited(campaign) => {
                attempt.resolve(Resolution::Verified)?;
                info!(
                    "Payment {payment_id} credited {} to campaign {} (raised {}, {}%)",
                    payment.amount, campaign.id, campaign.raised_amount, campaign.progress
                );
                Ok(DonationResult::credited(payment_id, order_id, Some(campaign)))
            }
            CreditOutcome::General => {
                attempt.resolve(Resolution::Verified)?;
                info!("Payment {payment_id} of {} recorded for the general fund", payment.amount);
                Ok(DonationResult::credited(payment_id, order_id, None))
            }
            CreditOutcome::AlreadyRecorded { campaign } => {
                info!("Payment {payment_id} was already recorded; not crediting again");
                Ok(DonationResult {
                    already_recorded: true,
                    ..DonationResult::credited(payment_id, order_id, campaign)
                })
            }
            CreditOutcome::Unattributed => {
                let campaign_id = payment.campaign_id.unwrap_or_default();
                error!(
                    "Payment {payment_id} ({} {}) targets missing campaign {campaign_id}; \
                     manual reconciliation required",
                    payment.amount, payment.currency
                );
                Err(AppError::CampaignNotFound {
                    campaign_id,
                    payment_id: payment_id.to_string(),
                })
            }
        }
    }

    /// Log the end of an attempt that never paid. Nothing is written.
    async fn close_unpaid(&self, order_id: Option<&str>, resolution: Resolution) {
        let Some(order_id) = order_id.filter(|id| !id.is_empty()) else {
            info!("Checkout ended without an order ({resolution:?})");
            return;
        };
        match self.gateway.fetch_order(order_id).await {
            Ok(order) => {
                let mut attempt = DonationAttempt::resume(&order);
                if attempt.resolve(resolution).is_ok() {
                    info!(
                        "Donation order {order_id} closed as {resolution:?} ({} {} for {})",
                        attempt.amount,
                        attempt.currency,
                        attempt.campaign_id.as_deref().unwrap_or("general fund")
                    );
                }
            }
            Err(e) => {
                warn!("Donation order {order_id} closed as {resolution:?}");
                debug!("Could not look up order {order_id}: {e}");
            }
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::testing::{campaign_input, FakeAssetStore, FakeGateway};

    struct Harness {
        flow: DonationFlow,
        gateway: Arc<FakeGateway>,
        manager: CampaignManager,
    }

    async fn harness() -> Harness {
        let manager = CampaignManager::new(
            db::memory_pool().await,
            Arc::new(FakeAssetStore::default()),
        );
        let gateway = Arc::new(FakeGateway::default());
        let flow = DonationFlow::new(gateway.clone(), manager.clone(), "INR".into());
        Harness {
            flow,
            gateway,
            manager,
        }
    }

    fn options(amount: f64, campaign_id: Option<&str>) -> DonationOptions {
        DonationOptions {
            amount,
            donor_name: "Asha".into(),
            donor_email: "asha@example.com".into(),
            donor_phone: "9999999999".into(),
            campaign_id: campaign_id.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn amount_bounds_are_inclusive() {
        assert!(matches!(validate_amount(99.0), Err(AppError::InvalidAmount(_))));
        assert!(validate_amount(100.0).is_ok());
        assert!(validate_amount(1_000_000.0).is_ok());
        assert!(matches!(
            validate_amount(1_000_001.0),
            Err(AppError::InvalidAmount(_))
        ));
        assert!(validate_amount(f64::NAN).is_err());
        assert_eq!(to_minor_units(499.99), 49_999);
    }

    #[test]
    fn attempts_only_move_forward() {
        let order = Order {
            id: "order_1".into(),
            amount: 50_000,
            currency: "INR".into(),
            receipt: None,
            status: "created".into(),
            notes: Notes::from([("campaign_id".to_string(), "c1".to_string())]),
        };
        let mut attempt = DonationAttempt::from_order(&order);
        assert_eq!(attempt.amount, 500.0);
        assert_eq!(attempt.campaign_id.as_deref(), Some("c1"));
        assert!(attempt.resolve(Resolution::Verified).is_err());
        attempt.hand_off().unwrap();
        assert!(attempt.hand_off().is_err());
        attempt.resolve(Resolution::Cancelled).unwrap();
        assert_eq!(attempt.state, AttemptState::Resolved(Resolution::Cancelled));
        assert!(attempt.resolve(Resolution::Verified).is_err());
    }

    #[test]
    fn checkout_outcomes_accept_gateway_field_names() {
        let outcome: CheckoutOutcome = serde_json::from_value(serde_json::json!({
            "status": "success",
            "razorpay_payment_id": "pay_1",
            "razorpay_order_id": "order_1",
            "razorpay_signature": "abc"
        }))
        .unwrap();
        assert_eq!(
            outcome,
            CheckoutOutcome::Success {
                payment_id: "pay_1".into(),
                order_id: "order_1".into(),
                signature: "abc".into()
            }
        );
        let outcome: CheckoutOutcome =
            serde_json::from_value(serde_json::json!({"status": "cancelled"})).unwrap();
        assert_eq!(outcome, CheckoutOutcome::Cancelled { order_id: None });
    }

    #[tokio::test]
    async fn invalid_amount_never_reaches_the_gateway() {
        let h = harness().await;
        let err = h.flow.initiate(options(99.0, None)).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidAmount(_)));
        assert_eq!(h.gateway.orders_created(), 0);
    }

    #[tokio::test]
    async fn initiate_builds_checkout_with_routing_notes() {
        let h = harness().await;
        let c = h.manager.create(campaign_input()).await.unwrap().campaign;
        let mut opts = options(500.0, Some(&c.id));
        opts.message = Some("x".repeat(300));

        let started = h.flow.initiate(opts).await.unwrap();
        assert_eq!(started.attempt.state, AttemptState::HandedOff);
        assert_eq!(started.checkout.amount, 50_000);
        assert_eq!(started.checkout.currency, "INR");
        assert_eq!(started.checkout.prefill.email, "asha@example.com");
        assert_eq!(started.checkout.notes["campaign_id"], c.id);
        assert_eq!(started.checkout.notes["message"].chars().count(), NOTE_LIMIT);
        assert_eq!(started.checkout.description, format!("Donation to {}", c.title));
    }

    #[tokio::test]
    async fn initiate_rejects_bad_requests() {
        let h = harness().await;
        assert!(matches!(
            h.flow.initiate(options(500.0, Some("missing"))).await,
            Err(AppError::NotFound(_))
        ));

        let mut usd = options(500.0, None);
        usd.currency = Some("USD".into());
        assert!(matches!(h.flow.initiate(usd).await, Err(AppError::Validation(_))));

        for email in ["", "@", "a@", "asha.example.com"] {
            let mut bad = options(500.0, None);
            bad.donor_email = email.into();
            match h.flow.initiate(bad).await {
                Err(AppError::Validation(msg)) => assert!(msg.contains("donorEmail"), "{msg}"),
                other => panic!("{email:?} accepted: {other:?}"),
            }
        }

        let mut long_note = options(500.0, None);
        long_note.message = Some("x".repeat(1001));
        assert!(matches!(h.flow.initiate(long_note).await, Err(AppError::Validation(_))));

        // A bad amount is reported as such even when the form is also bad.
        let mut both = options(5.0, None);
        both.donor_email = "nope".into();
        assert!(matches!(h.flow.initiate(both).await, Err(AppError::InvalidAmount(_))));

        let c = h.manager.create(campaign_input()).await.unwrap().campaign;
        let pause = crate::input::CampaignInput {
            status: Some(CampaignStatus::Paused),
            ..Default::default()
        };
        h.manager.update(&c.id, pause).await.unwrap();
        assert!(matches!(
            h.flow.initiate(options(500.0, Some(&c.id))).await,
            Err(AppError::Validation(_))
        ));

        assert_eq!(h.gateway.orders_created(), 0);

        h.gateway.set_unavailable(true);
        assert!(matches!(
            h.flow.initiate(options(500.0, None)).await,
            Err(AppError::GatewayUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn verified_payment_credits_its_campaign_once() {
        let h = harness().await;
        let c = h.manager.create(campaign_input()).await.unwrap().campaign;
        let order_id = h
            .flow
            .initiate(options(2_500.0, Some(&c.id)))
            .await
            .unwrap()
            .checkout
            .order_id;
        let sig = h.gateway.sign(&order_id, "pay_1");

        let res = h.flow.verify("pay_1", &order_id, &sig).await.unwrap();
        assert!(res.success && !res.already_recorded);
        let credited = res.campaign.unwrap();
        assert_eq!(credited.raised_amount, 2_500.0);
        assert_eq!(credited.backers_count, 1);
        assert_eq!(credited.progress, 25);

        // The gateway may deliver the same callback again.
        let replay = h.flow.verify("pay_1", &order_id, &sig).await.unwrap();
        assert!(replay.success && replay.already_recorded);
        let after = h.manager.get(&c.id).await.unwrap();
        assert_eq!((after.raised_amount, after.backers_count), (2_500.0, 1));
    }

    #[tokio::test]
    async fn forged_signature_changes_nothing() {
        let h = harness().await;
        let c = h.manager.create(campaign_input()).await.unwrap().campaign;
        let order_id = h
            .flow
            .initiate(options(2_500.0, Some(&c.id)))
            .await
            .unwrap()
            .checkout
            .order_id;

        let outcome = CheckoutOutcome::Success {
            payment_id: "pay_1".into(),
            order_id: order_id.clone(),
            signature: "00".repeat(32),
        };
        assert!(matches!(
            h.flow.complete(outcome).await,
            Err(AppError::SignatureVerification)
        ));
        // Signed for a different payment id.
        let sig = h.gateway.sign(&order_id, "pay_other");
        assert!(matches!(
            h.flow.verify("pay_1", &order_id, &sig).await,
            Err(AppError::SignatureVerification)
        ));

        let after = h.manager.get(&c.id).await.unwrap();
        assert_eq!((after.raised_amount, after.backers_count), (0.0, 0));
    }

    #[tokio::test]
    async fn cancelled_and_failed_checkouts_mutate_nothing() {
        let h = harness().await;
        let c = h.manager.create(campaign_input()).await.unwrap().campaign;
        let order_id = h
            .flow
            .initiate(options(2_500.0, Some(&c.id)))
            .await
            .unwrap()
            .checkout
            .order_id;

        let res = h
            .flow
            .complete(CheckoutOutcome::Cancelled {
                order_id: Some(order_id.clone()),
            })
            .await
            .unwrap();
        assert!(!res.success);
        let res = h
            .flow
            .complete(CheckoutOutcome::Failed {
                order_id: Some(order_id),
                error: Some("card declined".into()),
            })
            .await
            .unwrap();
        assert_eq!(res.error.as_deref(), Some("card declined"));

        let after = h.manager.get(&c.id).await.unwrap();
        assert_eq!((after.raised_amount, after.backers_count), (0.0, 0));
    }

    #[tokio::test]
    async fn general_fund_donations_touch_no_campaign() {
        let h = harness().await;
        let c = h.manager.create(campaign_input()).await.unwrap().campaign;
        let order_id = h
            .flow
            .initiate(options(1_000.0, None))
            .await
            .unwrap()
            .checkout
            .order_id;
        let sig = h.gateway.sign(&order_id, "pay_g");

        let res = h.flow.verify("pay_g", &order_id, &sig).await.unwrap();
        assert!(res.success);
        assert!(res.campaign.is_none());
        assert_eq!(h.manager.get(&c.id).await.unwrap().raised_amount, 0.0);
    }

    #[tokio::test]
    async fn payment_for_a_vanished_campaign_is_flagged() {
        let h = harness().await;
        let c = h.manager.create(campaign_input()).await.unwrap().campaign;
        let order_id = h
            .flow
            .initiate(options(2_500.0, Some(&c.id)))
            .await
            .unwrap()
            .checkout
            .order_id;
        h.manager.delete(&c.id).await.unwrap();

        let sig = h.gateway.sign(&order_id, "pay_lost");
        let err = h.flow.verify("pay_lost", &order_id, &sig).await.unwrap_err();
        assert!(matches!(err, AppError::CampaignNotFound { ref payment_id, .. } if payment_id == "pay_lost"));

        let flagged = h.manager.unattributed_payments().await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].amount, 2_500.0);
    }
}
