//! Campaign Manager: the only writer of campaign records.
//!
//! Admin views and the donation flow both go through this type, so the
//! invariants in [`crate::campaign`] are enforced in one place. Image side
//! effects are split in two: uploads happen before the write (their URLs are
//! part of it), deletions happen after it, detached, and only ever log.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::assets::{AssetError, AssetStore};
use crate::campaign::{normalize_images, resolve_featured, Campaign, MAX_IMAGES};
use crate::db::{self, CreditOutcome, PaymentRecord, VerifiedPayment};
use crate::errors::{AppError, Result};
use crate::input::{CampaignInput, Upload};

/// A written campaign plus anything that went wrong without blocking the write.
#[derive(Debug, Clone, Serialize)]
pub struct Saved {
    pub campaign: Campaign,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct CampaignManager {
    pool: SqlitePool,
    assets: Arc<dyn AssetStore>,
}

impl CampaignManager {
    pub fn new(pool: SqlitePool, assets: Arc<dyn AssetStore>) -> Self {
        Self { pool, assets }
    }

    pub fn placeholder(&self) -> &str {
        self.assets.placeholder_url()
    }

    // ── Reads ────────────────────────────────────────────

    pub async fn list(&self) -> Result<Vec<Campaign>> {
        let now = Utc::now();
        let mut campaigns = db::list_campaigns(&self.pool).await?;
        for c in &mut campaigns {
            c.refresh_days_left(now);
        }
        Ok(campaigns)
    }

    pub async fn get(&self, id: &str) -> Result<Campaign> {
        let mut campaign = db::find_campaign(&self.pool, id)
            .await?
            .ok_or_else(|| not_found(id))?;
        campaign.refresh_days_left(Utc::now());
        Ok(campaign)
    }

    // ── Admin writes ─────────────────────────────────────

    pub async fn create(&self, input: CampaignInput) -> Result<Saved> {
        check_uploads(&input.uploads)?;

        let missing: Vec<&str> = [
            ("title", input.title.as_deref().is_some_and(|s| !s.is_empty())),
            ("description", input.description.as_deref().is_some_and(|s| !s.is_empty())),
            ("about", input.about.as_deref().is_some_and(|s| !s.is_empty())),
            ("goalAmount", input.goal_amount.is_some()),
            ("endDate", input.end_date.is_some()),
            ("location", input.location.as_deref().is_some_and(|s| !s.is_empty())),
            ("organizer", input.organizer.as_deref().is_some_and(|s| !s.is_empty())),
            ("category", input.category.as_deref().is_some_and(|s| !s.is_empty())),
            ("expectedBeneficiaries", input.expected_beneficiaries.is_some()),
            ("expectedDuration", input.expected_duration.as_deref().is_some_and(|s| !s.is_empty())),
            ("impactDescription", input.impact_description.as_deref().is_some_and(|s| !s.is_empty())),
        ]
        .into_iter()
        .filter_map(|(name, ok)| (!ok).then_some(name))
        .collect();
        if !missing.is_empty() {
            return Err(AppError::validation(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        let goal_amount = positive_amount("goalAmount", input.goal_amount)?;
        let expected_beneficiaries = input.expected_beneficiaries.unwrap_or_default();
        if expected_beneficiaries <= 0 {
            return Err(AppError::validation(
                "expectedBeneficiaries must be greater than 0",
            ));
        }
        let raised_amount = non_negative("raisedAmount", input.raised_amount)?.unwrap_or(0.0);
        let backers_count = input.backers_count.unwrap_or(0);

        let hosted = input.images.clone().unwrap_or_default();
        let hosted = normalize_images(hosted, self.placeholder())
            .into_iter()
            .filter(|u| u != self.placeholder())
            .collect::<Vec<_>>();
        if hosted.len() + input.uploads.len() > MAX_IMAGES {
            return Err(AppError::validation(format!(
                "A campaign can have at most {MAX_IMAGES} images"
            )));
        }

        let now = Utc::now();
        let mut campaign = Campaign {
            id: uuid::Uuid::new_v4().to_string(),
            title: input.title.unwrap_or_default(),
            description: input.description.unwrap_or_default(),
            about: input.about.unwrap_or_default(),
            category_label: input
                .category_label
                .filter(|s| !s.is_empty())
                .or_else(|| input.category.clone())
                .unwrap_or_default(),
            category: input.category.unwrap_or_default(),
            location: input.location.unwrap_or_default(),
            organizer: input.organizer.unwrap_or_default(),
            goal_amount,
            raised_amount,
            backers_count,
            progress: 0,
            start_date: input.start_date.unwrap_or(now),
            end_date: input.end_date.unwrap_or(now),
            days_left: 0,
            expected_beneficiaries,
            expected_duration: input.expected_duration.unwrap_or_default(),
            impact_description: input.impact_description.unwrap_or_default(),
            tax_deductible: input.tax_deductible.unwrap_or(true),
            secure_payment: input.secure_payment.unwrap_or(true),
            transparent_reporting: input.transparent_reporting.unwrap_or(true),
            images: hosted,
            featured_image: input.featured_image.unwrap_or_default(),
            milestones: input.milestones.unwrap_or_default(),
            status: input.status.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        // Reject a bad form before any binary reaches the store.
        campaign.rederive(self.placeholder(), now);
        campaign.ensure_consistent()?;

        let mut warnings = Vec::new();
        let mut images = std::mem::take(&mut campaign.images);
        for (upload, outcome) in input
            .uploads
            .iter()
            .zip(self.assets.upload_many(&input.uploads).await)
        {
            match outcome {
                Ok(url) => images.push(url),
                Err(AssetError::Rejected(msg)) => {
                    return Err(AppError::AssetUpload(format!(
                        "'{}': {msg}",
                        upload.file_name
                    )))
                }
                Err(e @ AssetError::Exhausted { .. }) => {
                    warn!("Upload of '{}' degraded: {e}", upload.file_name);
                    warnings.push(format!(
                        "Image '{}' could not be stored and was skipped: {e}",
                        upload.file_name
                    ));
                }
            }
        }
        campaign.images = images;
        campaign.rederive(self.placeholder(), now);
        campaign.ensure_consistent()?;

        let campaign = db::insert_campaign(&self.pool, &campaign).await?;
        info!(
            "Campaign {} created ({} image(s), goal {})",
            campaign.id,
            campaign.images.len(),
            campaign.goal_amount
        );
        Ok(Saved { campaign, warnings })
    }

    /// Apply a partial edit. Images are resolved in a fixed order: keep
    /// `existingImages` (or everything, when absent), drop `imagesToRemove`,
    /// then append new uploads.
    pub async fn update(&self, id: &str, input: CampaignInput) -> Result<Saved> {
        check_uploads(&input.uploads)?;
        let current = self.get(id).await?;
        let placeholder = self.placeholder().to_string();

        let kept = input
            .existing_images
            .clone()
            .or_else(|| input.images.clone())
            .unwrap_or_else(|| current.images.clone());
        let removed: Vec<String> = input
            .images_to_remove
            .iter()
            .filter(|u| **u != placeholder)
            .cloned()
            .collect();
        let mut images: Vec<String> = normalize_images(kept, &placeholder)
            .into_iter()
            .filter(|u| *u != placeholder && !removed.contains(u))
            .collect();

        if images.len() + input.uploads.len() > MAX_IMAGES {
            return Err(AppError::validation(format!(
                "A campaign can have at most {MAX_IMAGES} images"
            )));
        }

        let mut next = current.clone();
        set_text(&mut next.title, input.title, "title")?;
        set_text(&mut next.description, input.description, "description")?;
        set_text(&mut next.about, input.about, "about")?;
        set_text(&mut next.category, input.category, "category")?;
        set_text(&mut next.category_label, input.category_label, "categoryLabel")?;
        set_text(&mut next.location, input.location, "location")?;
        set_text(&mut next.organizer, input.organizer, "organizer")?;
        set_text(&mut next.expected_duration, input.expected_duration, "expectedDuration")?;
        set_text(
            &mut next.impact_description,
            input.impact_description,
            "impactDescription",
        )?;
        if input.goal_amount.is_some() {
            next.goal_amount = positive_amount("goalAmount", input.goal_amount)?;
        }
        let raised_correction = non_negative("raisedAmount", input.raised_amount)?;
        if let Some(raised) = raised_correction {
            next.raised_amount = raised;
        }
        if let Some(backers) = input.backers_count {
            if backers < 0 {
                return Err(AppError::validation("backersCount cannot be negative"));
            }
            next.backers_count = backers;
        }
        if let Some(n) = input.expected_beneficiaries {
            if n <= 0 {
                return Err(AppError::validation(
                    "expectedBeneficiaries must be greater than 0",
                ));
            }
            next.expected_beneficiaries = n;
        }
        if let Some(start) = input.start_date {
            next.start_date = start;
        }
        if let Some(end) = input.end_date {
            next.end_date = end;
        }
        if let Some(v) = input.tax_deductible {
            next.tax_deductible = v;
        }
        if let Some(v) = input.secure_payment {
            next.secure_payment = v;
        }
        if let Some(v) = input.transparent_reporting {
            next.transparent_reporting = v;
        }
        if let Some(status) = input.status {
            next.status = current.status.transition(status)?;
        }
        if let Some(milestones) = input.milestones {
            next.milestones = milestones;
        }
        let now = Utc::now();
        next.updated_at = now;
        let explicit = input.featured_image.clone();
        let settle = |next: &mut Campaign, images: Vec<String>| -> Result<()> {
            next.images = normalize_images(images, &placeholder);
            // Without an explicit choice the role goes to the new first image.
            next.featured_image = resolve_featured(&next.images, &[explicit.as_deref()]);
            next.rederive(&placeholder, now);
            next.ensure_consistent()
        };
        // Reject a bad edit before any binary reaches the store.
        settle(&mut next, images.clone())?;

        let mut warnings = Vec::new();
        for (upload, outcome) in input
            .uploads
            .iter()
            .zip(self.assets.upload_many(&input.uploads).await)
        {
            match outcome {
                Ok(url) => images.push(url),
                Err(e) => {
                    warn!("Upload of '{}' for campaign {id} failed: {e}", upload.file_name);
                    warnings.push(format!(
                        "Image '{}' could not be stored and was skipped: {e}",
                        upload.file_name
                    ));
                }
            }
        }
        settle(&mut next, images)?;

        let saved = db::update_campaign(&self.pool, &next, raised_correction, input.backers_count)
            .await?
            .ok_or_else(|| not_found(id))?;
        info!("Campaign {id} updated");

        let orphaned: Vec<String> = current
            .images
            .iter()
            .filter(|u| **u != placeholder && !saved.images.contains(u) && removed.contains(u))
            .cloned()
            .collect();
        self.release_assets(orphaned);

        Ok(Saved {
            campaign: saved,
            warnings,
        })
    }

    /// Hard delete. Stored images are left in place.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if !db::delete_campaign(&self.pool, id).await? {
            return Err(not_found(id));
        }
        info!("Campaign {id} deleted");
        Ok(())
    }

    /// Detached, best-effort removal of blobs no campaign references anymore.
    fn release_assets(&self, urls: Vec<String>) {
        if urls.is_empty() {
            return;
        }
        let pool = self.pool.clone();
        let assets = self.assets.clone();
        tokio::spawn(async move {
            for url in urls {
                match db::image_in_use(&pool, &url).await {
                    Ok(false) => {}
                    Ok(true) => continue,
                    Err(e) => {
                        warn!("Skipping deletion of {url}: could not check references: {e}");
                        continue;
                    }
                }
                if !assets.delete(&url).await {
                    warn!("Asset {url} could not be deleted and is now orphaned");
                }
            }
        });
    }

    // ── Donations ────────────────────────────────────────

    /// Atomically add one donation of `amount` to a campaign.
    pub async fn record_donation(&self, id: &str, amount: f64) -> Result<Campaign> {
        let amount = positive_amount("amount", Some(amount))?;
        let mut campaign = db::record_donation(&self.pool, id, amount)
            .await?
            .ok_or_else(|| not_found(id))?;
        campaign.refresh_days_left(Utc::now());
        info!(
            "Campaign {id} received {amount} (raised {}, {}%)",
            campaign.raised_amount, campaign.progress
        );
        Ok(campaign)
    }

    /// Apply a payment whose signature has already been verified.
    pub async fn credit_verified_payment(&self, payment: &VerifiedPayment) -> Result<CreditOutcome> {
        positive_amount("amount", Some(payment.amount))?;
        db::credit_payment(&self.pool, payment).await
    }

    pub async fn unattributed_payments(&self) -> Result<Vec<PaymentRecord>> {
        db::payments_with_status(&self.pool, "unattributed").await
    }
}

fn not_found(id: &str) -> AppError {
    AppError::not_found(format!("Campaign {id} not found"))
}

fn check_uploads(uploads: &[Upload]) -> Result<()> {
    for up in uploads {
        if !up.content_type.starts_with("image/") {
            return Err(AppError::validation(format!(
                "'{}' is not an image ({})",
                up.file_name, up.content_type
            )));
        }
    }
    Ok(())
}

fn positive_amount(field: &str, value: Option<f64>) -> Result<f64> {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(AppError::validation(format!("{field} must be greater than 0"))),
    }
}

fn non_negative(field: &str, value: Option<f64>) -> Result<Option<f64>> {
    match value {
        Some(v) if !(v.is_finite() && v >= 0.0) => {
            Err(AppError::validation(format!("{field} cannot be negative")))
        }
        other => Ok(other),
    }
}

fn set_text(slot: &mut String, value: Option<String>, field: &str) -> Result<()> {
    match value {
        None => Ok(()),
        Some(v) if v.trim().is_empty() => {
            Err(AppError::validation(format!("{field} cannot be empty")))
        }
        Some(v) => {
            *slot = v;
            Ok(())
        }
    }
}
