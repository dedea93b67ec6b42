//! Database layer: migrations, campaign queries and the credited-payment ledger.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use tracing::info;

use crate::campaign::{Campaign, CampaignStatus, Milestone};
use crate::errors::{AppError, Result};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Make sure the file is created if it doesn't exist yet.
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

/// Private in-memory database with the real schema.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

// ─────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────

const CAMPAIGN_COLUMNS: &str = "id, title, description, about, category, category_label, \
     location, organizer, goal_amount, raised_amount, backers_count, progress, start_date, \
     end_date, days_left, expected_beneficiaries, expected_duration, impact_description, \
     tax_deductible, secure_payment, transparent_reporting, images, featured_image, \
     milestones, status, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct CampaignRow {
    id: String,
    title: String,
    description: String,
    about: String,
    category: String,
    category_label: String,
    location: String,
    organizer: String,
    goal_amount: f64,
    raised_amount: f64,
    backers_count: i64,
    progress: i64,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    days_left: i64,
    expected_beneficiaries: i64,
    expected_duration: String,
    impact_description: String,
    tax_deductible: bool,
    secure_payment: bool,
    transparent_reporting: bool,
    images: String,
    featured_image: String,
    milestones: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = AppError;

    fn try_from(row: CampaignRow) -> Result<Self> {
        let images: Vec<String> = serde_json::from_str(&row.images)?;
        let milestones: Vec<Milestone> = serde_json::from_str(&row.milestones)?;
        let status = CampaignStatus::parse(&row.status).ok_or_else(|| {
            AppError::Database(sqlx::Error::Decode(
                format!("campaign {} has unknown status '{}'", row.id, row.status).into(),
            ))
        })?;

        Ok(Campaign {
            id: row.id,
            title: row.title,
            description: row.description,
            about: row.about,
            category: row.category,
            category_label: row.category_label,
            location: row.location,
            organizer: row.organizer,
            goal_amount: row.goal_amount,
            raised_amount: row.raised_amount,
            backers_count: row.backers_count,
            progress: row.progress,
            start_date: row.start_date,
            end_date: row.end_date,
            days_left: row.days_left,
            expected_beneficiaries: row.expected_beneficiaries,
            expected_duration: row.expected_duration,
            impact_description: row.impact_description,
            tax_deductible: row.tax_deductible,
            secure_payment: row.secure_payment,
            transparent_reporting: row.transparent_reporting,
            images,
            featured_image: row.featured_image,
            milestones,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// SQL twin of [`crate::campaign::compute_progress`]. `{raised}` and `{goal}`
/// must be the post-write values; SQLite evaluates every `SET` expression
/// against the old row.
const PROGRESS_FROM_ROW: &str =
    "MIN(100, MAX(0, CAST(ROUND(({raised}) * 100.0 / ({goal})) AS INTEGER)))";

fn progress_sql(raised: &str, goal: &str) -> String {
    PROGRESS_FROM_ROW
        .replace("{raised}", raised)
        .replace("{goal}", goal)
}

// ─────────────────────────────────────────────────────────
// Campaign writes
// ─────────────────────────────────────────────────────────

pub async fn insert_campaign(pool: &SqlitePool, c: &Campaign) -> Result<Campaign> {
    let sql = format!(
        "INSERT INTO campaigns ({CAMPAIGN_COLUMNS}) VALUES \
         (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, \
          ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27) \
         RETURNING {CAMPAIGN_COLUMNS}"
    );
    let row = sqlx::query_as::<_, CampaignRow>(&sql)
        .bind(&c.id)
        .bind(&c.title)
        .bind(&c.description)
        .bind(&c.about)
        .bind(&c.category)
        .bind(&c.category_label)
        .bind(&c.location)
        .bind(&c.organizer)
        .bind(c.goal_amount)
        .bind(c.raised_amount)
        .bind(c.backers_count)
        .bind(c.progress)
        .bind(c.start_date)
        .bind(c.end_date)
        .bind(c.days_left)
        .bind(c.expected_beneficiaries)
        .bind(&c.expected_duration)
        .bind(&c.impact_description)
        .bind(c.tax_deductible)
        .bind(c.secure_payment)
        .bind(c.transparent_reporting)
        .bind(serde_json::to_string(&c.images)?)
        .bind(&c.featured_image)
        .bind(serde_json::to_string(&c.milestones)?)
        .bind(c.status.as_str())
        .bind(c.created_at)
        .bind(c.updated_at)
        .fetch_one(pool)
        .await?;
    row.try_into()
}

/// Write an admin edit.
///
/// `raised_amount` and `backers_count` are only overwritten when the admin
/// explicitly corrects them (`Some`); otherwise the stored values win, so a
/// donation committed between the admin's read and this write is kept.
/// `progress` is recomputed in the same statement from the final values.
pub async fn update_campaign(
    pool: &SqlitePool,
    c: &Campaign,
    raised_correction: Option<f64>,
    backers_correction: Option<i64>,
) -> Result<Option<Campaign>> {
    let sql = format!(
        "UPDATE campaigns SET \
            title = ?2, description = ?3, about = ?4, category = ?5, category_label = ?6, \
            location = ?7, organizer = ?8, goal_amount = ?9, \
            raised_amount = COALESCE(?10, raised_amount), \
            backers_count = COALESCE(?11, backers_count), \
            progress = {progress}, \
            start_date = ?12, end_date = ?13, days_left = ?14, \
            expected_beneficiaries = ?15, expected_duration = ?16, impact_description = ?17, \
            tax_deductible = ?18, secure_payment = ?19, transparent_reporting = ?20, \
            images = ?21, featured_image = ?22, milestones = ?23, status = ?24, updated_at = ?25 \
         WHERE id = ?1 \
         RETURNING {CAMPAIGN_COLUMNS}",
        progress = progress_sql("COALESCE(?10, raised_amount)", "?9"),
    );
    let row = sqlx::query_as::<_, CampaignRow>(&sql)
        .bind(&c.id)
        .bind(&c.title)
        .bind(&c.description)
        .bind(&c.about)
        .bind(&c.category)
        .bind(&c.category_label)
        .bind(&c.location)
        .bind(&c.organizer)
        .bind(c.goal_amount)
        .bind(raised_correction)
        .bind(backers_correction)
        .bind(c.start_date)
        .bind(c.end_date)
        .bind(c.days_left)
        .bind(c.expected_beneficiaries)
        .bind(&c.expected_duration)
        .bind(&c.impact_description)
        .bind(c.tax_deductible)
        .bind(c.secure_payment)
        .bind(c.transparent_reporting)
        .bind(serde_json::to_string(&c.images)?)
        .bind(&c.featured_image)
        .bind(serde_json::to_string(&c.milestones)?)
        .bind(c.status.as_str())
        .bind(c.updated_at)
        .fetch_optional(pool)
        .await?;
    row.map(Campaign::try_from).transpose()
}

pub async fn delete_campaign(pool: &SqlitePool, id: &str) -> Result<bool> {
    let rows = sqlx::query("DELETE FROM campaigns WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?
        .rows_affected();
    Ok(rows > 0)
}

fn increment_sql() -> String {
    format!(
        "UPDATE campaigns SET \
            raised_amount = raised_amount + ?2, \
            backers_count = backers_count + 1, \
            progress = {progress}, \
            updated_at = ?3 \
         WHERE id = ?1 \
         RETURNING {CAMPAIGN_COLUMNS}",
        progress = progress_sql("raised_amount + ?2", "goal_amount"),
    )
}

/// Atomically add one donation to a campaign. The increment and the progress
/// recomputation happen in a single statement, so concurrent donors never
/// overwrite each other. Returns `None` when the campaign does not exist.
pub async fn record_donation(
    pool: &SqlitePool,
    id: &str,
    amount: f64,
) -> Result<Option<Campaign>> {
    let row = sqlx::query_as::<_, CampaignRow>(&increment_sql())
        .bind(id)
        .bind(amount)
        .bind(Utc::now())
        .fetch_optional(pool)
        .await?;
    row.map(Campaign::try_from).transpose()
}

// ─────────────────────────────────────────────────────────
// Campaign reads
// ─────────────────────────────────────────────────────────

pub async fn find_campaign(pool: &SqlitePool, id: &str) -> Result<Option<Campaign>> {
    let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1");
    let row = sqlx::query_as::<_, CampaignRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(Campaign::try_from).transpose()
}

/// All campaigns, most recently created first.
pub async fn list_campaigns(pool: &SqlitePool) -> Result<Vec<Campaign>> {
    let sql = format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaigns ORDER BY created_at DESC, rowid DESC"
    );
    let rows = sqlx::query_as::<_, CampaignRow>(&sql)
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(Campaign::try_from).collect()
}

/// Whether any campaign still lists `url` among its images. Content-addressed
/// stores hand identical bytes the same URL, so one blob can back several
/// campaigns.
pub async fn image_in_use(pool: &SqlitePool, url: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT 1 FROM campaigns, json_each(campaigns.images) WHERE json_each.value = ?1 LIMIT 1",
    )
    .bind(url)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

// ─────────────────────────────────────────────────────────
// Credited-payment ledger
// ─────────────────────────────────────────────────────────

/// A verified payment, as read back from the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPayment {
    pub payment_id: String,
    pub order_id: String,
    pub campaign_id: Option<String>,
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreditOutcome {
    /// Campaign credited; holds its post-increment state.
    Credited(Campaign),
    /// No campaign targeted: recorded against the general fund.
    General,
    /// This payment was already recorded earlier; nothing changed.
    AlreadyRecorded { campaign: Option<Campaign> },
    /// The target campaign is gone; recorded for manual reconciliation.
    Unattributed,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub payment_id: String,
    pub order_id: String,
    pub campaign_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

const INSERT_PAYMENT: &str = r#"
    INSERT OR IGNORE INTO credited_payments
        (payment_id, order_id, campaign_id, amount, currency, status, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#;

/// Record a verified payment and apply it to its campaign in one transaction.
///
/// The ledger row is keyed by payment id (and order id), so replaying the
/// same verified callback cannot credit a campaign twice.
pub async fn credit_payment(pool: &SqlitePool, p: &VerifiedPayment) -> Result<CreditOutcome> {
    let now = Utc::now();
    let status = if p.campaign_id.is_some() {
        "credited"
    } else {
        "general"
    };

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(INSERT_PAYMENT)
        .bind(&p.payment_id)
        .bind(&p.order_id)
        .bind(&p.campaign_id)
        .bind(p.amount)
        .bind(&p.currency)
        .bind(status)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if inserted == 0 {
        tx.rollback().await?;
        let campaign = match &p.campaign_id {
            Some(id) => find_campaign(pool, id).await?,
            None => None,
        };
        return Ok(CreditOutcome::AlreadyRecorded { campaign });
    }

    let Some(campaign_id) = &p.campaign_id else {
        tx.commit().await?;
        return Ok(CreditOutcome::General);
    };

    let row = sqlx::query_as::<_, CampaignRow>(&increment_sql())
        .bind(campaign_id)
        .bind(p.amount)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

    match row {
        Some(row) => {
            tx.commit().await?;
            Ok(CreditOutcome::Credited(row.try_into()?))
        }
        None => {
            tx.rollback().await?;
            sqlx::query(INSERT_PAYMENT)
                .bind(&p.payment_id)
                .bind(&p.order_id)
                .bind(campaign_id)
                .bind(p.amount)
                .bind(&p.currency)
                .bind("unattributed")
                .bind(now)
                .execute(pool)
                .await?;
            Ok(CreditOutcome::Unattributed)
        }
    }
}

pub async fn payments_with_status(pool: &SqlitePool, status: &str) -> Result<Vec<PaymentRecord>> {
    let rows = sqlx::query_as::<_, PaymentRecord>(
        r#"
        SELECT payment_id, order_id, campaign_id, amount, currency, status, created_at
        FROM   credited_payments
        WHERE  status = ?1
        ORDER  BY created_at ASC
        "#,
    )
    .bind(status)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
