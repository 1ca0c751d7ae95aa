//! Database layer: pool set-up, migrations, and the storage primitives the
//! ledger is built on.
//!
//! | Primitive                | Used by                         |
//! |--------------------------|---------------------------------|
//! | [`increment_raised`]     | atomic counter + feed update    |
//! | [`insert_donation`]      | append-only ledger insert       |
//! | `fetch_*`                | find-by-filter with sort/limit  |
//! | [`aggregate_donations`]  | SUM/COUNT/MAX aggregation       |
//! | [`payment_method_counts`]| GROUP BY histogram              |
//!
//! Helpers that take part in a donation write are generic over
//! [`sqlx::Executor`] so the same statements run against the pool or inside
//! a transaction.

use std::collections::BTreeMap;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::info;

use crate::errors::{LedgerError, Result};
use crate::models::{Campaign, CampaignStatus, CampaignUpdate, Donation, RecentDonation};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Make sure the file is created if it doesn't exist yet.
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied successfully");
    Ok(())
}

/// Current wall-clock time in Unix seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ─────────────────────────────────────────────────────────
// Campaign rows
// ─────────────────────────────────────────────────────────

const CAMPAIGN_COLUMNS: &str = "id, title, description, category, target_amount, raised_amount, \
     status, owner_id, end_date, cover_image, payment_details, recent_donations, \
     created_at, updated_at";

/// Campaign as stored. The feed is kept oldest-first so the increment can
/// append with `$[#]`; [`Campaign`] exposes it newest-first.
#[derive(sqlx::FromRow)]
struct CampaignRow {
    id: String,
    title: String,
    description: String,
    category: String,
    target_amount: i64,
    raised_amount: i64,
    status: CampaignStatus,
    owner_id: String,
    end_date: Option<i64>,
    cover_image: Option<String>,
    payment_details: String,
    recent_donations: String,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = LedgerError;

    fn try_from(row: CampaignRow) -> Result<Self> {
        let mut recent_donations: Vec<RecentDonation> =
            serde_json::from_str(&row.recent_donations)?;
        recent_donations.reverse();

        Ok(Campaign {
            id: row.id,
            title: row.title,
            description: row.description,
            category: row.category,
            target_amount: row.target_amount,
            raised_amount: row.raised_amount,
            status: row.status,
            owner_id: row.owner_id,
            end_date: row.end_date,
            cover_image: row.cover_image,
            payment_details: serde_json::from_str(&row.payment_details)?,
            recent_donations,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Ownership and status of a campaign, without decoding the whole row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CampaignHead {
    pub owner_id: String,
    pub status: CampaignStatus,
    pub raised_amount: i64,
}

/// Stored total next to the ledger-derived total for one campaign.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CampaignTotals {
    pub campaign_id: String,
    pub stored_raised: i64,
    pub ledger_total: i64,
}

// ─────────────────────────────────────────────────────────
// Campaign writes
// ─────────────────────────────────────────────────────────

pub async fn insert_campaign(pool: &SqlitePool, campaign: &Campaign) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO campaigns
            (id, title, description, category, target_amount, raised_amount, status,
             owner_id, end_date, cover_image, payment_details, recent_donations,
             created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, '[]', ?12, ?13)
        "#,
    )
    .bind(&campaign.id)
    .bind(&campaign.title)
    .bind(&campaign.description)
    .bind(&campaign.category)
    .bind(campaign.target_amount)
    .bind(campaign.raised_amount)
    .bind(campaign.status)
    .bind(&campaign.owner_id)
    .bind(campaign.end_date)
    .bind(&campaign.cover_image)
    .bind(serde_json::to_string(&campaign.payment_details)?)
    .bind(campaign.created_at)
    .bind(campaign.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// Apply an owner's descriptive edits. Returns the number of rows touched,
/// which is zero when the campaign is missing or owned by someone else.
pub async fn update_campaign_fields(
    pool: &SqlitePool,
    id: &str,
    owner_id: &str,
    update: &CampaignUpdate,
    now: i64,
) -> Result<u64> {
    let payment_details = update
        .payment_details
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let rows_affected = sqlx::query(
        r#"
        UPDATE campaigns
        SET    title           = COALESCE(?1, title),
               description     = COALESCE(?2, description),
               category        = COALESCE(?3, category),
               target_amount   = COALESCE(?4, target_amount),
               end_date        = COALESCE(?5, end_date),
               cover_image     = COALESCE(?6, cover_image),
               payment_details = COALESCE(?7, payment_details),
               updated_at      = ?8
        WHERE  id = ?9 AND owner_id = ?10
        "#,
    )
    .bind(&update.title)
    .bind(&update.description)
    .bind(&update.category)
    .bind(update.target_amount)
    .bind(update.end_date)
    .bind(&update.cover_image)
    .bind(payment_details)
    .bind(now)
    .bind(id)
    .bind(owner_id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows_affected)
}

pub async fn set_campaign_status(
    pool: &SqlitePool,
    id: &str,
    owner_id: &str,
    status: CampaignStatus,
    now: i64,
) -> Result<u64> {
    let rows_affected = sqlx::query(
        "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3 AND owner_id = ?4",
    )
    .bind(status)
    .bind(now)
    .bind(id)
    .bind(owner_id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows_affected)
}

/// Delete a campaign owned by `owner_id` that no ledger entry references.
/// The reference check and the delete are one statement.
pub async fn delete_unreferenced_campaign(
    pool: &SqlitePool,
    id: &str,
    owner_id: &str,
) -> Result<u64> {
    let rows_affected = sqlx::query(
        r#"
        DELETE FROM campaigns
        WHERE  id = ?1
          AND  owner_id = ?2
          AND  NOT EXISTS (SELECT 1 FROM donations WHERE campaign_id = ?1)
        "#,
    )
    .bind(id)
    .bind(owner_id)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows_affected)
}

// ─────────────────────────────────────────────────────────
// Campaign reads
// ─────────────────────────────────────────────────────────

pub async fn fetch_campaign(pool: &SqlitePool, id: &str) -> Result<Option<Campaign>> {
    let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = ?1");
    sqlx::query_as::<_, CampaignRow>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .map(Campaign::try_from)
        .transpose()
}

pub async fn fetch_campaign_head<'e, E>(executor: E, id: &str) -> Result<Option<CampaignHead>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let head = sqlx::query_as::<_, CampaignHead>(
        "SELECT owner_id, status, raised_amount FROM campaigns WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(executor)
    .await?;
    Ok(head)
}

/// Active campaigns, newest first.
pub async fn fetch_active_campaigns(pool: &SqlitePool) -> Result<Vec<Campaign>> {
    let sql = format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE status = 'active' \
         ORDER BY created_at DESC, rowid DESC"
    );
    sqlx::query_as::<_, CampaignRow>(&sql)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(Campaign::try_from)
        .collect()
}

/// Every campaign owned by `owner_id`, newest first.
pub async fn fetch_owner_campaigns(pool: &SqlitePool, owner_id: &str) -> Result<Vec<Campaign>> {
    let sql = format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE owner_id = ?1 \
         ORDER BY created_at DESC, rowid DESC"
    );
    sqlx::query_as::<_, CampaignRow>(&sql)
        .bind(owner_id)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(Campaign::try_from)
        .collect()
}

/// Stored `raised_amount` next to the completed-ledger sum. Both come from
/// one statement, so they describe the same snapshot.
const CAMPAIGN_TOTALS: &str = r#"
    SELECT c.id                          AS campaign_id,
           c.raised_amount               AS stored_raised,
           CAST(COALESCE(
               (SELECT SUM(d.amount)
                FROM   donations d
                WHERE  d.campaign_id = c.id AND d.status = 'completed'),
               0) AS INTEGER)            AS ledger_total
    FROM   campaigns c
"#;

pub async fn fetch_campaign_total(pool: &SqlitePool, id: &str) -> Result<Option<CampaignTotals>> {
    let sql = format!("{CAMPAIGN_TOTALS} WHERE c.id = ?1");
    let row = sqlx::query_as::<_, CampaignTotals>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Totals for every campaign, oldest first.
pub async fn fetch_campaign_totals(pool: &SqlitePool) -> Result<Vec<CampaignTotals>> {
    let sql = format!("{CAMPAIGN_TOTALS} ORDER BY c.created_at ASC, c.rowid ASC");
    let rows = sqlx::query_as::<_, CampaignTotals>(&sql)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Ledger writes
// ─────────────────────────────────────────────────────────

/// Atomically add `amount` to an active campaign's running total, append
/// `summary` to its recent-activity feed (keeping the newest `feed_limit`
/// entries) and touch `updated_at`, all in one statement.
///
/// Returns the new total, or `None` when no active campaign matched.
pub async fn increment_raised<'e, E>(
    executor: E,
    campaign_id: &str,
    amount: i64,
    summary: &RecentDonation,
    feed_limit: u32,
    now: i64,
) -> Result<Option<i64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let summary = serde_json::to_string(summary)?;

    let raised = sqlx::query_scalar::<_, i64>(
        r#"
        UPDATE campaigns
        SET    raised_amount    = raised_amount + ?1,
               updated_at       = ?2,
               recent_donations = (
                   SELECT json_group_array(json(value))
                   FROM   json_each(json_insert(campaigns.recent_donations, '$[#]', json(?3)))
                   WHERE  key >= json_array_length(campaigns.recent_donations) + 1 - ?4
               )
        WHERE  id = ?5 AND status = 'active'
        RETURNING raised_amount
        "#,
    )
    .bind(amount)
    .bind(now)
    .bind(summary)
    .bind(i64::from(feed_limit))
    .bind(campaign_id)
    .fetch_optional(executor)
    .await?;
    Ok(raised)
}

/// Append a ledger entry. A clash on the per-campaign transaction reference
/// index is reported as [`LedgerError::DuplicateTransaction`].
pub async fn insert_donation<'e, E>(executor: E, donation: &Donation) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let inserted = sqlx::query(
        r#"
        INSERT INTO donations
            (id, campaign_id, donor_id, amount, payment_method, status,
             transaction_ref, message, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
    )
    .bind(&donation.id)
    .bind(&donation.campaign_id)
    .bind(&donation.donor_id)
    .bind(donation.amount)
    .bind(&donation.payment_method)
    .bind(donation.status)
    .bind(&donation.transaction_ref)
    .bind(&donation.message)
    .bind(donation.created_at)
    .execute(executor)
    .await;

    match inserted {
        Ok(_) => Ok(()),
        Err(e) if is_transaction_ref_clash(&e) => Err(LedgerError::DuplicateTransaction {
            campaign_id: donation.campaign_id.clone(),
            transaction_ref: donation.transaction_ref.clone().unwrap_or_default(),
        }),
        Err(e) => Err(e.into()),
    }
}

fn is_transaction_ref_clash(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(e) = err else {
        return false;
    };
    e.is_unique_violation() && e.message().contains("transaction_ref")
}

pub async fn transaction_ref_exists<'e, E>(
    executor: E,
    campaign_id: &str,
    transaction_ref: &str,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let exists = sqlx::query_scalar::<_, i64>(
        "SELECT EXISTS (SELECT 1 FROM donations WHERE campaign_id = ?1 AND transaction_ref = ?2)",
    )
    .bind(campaign_id)
    .bind(transaction_ref)
    .fetch_one(executor)
    .await?;
    Ok(exists != 0)
}

// ─────────────────────────────────────────────────────────
// Ledger reads
// ─────────────────────────────────────────────────────────

const DONATION_COLUMNS: &str = "id, campaign_id, donor_id, amount, payment_method, status, \
     transaction_ref, message, created_at";

pub async fn fetch_donation(pool: &SqlitePool, id: &str) -> Result<Option<Donation>> {
    let sql = format!("SELECT {DONATION_COLUMNS} FROM donations WHERE id = ?1");
    let donation = sqlx::query_as::<_, Donation>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(donation)
}

/// All ledger entries for a campaign, newest first.
pub async fn fetch_campaign_donations(
    pool: &SqlitePool,
    campaign_id: &str,
) -> Result<Vec<Donation>> {
    let sql = format!(
        "SELECT {DONATION_COLUMNS} FROM donations WHERE campaign_id = ?1 \
         ORDER BY created_at DESC, rowid DESC"
    );
    let rows = sqlx::query_as::<_, Donation>(&sql)
        .bind(campaign_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// All ledger entries attributed to a donor, newest first.
pub async fn fetch_donor_donations(pool: &SqlitePool, donor_id: &str) -> Result<Vec<Donation>> {
    let sql = format!(
        "SELECT {DONATION_COLUMNS} FROM donations WHERE donor_id = ?1 \
         ORDER BY created_at DESC, rowid DESC"
    );
    let rows = sqlx::query_as::<_, Donation>(&sql)
        .bind(donor_id)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// `(sum, count, max)` over a campaign's completed donations; zeros when
/// there are none.
pub async fn aggregate_donations(pool: &SqlitePool, campaign_id: &str) -> Result<(i64, i64, i64)> {
    let row = sqlx::query_as::<_, (i64, i64, i64)>(
        r#"
        SELECT CAST(COALESCE(SUM(amount), 0) AS INTEGER),
               COUNT(*),
               CAST(COALESCE(MAX(amount), 0) AS INTEGER)
        FROM   donations
        WHERE  campaign_id = ?1 AND status = 'completed'
        "#,
    )
    .bind(campaign_id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Completed donations per payment method.
pub async fn payment_method_counts(
    pool: &SqlitePool,
    campaign_id: &str,
) -> Result<BTreeMap<String, i64>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT payment_method, COUNT(*)
        FROM   donations
        WHERE  campaign_id = ?1 AND status = 'completed'
        GROUP  BY payment_method
        "#,
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().collect())
}

// ─────────────────────────────────────────────────────────
// Test support
// ─────────────────────────────────────────────────────────

/// Fresh in-memory database with migrations applied. One connection, so
/// every handle sees the same database.
#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("failed to create in-memory pool");
    migrate(&pool).await.expect("failed to apply migrations");
    pool
}
