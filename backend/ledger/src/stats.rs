//! Aggregate reader: statistics derived from the ledger, the maintained
//! running totals, and reconciliation between the two.
//!
//! Reconciliation never corrects anything. A campaign whose stored
//! `raised_amount` differs from its completed-ledger sum is reported so an
//! operator can investigate the partial write behind it. Amounts are integer
//! minor units, so the comparison is exact.

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;

use crate::db::{self, CampaignTotals};
use crate::errors::{LedgerError, Result};
use crate::models::{CampaignProgress, CampaignStats, Donation};
use crate::money;

/// Statistics over a campaign's completed donations. Unknown campaigns and
/// campaigns without donations both yield zeroed stats.
pub async fn compute_stats(pool: &SqlitePool, campaign_id: &str) -> Result<CampaignStats> {
    let (total_amount, donation_count, highest_donation) =
        db::aggregate_donations(pool, campaign_id).await?;
    if donation_count == 0 {
        return Ok(CampaignStats::default());
    }

    let payment_methods = db::payment_method_counts(pool, campaign_id).await?;

    Ok(CampaignStats {
        total_amount,
        donation_count,
        average_amount: rounded_mean(total_amount, donation_count),
        highest_donation,
        payment_methods,
    })
}

/// Progress through the maintained running total.
pub async fn campaign_progress(pool: &SqlitePool, campaign_id: &str) -> Result<CampaignProgress> {
    let campaign = db::fetch_campaign(pool, campaign_id)
        .await?
        .ok_or_else(|| LedgerError::campaign_not_found(campaign_id))?;
    let (_, donation_count, _) = db::aggregate_donations(pool, campaign_id).await?;

    let percentage_raised = if campaign.target_amount > 0 {
        let ratio = campaign.raised_amount as f64 / campaign.target_amount as f64;
        (ratio * 10_000.0).round() / 100.0
    } else {
        0.0
    };

    Ok(CampaignProgress {
        campaign_id: campaign.id,
        total_raised: campaign.raised_amount,
        target_amount: campaign.target_amount,
        donation_count,
        percentage_raised,
    })
}

pub async fn get_donation(pool: &SqlitePool, id: &str) -> Result<Donation> {
    db::fetch_donation(pool, id)
        .await?
        .ok_or_else(|| LedgerError::donation_not_found(id))
}

/// Every ledger entry of a campaign, newest first.
pub async fn list_campaign_donations(
    pool: &SqlitePool,
    campaign_id: &str,
) -> Result<Vec<Donation>> {
    db::fetch_campaign_donations(pool, campaign_id).await
}

/// Every ledger entry attributed to a donor, newest first.
pub async fn list_donor_donations(pool: &SqlitePool, donor_id: &str) -> Result<Vec<Donation>> {
    db::fetch_donor_donations(pool, donor_id).await
}

// ─────────────────────────────────────────────────────────
// Reconciliation
// ─────────────────────────────────────────────────────────

/// Stored running total compared with the ledger-derived total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub campaign_id: String,
    pub stored_raised: i64,
    pub ledger_total: i64,
    /// `stored_raised - ledger_total`; positive when the counter ran ahead
    /// of the ledger.
    pub drift: i64,
}

impl Reconciliation {
    fn new(campaign_id: String, stored_raised: i64, ledger_total: i64) -> Self {
        Self {
            campaign_id,
            stored_raised,
            ledger_total,
            drift: stored_raised - ledger_total,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.drift == 0
    }

    /// Turn detected drift into [`LedgerError::PartialWriteInconsistency`].
    pub fn ensure_consistent(self) -> Result<Self> {
        if self.is_consistent() {
            return Ok(self);
        }
        Err(LedgerError::PartialWriteInconsistency {
            detail: format!(
                "stored raised_amount {} differs from ledger total {} by {}",
                money::format_minor(self.stored_raised),
                money::format_minor(self.ledger_total),
                money::format_minor(self.drift)
            ),
            campaign_id: self.campaign_id,
        })
    }
}

impl From<CampaignTotals> for Reconciliation {
    fn from(totals: CampaignTotals) -> Self {
        Self::new(totals.campaign_id, totals.stored_raised, totals.ledger_total)
    }
}

/// Reconcile one campaign. Both totals are read in a single statement.
pub async fn reconcile(pool: &SqlitePool, campaign_id: &str) -> Result<Reconciliation> {
    let report: Reconciliation = db::fetch_campaign_total(pool, campaign_id)
        .await?
        .ok_or_else(|| LedgerError::campaign_not_found(campaign_id))?
        .into();

    if !report.is_consistent() {
        warn!(
            "Campaign {} drifted: stored {} vs ledger {} (drift {})",
            report.campaign_id,
            money::format_minor(report.stored_raised),
            money::format_minor(report.ledger_total),
            money::format_minor(report.drift)
        );
    }
    Ok(report)
}

/// Reconcile every campaign in one pass.
pub async fn reconcile_all(pool: &SqlitePool) -> Result<Vec<Reconciliation>> {
    let reports = db::fetch_campaign_totals(pool)
        .await?
        .into_iter()
        .map(Reconciliation::from)
        .collect();
    Ok(reports)
}

/// Mean of non-negative `total` over `count` entries, rounded half up.
fn rounded_mean(total: i64, count: i64) -> i64 {
    (total + count / 2) / count
}
