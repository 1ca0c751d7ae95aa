//! Ledger writer: records a donation as an immutable ledger entry and moves
//! the owning campaign's running total.
//!
//! ## Write ordering
//!
//! A completed donation is two writes, always in this order:
//!
//! 1. [`db::increment_raised`] bumps `raised_amount` in place and pushes a
//!    summary onto the recent-activity feed. If no active campaign matches,
//!    nothing else happens.
//! 2. [`db::insert_donation`] appends the ledger entry.
//!
//! In [`WriteMode::Sequential`] the two writes are independent. A failure in
//! step 2 leaves the counter ahead of the ledger; the writer reports it as
//! [`LedgerError::PartialWriteInconsistency`] and leaves recovery to
//! reconciliation (see [`crate::stats::reconcile`]). No compensating write
//! is ever issued. In [`WriteMode::Transactional`] both steps share one
//! transaction and a failure rolls back the counter.

use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::{Config, WriteMode};
use crate::db;
use crate::errors::{LedgerError, Result};
use crate::models::{
    CampaignStatus, Donation, DonationMetadata, DonationReceipt, DonationRequest, DonationStatus,
};
use crate::money::{self, MINOR_PER_MAJOR};

/// Largest amount a single donation may carry, in minor units.
pub const MAX_DONATION_AMOUNT: i64 = 1_000_000_000_000 * MINOR_PER_MAJOR;

/// Payment method recorded when the caller supplies none.
pub const DEFAULT_PAYMENT_METHOD: &str = "online";

#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
    write_mode: WriteMode,
    feed_limit: u32,
}

impl Ledger {
    pub fn new(pool: SqlitePool, write_mode: WriteMode, feed_limit: u32) -> Self {
        Self {
            pool,
            write_mode,
            feed_limit: feed_limit.max(1),
        }
    }

    pub fn from_config(pool: SqlitePool, config: &Config) -> Self {
        Self::new(pool, config.write_mode, config.recent_donations_limit)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Record a caller-submitted donation whose amount has not been parsed
    /// yet.
    pub async fn record_request(
        &self,
        campaign_id: &str,
        donor_id: Option<&str>,
        request: DonationRequest,
    ) -> Result<DonationReceipt> {
        let amount = parse_amount(&request.amount)?;
        self.record_donation(campaign_id, amount, donor_id, request.metadata)
            .await
    }

    /// Append a donation of `amount` minor units to the ledger and, when it
    /// is completed, add it to the campaign's running total.
    pub async fn record_donation(
        &self,
        campaign_id: &str,
        amount: i64,
        donor_id: Option<&str>,
        metadata: DonationMetadata,
    ) -> Result<DonationReceipt> {
        let amount = validate_amount(amount)?;
        let donation = build_donation(campaign_id, amount, donor_id, metadata);

        if let Some(transaction_ref) = donation.transaction_ref.as_deref() {
            if db::transaction_ref_exists(&self.pool, campaign_id, transaction_ref).await? {
                return Err(LedgerError::DuplicateTransaction {
                    campaign_id: campaign_id.to_string(),
                    transaction_ref: transaction_ref.to_string(),
                });
            }
        }

        let raised_amount = if donation.status == DonationStatus::Completed {
            match self.write_mode {
                WriteMode::Sequential => self.write_sequential(&donation).await?,
                WriteMode::Transactional => self.write_transactional(&donation).await?,
            }
        } else {
            self.write_unsettled(&donation).await?
        };

        info!(
            "Recorded donation {} of {} to campaign {} ({}), total now {}",
            donation.id,
            money::format_minor(donation.amount),
            donation.campaign_id,
            donation.status.as_str(),
            money::format_minor(raised_amount)
        );

        Ok(DonationReceipt {
            donation,
            raised_amount,
        })
    }

    async fn write_sequential(&self, donation: &Donation) -> Result<i64> {
        let raised = db::increment_raised(
            &self.pool,
            &donation.campaign_id,
            donation.amount,
            &donation.summary(),
            self.feed_limit,
            donation.created_at,
        )
        .await?;

        let Some(raised) = raised else {
            return Err(self.rejection(&donation.campaign_id).await);
        };

        if let Err(e) = db::insert_donation(&self.pool, donation).await {
            let amount = money::format_minor(donation.amount);
            error!(
                "Campaign {} counter advanced by {amount}, ledger insert of {} failed: {e}",
                donation.campaign_id, donation.id
            );
            return Err(LedgerError::PartialWriteInconsistency {
                campaign_id: donation.campaign_id.clone(),
                detail: format!(
                    "raised_amount includes {amount} from donation {} missing from the ledger: {e}",
                    donation.id
                ),
            });
        }

        Ok(raised)
    }

    async fn write_transactional(&self, donation: &Donation) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let raised = db::increment_raised(
            &mut *tx,
            &donation.campaign_id,
            donation.amount,
            &donation.summary(),
            self.feed_limit,
            donation.created_at,
        )
        .await?;

        let Some(raised) = raised else {
            tx.rollback().await?;
            return Err(self.rejection(&donation.campaign_id).await);
        };

        db::insert_donation(&mut *tx, donation).await?;
        tx.commit().await?;
        Ok(raised)
    }

    /// Pending and failed donations are kept for audit but never counted.
    async fn write_unsettled(&self, donation: &Donation) -> Result<i64> {
        let head = db::fetch_campaign_head(&self.pool, &donation.campaign_id)
            .await?
            .ok_or_else(|| LedgerError::campaign_not_found(&donation.campaign_id))?;
        if head.status == CampaignStatus::Closed {
            return Err(LedgerError::CampaignClosed(donation.campaign_id.clone()));
        }

        db::insert_donation(&self.pool, donation).await?;
        Ok(head.raised_amount)
    }

    /// Explain why the counter update matched no row.
    async fn rejection(&self, campaign_id: &str) -> LedgerError {
        match db::fetch_campaign_head(&self.pool, campaign_id).await {
            Ok(Some(head)) if head.status == CampaignStatus::Closed => {
                LedgerError::CampaignClosed(campaign_id.to_string())
            }
            Ok(_) => LedgerError::campaign_not_found(campaign_id),
            Err(e) => e,
        }
    }
}

fn build_donation(
    campaign_id: &str,
    amount: i64,
    donor_id: Option<&str>,
    metadata: DonationMetadata,
) -> Donation {
    let payment_method = metadata
        .payment_method
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_PAYMENT_METHOD.to_string());

    Donation {
        id: Uuid::new_v4().to_string(),
        campaign_id: campaign_id.to_string(),
        donor_id: donor_id.map(String::from),
        amount,
        payment_method,
        status: metadata.status,
        transaction_ref: metadata.transaction_ref.filter(|t| !t.trim().is_empty()),
        message: metadata.message,
        created_at: db::unix_now(),
    }
}

/// Reject amounts (minor units) that are not positive or exceed
/// [`MAX_DONATION_AMOUNT`].
pub fn validate_amount(amount: i64) -> Result<i64> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "{} must be greater than 0",
            money::format_minor(amount)
        )));
    }
    if amount > MAX_DONATION_AMOUNT {
        return Err(LedgerError::InvalidAmount(format!(
            "{} exceeds the maximum of {}",
            money::format_minor(amount),
            money::format_minor(MAX_DONATION_AMOUNT)
        )));
    }
    Ok(amount)
}

/// Parse a caller-supplied amount in major units, a JSON number or a numeric
/// string, into validated minor units.
pub fn parse_amount(raw: &Value) -> Result<i64> {
    let amount = match raw {
        Value::Number(n) => money::parse_decimal(&n.to_string())?,
        Value::String(s) => money::parse_decimal(s)?,
        _ => return Err(LedgerError::InvalidAmount(format!("{raw} is not numeric"))),
    };

    debug!("Parsed donation amount {amount} from {raw}");
    validate_amount(amount)
}
