//! Campaign and donation records, plus the request/response shapes the
//! ledger exchanges with its callers.
//!
//! Amounts are integer minor units (paise); see [`crate::money`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Campaign lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Accepting donations.
    Active,
    /// Closed by its owner; the ledger stays readable.
    Closed,
}

/// Settlement status of a single donation.
///
/// Only `Completed` donations move a campaign's running total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DonationStatus {
    #[default]
    Completed,
    Pending,
    Failed,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Pending => "pending",
            Self::Failed => "failed",
        }
    }
}

/// Summary of a donation embedded in its campaign's recent-activity feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentDonation {
    pub donation_id: String,
    pub donor_id: Option<String>,
    pub amount: i64,
    pub payment_method: String,
    pub created_at: i64,
}

/// A fundraising campaign together with its maintained running totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub target_amount: i64,
    pub raised_amount: i64,
    pub status: CampaignStatus,
    pub owner_id: String,
    pub end_date: Option<i64>,
    pub cover_image: Option<String>,
    pub payment_details: Value,
    /// Newest first, bounded by the configured feed limit.
    pub recent_donations: Vec<RecentDonation>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Donation {
    pub id: String,
    pub campaign_id: String,
    /// `None` for anonymous donations.
    pub donor_id: Option<String>,
    pub amount: i64,
    pub payment_method: String,
    pub status: DonationStatus,
    pub transaction_ref: Option<String>,
    pub message: Option<String>,
    pub created_at: i64,
}

impl Donation {
    pub(crate) fn summary(&self) -> RecentDonation {
        RecentDonation {
            donation_id: self.id.clone(),
            donor_id: self.donor_id.clone(),
            amount: self.amount,
            payment_method: self.payment_method.clone(),
            created_at: self.created_at,
        }
    }
}

/// Fields supplied by an owner creating a campaign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCampaign {
    pub title: String,
    pub description: String,
    pub category: String,
    pub target_amount: i64,
    #[serde(default)]
    pub end_date: Option<i64>,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub payment_details: Option<Value>,
}

/// Descriptive fields an owner may change. `None` leaves a field untouched.
/// `raised_amount` is absent: only the ledger writer moves it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub target_amount: Option<i64>,
    pub end_date: Option<i64>,
    pub cover_image: Option<String>,
    pub payment_details: Option<Value>,
}

/// Pass-through metadata attached to a donation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DonationMetadata {
    /// Free-form tag such as `UPI`, `cash` or `online`.
    pub payment_method: Option<String>,
    pub message: Option<String>,
    /// Client-supplied idempotency key; unique per campaign when present.
    #[serde(alias = "transaction_id")]
    pub transaction_ref: Option<String>,
    #[serde(default)]
    pub status: DonationStatus,
}

/// A donation as submitted by a caller, before the amount is validated.
#[derive(Debug, Clone, Deserialize)]
pub struct DonationRequest {
    /// Raw amount in major units; a JSON number or a numeric string.
    pub amount: Value,
    #[serde(flatten)]
    pub metadata: DonationMetadata,
}

/// Outcome of a successful `record_donation`: the ledger entry and the
/// campaign total observed right after the write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DonationReceipt {
    pub donation: Donation,
    pub raised_amount: i64,
}

/// Statistics derived from a campaign's completed ledger entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total_amount: i64,
    pub donation_count: i64,
    /// Mean donation, rounded half up to the nearest minor unit.
    pub average_amount: i64,
    pub highest_donation: i64,
    pub payment_methods: BTreeMap<String, i64>,
}

/// Progress as seen through the maintained running total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub campaign_id: String,
    pub total_raised: i64,
    pub target_amount: i64,
    pub donation_count: i64,
    /// Two decimal places.
    pub percentage_raised: f64,
}
