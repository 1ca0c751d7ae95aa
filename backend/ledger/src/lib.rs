//! # Donation Ledger
//!
//! Campaign running totals and the append-only donation ledger behind a
//! fundraising platform.
//!
//! | Concern          | Module          | Entry point(s)                                   |
//! |------------------|-----------------|--------------------------------------------------|
//! | Donation writes  | [`ledger`]      | [`Ledger::record_donation`], [`Ledger::record_request`] |
//! | Statistics       | [`stats`]       | [`stats::compute_stats`], [`stats::campaign_progress`] |
//! | Reconciliation   | [`stats`], [`reconciler`] | [`stats::reconcile`], [`reconciler::run`] |
//! | Campaigns        | [`campaigns`]   | create / get / list / update / close / delete    |
//!
//! Storage is SQLite through [`sqlx`]; [`db`] holds every statement. Amounts
//! are integer minor units ([`money`]). Caller identities arrive
//! pre-authenticated as opaque strings.

pub mod campaigns;
pub mod config;
pub mod db;
pub mod errors;
pub mod ledger;
pub mod models;
pub mod money;
pub mod reconciler;
pub mod stats;

#[cfg(test)]
mod test_ledger;

pub use config::{Config, WriteMode};
pub use errors::{LedgerError, Result};
pub use ledger::Ledger;
pub use models::{
    Campaign, CampaignProgress, CampaignStats, CampaignStatus, CampaignUpdate, Donation,
    DonationMetadata, DonationReceipt, DonationRequest, DonationStatus, NewCampaign,
    RecentDonation,
};
pub use stats::Reconciliation;
