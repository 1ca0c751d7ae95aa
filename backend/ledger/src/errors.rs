//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Campaign {0} is closed to donations")]
    CampaignClosed(String),

    #[error("Transaction {transaction_ref} already recorded for campaign {campaign_id}")]
    DuplicateTransaction {
        campaign_id: String,
        transaction_ref: String,
    },

    #[error("Caller {caller} does not own campaign {campaign_id}")]
    Unauthorized { campaign_id: String, caller: String },

    #[error("Campaign {0} still has donations in the ledger")]
    CampaignHasDonations(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The campaign counter and the ledger disagree for `campaign_id`.
    #[error("Partial write on campaign {campaign_id}: {detail}")]
    PartialWriteInconsistency { campaign_id: String, detail: String },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    pub(crate) fn campaign_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "campaign",
            id: id.to_string(),
        }
    }

    pub(crate) fn donation_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "donation",
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
