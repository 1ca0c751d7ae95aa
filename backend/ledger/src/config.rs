//! Application configuration loaded from environment variables.

use std::str::FromStr;

use crate::errors::{LedgerError, Result};

/// How the ledger writer sequences its two writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Counter increment and ledger insert are independent statements.
    /// A failure between them is left for reconciliation to find.
    #[default]
    Sequential,
    /// Both writes share one storage transaction.
    Transactional,
}

impl FromStr for WriteMode {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "transactional" => Ok(Self::Transactional),
            other => Err(LedgerError::Config(format!(
                "Invalid LEDGER_WRITE_MODE: {other} (expected sequential or transactional)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL (e.g. sqlite:./donations.db)
    pub database_url: String,
    /// Upper bound on pooled connections
    pub max_connections: u32,
    /// Ledger writer sequencing
    pub write_mode: WriteMode,
    /// How many recent donations a campaign keeps embedded
    pub recent_donations_limit: u32,
    /// How often (in seconds) the reconciliation job runs
    pub reconcile_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let config = Config {
            database_url: var("DATABASE_URL", "sqlite:./donations.db"),
            max_connections: var("DB_MAX_CONNECTIONS", "5")
                .parse()
                .map_err(|_| LedgerError::Config("Invalid DB_MAX_CONNECTIONS".to_string()))?,
            write_mode: var("LEDGER_WRITE_MODE", "sequential").parse()?,
            recent_donations_limit: var("RECENT_DONATIONS_LIMIT", "10")
                .parse()
                .map_err(|_| LedgerError::Config("Invalid RECENT_DONATIONS_LIMIT".to_string()))?,
            reconcile_interval_secs: var("RECONCILE_INTERVAL_SECS", "300")
                .parse()
                .map_err(|_| LedgerError::Config("Invalid RECONCILE_INTERVAL_SECS".to_string()))?,
        };

        if config.max_connections == 0 {
            return Err(LedgerError::Config(
                "DB_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }
        if config.recent_donations_limit == 0 {
            return Err(LedgerError::Config(
                "RECENT_DONATIONS_LIMIT must be at least 1".to_string(),
            ));
        }
        if config.reconcile_interval_secs == 0 {
            return Err(LedgerError::Config(
                "RECONCILE_INTERVAL_SECS must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}
