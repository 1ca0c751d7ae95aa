//! Long-running background task that periodically reconciles every
//! campaign's running total against the ledger and reports drift.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::errors::Result;
use crate::money;
use crate::stats::{self, Reconciliation};

pub struct ReconcilerState {
    pub pool: SqlitePool,
    pub config: Config,
    pub shutdown: CancellationToken,
}

/// Run reconciliation passes until `state.shutdown` is cancelled.
pub async fn run(state: Arc<ReconcilerState>) {
    let interval = Duration::from_secs(state.config.reconcile_interval_secs);
    info!("Reconciler starting, one pass every {}s", interval.as_secs());

    loop {
        match reconcile_once(&state.pool).await {
            Ok(drifted) if drifted.is_empty() => {}
            Ok(drifted) => warn!("{} campaign(s) need operator attention", drifted.len()),
            Err(e) => error!("Reconciliation pass failed: {e}"),
        }

        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("Reconciler stopped");
}

/// Perform a single reconciliation pass.
///
/// Returns the campaigns whose stored total disagrees with the ledger.
pub async fn reconcile_once(pool: &SqlitePool) -> Result<Vec<Reconciliation>> {
    let mut drifted = stats::reconcile_all(pool).await?;
    let checked = drifted.len();
    drifted.retain(|r| !r.is_consistent());

    for report in &drifted {
        warn!(
            "Campaign {} drifted: stored {} vs ledger {} (drift {})",
            report.campaign_id,
            money::format_minor(report.stored_raised),
            money::format_minor(report.ledger_total),
            money::format_minor(report.drift)
        );
    }

    info!("Reconciled {checked} campaign(s), {} drifted", drifted.len());
    Ok(drifted)
}
