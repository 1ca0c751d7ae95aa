//! Donation ledger daemon — entry point.
//!
//! Applies the schema, then runs the reconciliation job until Ctrl-C,
//! reporting any campaign whose running total has drifted from its ledger.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use donation_ledger::config::Config;
use donation_ledger::db;
use donation_ledger::reconciler::{self, ReconcilerState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    info!(
        "Ledger write mode {:?}, recent feed limit {}",
        config.write_mode, config.recent_donations_limit
    );

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url, config.max_connections).await?;

    // ─── Background reconciler ────────────────────────────
    let shutdown = CancellationToken::new();
    let state = Arc::new(ReconcilerState {
        pool: pool.clone(),
        config,
        shutdown: shutdown.clone(),
    });
    let reconciler = tokio::spawn(reconciler::run(state));

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down");

    shutdown.cancel();
    reconciler.await?;
    pool.close().await;

    Ok(())
}
