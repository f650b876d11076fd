//! Balance Refresh Job
//!
//! Periodically drains the pending balance set and refreshes holder
//! balances through the batch persister. Runs as the single consumer of
//! the balance flush path, so at most one balance flush is in flight.
//! Supports graceful shutdown via SIGTERM/SIGINT signals.

use std::env;
use std::sync::Arc;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{error, info};

use crate::services::batch_persister::BatchPersister;

/// Default refresh interval in seconds
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30;

/// Environment variable for the refresh interval
const ENV_REFRESH_INTERVAL: &str = "BALANCE_FLUSH_INTERVAL_SECS";

/// Start the balance refresh job
///
/// # Environment Variables
///
/// * `BALANCE_FLUSH_INTERVAL_SECS` - Interval in seconds (default: 30)
pub async fn start_balance_refresh_job(persister: Arc<BatchPersister>) {
    tokio::spawn(async move {
        let interval_secs: u64 = env::var(ENV_REFRESH_INTERVAL)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS);

        info!(
            interval_secs = interval_secs,
            "Balance refresh job started"
        );

        let mut interval = interval(TokioDuration::from_secs(interval_secs));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping balance refresh job gracefully");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = persister.flush_balances().await {
                        error!(error = %e, "Balance flush failed");
                        // Continue - next interval retries the backlog
                    }
                }
            }
        }

        info!("Balance refresh job stopped");
    });
}
