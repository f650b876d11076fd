//! Transfer Flush Job
//!
//! Drains the transfer buffer into the store, either on a fixed interval
//! or when the buffer signals its size threshold over the flush request
//! channel — whichever comes first. The loop is the single consumer of
//! both triggers, so at most one transfer flush is ever in flight; a
//! request arriving mid-flush coalesces into the pending channel slot.
//! Supports graceful shutdown via SIGTERM/SIGINT signals.

use std::env;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{error, info};

use crate::services::batch_persister::BatchPersister;

/// Default flush interval in seconds
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 5;

/// Environment variable for the flush interval
const ENV_FLUSH_INTERVAL: &str = "TRANSFER_FLUSH_INTERVAL_SECS";

/// Start the transfer flush job
///
/// Spawns a background task that flushes the transfer buffer on every
/// interval tick and on every size-threshold request.
///
/// # Environment Variables
///
/// * `TRANSFER_FLUSH_INTERVAL_SECS` - Interval in seconds (default: 5)
pub async fn start_transfer_flush_job(
    persister: Arc<BatchPersister>,
    mut flush_requests: mpsc::Receiver<()>,
) {
    tokio::spawn(async move {
        let interval_secs: u64 = env::var(ENV_FLUSH_INTERVAL)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_FLUSH_INTERVAL_SECS);

        info!(
            interval_secs = interval_secs,
            "Transfer flush job started"
        );

        let mut interval = interval(TokioDuration::from_secs(interval_secs));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping transfer flush job gracefully");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = persister.flush_transfers().await {
                        error!(error = %e, "Transfer flush failed");
                        // Continue - the batch is dropped, ingestion goes on
                    }
                }
                Some(_) = flush_requests.recv() => {
                    if let Err(e) = persister.flush_transfers().await {
                        error!(error = %e, "Threshold-triggered transfer flush failed");
                    }
                }
            }
        }

        info!("Transfer flush job stopped");
    });
}
