//! Trend Sync Job
//!
//! Periodically runs the trend engine over tokens whose snapshot has
//! passed the per-token cooldown. The recompute cadence and the cooldown
//! are configured independently: the job may tick every few minutes while
//! each token is still recomputed at most once per cooldown window.
//! Supports graceful shutdown via SIGTERM/SIGINT signals.

use sea_orm::DatabaseConnection;
use std::env;
use tokio::time::{interval, Duration as TokioDuration};
use tracing::{error, info};

use crate::services::trend_engine::TrendEngine;

/// Default recompute cadence in seconds (5 minutes)
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Default per-token cooldown in seconds (1 hour)
const DEFAULT_COOLDOWN_SECS: i64 = 3600;

/// Environment variable for the recompute cadence
const ENV_SYNC_INTERVAL: &str = "TREND_SYNC_INTERVAL_SECS";

/// Environment variable for the per-token cooldown
const ENV_COOLDOWN: &str = "TREND_COOLDOWN_SECS";

/// Start the trend sync job
///
/// # Environment Variables
///
/// * `TREND_SYNC_INTERVAL_SECS` - Cycle cadence in seconds (default: 300)
/// * `TREND_COOLDOWN_SECS` - Per-token cooldown in seconds (default: 3600)
pub async fn start_trend_sync_job(db: DatabaseConnection) {
    tokio::spawn(async move {
        let interval_secs: u64 = env::var(ENV_SYNC_INTERVAL)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS);

        let cooldown_secs: i64 = env::var(ENV_COOLDOWN)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_COOLDOWN_SECS);

        info!(
            interval_secs = interval_secs,
            cooldown_secs = cooldown_secs,
            "Trend sync job started"
        );

        let engine = TrendEngine::new(db, cooldown_secs);
        let mut interval = interval(TokioDuration::from_secs(interval_secs));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received, stopping trend sync job gracefully");
                    break;
                }
                _ = interval.tick() => {
                    match engine.recompute_due().await {
                        Ok(count) => {
                            if count > 0 {
                                info!(count = count, "Trend sync completed");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Trend sync failed");
                            // Continue - next interval will retry
                        }
                    }
                }
            }
        }

        info!("Trend sync job stopped");
    });
}
