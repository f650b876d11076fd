use sea_orm::Database;
use sea_orm_migration::MigratorTrait;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tokentracker_backend::jobs;
use tokentracker_backend::services::batch_persister::BatchPersister;
use tokentracker_backend::services::ledger_rpc::AlloyLedgerRpc;
use tokentracker_backend::services::token_registry::TokenRegistry;
use tokentracker_backend::services::transfer_buffer::{PendingBalanceSet, TransferBuffer};
use tokentracker_backend::services::transfer_listener::TransferListener;

/// Default transfer buffer size threshold before a flush is requested
const DEFAULT_FLUSH_THRESHOLD: usize = 500;

/// Default balance freshness TTL in seconds
const DEFAULT_BALANCE_TTL_SECS: u64 = 60;

/// Environment variable for the flush threshold
const ENV_FLUSH_THRESHOLD: &str = "TRANSFER_FLUSH_THRESHOLD";

/// Environment variable for the balance freshness TTL
const ENV_BALANCE_TTL: &str = "BALANCE_FRESHNESS_TTL_SECS";

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tokentracker_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Connect to database
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    tracing::info!("Connecting to database...");
    let db = Database::connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");

    // Connect to the ledger RPC provider
    let ws_url = env::var("PROVIDER_WS_URL").expect("PROVIDER_WS_URL must be set");
    let rpc = Arc::new(
        AlloyLedgerRpc::connect(&ws_url)
            .await
            .expect("Failed to connect to ledger RPC"),
    );

    let flush_threshold: usize = env::var(ENV_FLUSH_THRESHOLD)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_FLUSH_THRESHOLD);

    let balance_ttl_secs: u64 = env::var(ENV_BALANCE_TTL)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_BALANCE_TTL_SECS);

    // Build the pipeline: accumulators, registry, persister
    let (buffer, flush_requests) = TransferBuffer::new(flush_threshold);
    let pending = PendingBalanceSet::new();

    let registry = Arc::new(TokenRegistry::new(db.clone(), rpc.clone()));
    registry
        .hydrate()
        .await
        .expect("Failed to hydrate token registry");

    let persister = Arc::new(BatchPersister::new(
        db.clone(),
        rpc.clone(),
        registry,
        buffer.clone(),
        pending.clone(),
        Duration::from_secs(balance_ttl_secs),
    ));

    // Periodic flush and recompute jobs
    jobs::transfer_flush_job::start_transfer_flush_job(persister.clone(), flush_requests).await;
    jobs::balance_refresh_job::start_balance_refresh_job(persister.clone()).await;
    jobs::trend_sync_job::start_trend_sync_job(db.clone()).await;

    // Foreground listener; ctrl_c ends the process
    let listener = TransferListener::new(rpc, buffer, pending);

    tokio::select! {
        result = listener.run() => {
            match result {
                Ok(()) => tracing::warn!("Transfer subscription ended"),
                Err(e) => tracing::error!(error = %e, "Transfer listener failed"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received, exiting");
        }
    }
}
