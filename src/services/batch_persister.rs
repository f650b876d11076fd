//! Batch persister
//!
//! Drains the in-memory accumulators and turns them into durable state.
//! Transfer flushes resolve block timestamps once per distinct height,
//! register unknown tokens, and commit the whole batch in one transaction.
//! Balance flushes group the pending set by token, skip holders whose
//! cached balance is still fresh, fan out bounded-concurrency balanceOf
//! calls, and upsert the results. A failed batch is rolled back, logged,
//! and dropped; ingestion is unaffected.

use chrono::Utc;
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use moka::future::Cache;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set, TransactionTrait};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::entities::{
    holder_balances,
    prelude::{HolderBalances, Tokens, Transfers},
    tokens, transfers,
};
use crate::services::ledger_rpc::{LedgerRpc, TransferEvent};
use crate::services::token_registry::TokenRegistry;
use crate::services::transfer_buffer::{PendingBalanceSet, TransferBuffer};

/// Independent timeout per external call
const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Concurrent balanceOf calls per token
const BALANCE_BATCH_WIDTH: usize = 50;

/// Error types for batch persistence
#[derive(Debug)]
pub enum PersistError {
    DatabaseError(String),
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for PersistError {}

/// Drains the accumulators into the store
pub struct BatchPersister {
    db: DatabaseConnection,
    rpc: Arc<dyn LedgerRpc>,
    registry: Arc<TokenRegistry>,
    buffer: Arc<TransferBuffer>,
    pending: Arc<PendingBalanceSet>,
    /// (holder, token) -> last fetched balance, evicted after the
    /// freshness TTL; a present entry suppresses the external lookup
    balance_cache: Cache<(String, String), String>,
}

impl BatchPersister {
    pub fn new(
        db: DatabaseConnection,
        rpc: Arc<dyn LedgerRpc>,
        registry: Arc<TokenRegistry>,
        buffer: Arc<TransferBuffer>,
        pending: Arc<PendingBalanceSet>,
        balance_ttl: Duration,
    ) -> Self {
        let balance_cache = Cache::builder().time_to_live(balance_ttl).build();
        Self {
            db,
            rpc,
            registry,
            buffer,
            pending,
            balance_cache,
        }
    }

    /// Drain the transfer buffer and commit it as one transaction.
    /// Returns the number of transfers persisted.
    pub async fn flush_transfers(&self) -> Result<usize, PersistError> {
        let batch = self.buffer.drain_and_reset();
        if batch.is_empty() {
            return Ok(0);
        }

        debug!(count = batch.len(), "Flushing transfer batch");

        let timestamps = self.resolve_block_timestamps(&batch).await;

        // Register tokens this batch discovered, dating them at the
        // earliest timestamp observed in the batch
        let discovered_at = timestamps.values().copied().min().unwrap_or_else(|| {
            Utc::now().timestamp()
        });
        let unknown: Vec<String> = {
            let mut seen = BTreeSet::new();
            batch
                .iter()
                .filter(|t| seen.insert(t.token.clone()) && !self.registry.contains(&t.token))
                .map(|t| t.token.clone())
                .collect()
        };
        if !unknown.is_empty() {
            self.registry.register_batch(&unknown, discovered_at).await;
        }

        // Latest activity per touched token
        let mut token_activity: HashMap<String, i64> = HashMap::new();
        let mut models = Vec::with_capacity(batch.len());
        for transfer in &batch {
            let ts = timestamps
                .get(&transfer.block_number)
                .copied()
                .unwrap_or(discovered_at);

            let entry = token_activity.entry(transfer.token.clone()).or_insert(ts);
            if ts > *entry {
                *entry = ts;
            }

            models.push(transfers::ActiveModel {
                token_address: Set(transfer.token.clone()),
                transfer_from: Set(transfer.from.clone()),
                transfer_to: Set(transfer.to.clone()),
                amount: Set(transfer.amount.clone()),
                timestamp: Set(ts),
                block_number: Set(transfer.block_number as i64),
                tx_hash: Set(transfer.tx_hash.clone()),
                ..Default::default()
            });
        }

        let count = models.len();
        let activity: Vec<(String, i64)> = token_activity.into_iter().collect();

        let committed = self
            .db
            .transaction::<_, (), DbErr>(move |txn| {
                Box::pin(async move {
                    Transfers::insert_many(models)
                        .exec_without_returning(txn)
                        .await?;

                    for (token, last_activity) in activity {
                        Tokens::update_many()
                            .col_expr(tokens::Column::LastUpdated, Expr::value(last_activity))
                            .filter(tokens::Column::Address.eq(token))
                            .exec(txn)
                            .await?;
                    }

                    Ok(())
                })
            })
            .await;

        match committed {
            Ok(()) => {
                info!(count = count, "Transfer batch committed");
                Ok(count)
            }
            Err(e) => {
                // Rolled back as a whole; the batch is dropped (no retry
                // queue — operators replay from upstream history)
                error!(count = count, error = %e, "Transfer batch failed, dropping");
                Err(PersistError::DatabaseError(e.to_string()))
            }
        }
    }

    /// One concurrent lookup per distinct block height. A failed or timed
    /// out lookup falls back to the current wall clock.
    async fn resolve_block_timestamps(&self, batch: &[TransferEvent]) -> HashMap<u64, i64> {
        let heights: BTreeSet<u64> = batch.iter().map(|t| t.block_number).collect();

        let resolved = join_all(heights.into_iter().map(|height| async move {
            let ts = match timeout(RPC_CALL_TIMEOUT, self.rpc.block_timestamp(height)).await {
                Ok(Ok(ts)) => ts,
                Ok(Err(e)) => {
                    warn!(height = height, error = %e, "Block timestamp lookup failed, using wall clock");
                    Utc::now().timestamp()
                }
                Err(_) => {
                    warn!(height = height, "Block timestamp lookup timed out, using wall clock");
                    Utc::now().timestamp()
                }
            };
            (height, ts)
        }))
        .await;

        resolved.into_iter().collect()
    }

    /// Drain the pending balance set, refresh stale holders, and upsert
    /// the results in one statement. Returns the number of balances
    /// written.
    pub async fn flush_balances(&self) -> Result<usize, PersistError> {
        let pairs = self.pending.drain_and_reset();
        if pairs.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp();

        // Serve stale: a holder refreshed within the TTL is skipped
        let mut by_token: HashMap<String, Vec<String>> = HashMap::new();
        let mut skipped = 0usize;
        for (token, holder) in pairs {
            if self
                .balance_cache
                .contains_key(&(holder.clone(), token.clone()))
            {
                skipped += 1;
                continue;
            }
            by_token.entry(token).or_default().push(holder);
        }

        if skipped > 0 {
            debug!(skipped = skipped, "Balance refreshes served from cache");
        }
        if by_token.is_empty() {
            return Ok(0);
        }

        // Bounded fan-out per token; individual failures skip that holder
        let mut refreshed: Vec<(String, String, String)> = Vec::new();
        for (token, holders) in by_token {
            let results: Vec<Option<(String, String)>> = stream::iter(holders)
                .map(|holder| {
                    let token = token.clone();
                    async move {
                        match timeout(RPC_CALL_TIMEOUT, self.rpc.balance_of(&token, &holder)).await
                        {
                            Ok(Ok(balance)) => Some((holder, balance)),
                            Ok(Err(e)) => {
                                warn!(token = %token, holder = %holder, error = %e, "Balance lookup failed, skipping holder");
                                None
                            }
                            Err(_) => {
                                warn!(token = %token, holder = %holder, "Balance lookup timed out, skipping holder");
                                None
                            }
                        }
                    }
                })
                .buffer_unordered(BALANCE_BATCH_WIDTH)
                .collect()
                .await;

            for (holder, balance) in results.into_iter().flatten() {
                refreshed.push((token.clone(), holder, balance));
            }
        }

        if refreshed.is_empty() {
            return Ok(0);
        }

        let models: Vec<holder_balances::ActiveModel> = refreshed
            .iter()
            .map(|(token, holder, balance)| holder_balances::ActiveModel {
                holder_address: Set(holder.clone()),
                token_address: Set(token.clone()),
                balance: Set(balance.clone()),
                last_updated: Set(now),
            })
            .collect();

        let count = models.len();

        // Single upsert statement; atomic as a whole
        let committed = HolderBalances::insert_many(models)
            .on_conflict(
                OnConflict::columns([
                    holder_balances::Column::HolderAddress,
                    holder_balances::Column::TokenAddress,
                ])
                .update_columns([
                    holder_balances::Column::Balance,
                    holder_balances::Column::LastUpdated,
                ])
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await;

        match committed {
            Ok(_) => {
                for (token, holder, balance) in refreshed {
                    self.balance_cache.insert((holder, token), balance).await;
                }
                info!(count = count, "Holder balances committed");
                Ok(count)
            }
            Err(e) => {
                error!(count = count, error = %e, "Balance batch failed, dropping");
                Err(PersistError::DatabaseError(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ledger_rpc::RpcError;
    use async_trait::async_trait;
    use futures_util::stream::BoxStream;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TOKEN: &str = "0x00000000000000000000000000000000000000aa";

    struct MockRpc {
        block_calls: AtomicUsize,
        balance_calls: AtomicUsize,
        fail_balance_for: Option<String>,
    }

    impl MockRpc {
        fn new() -> Self {
            Self {
                block_calls: AtomicUsize::new(0),
                balance_calls: AtomicUsize::new(0),
                fail_balance_for: None,
            }
        }
    }

    #[async_trait]
    impl LedgerRpc for MockRpc {
        async fn subscribe_transfers(
            &self,
        ) -> Result<BoxStream<'static, TransferEvent>, RpcError> {
            Err(RpcError::ProviderError("not supported in mock".to_string()))
        }

        async fn block_timestamp(&self, block_number: u64) -> Result<i64, RpcError> {
            self.block_calls.fetch_add(1, Ordering::SeqCst);
            Ok(1_700_000_000 + block_number as i64)
        }

        async fn token_name(&self, _token: &str) -> Result<String, RpcError> {
            Ok("Test Token".to_string())
        }

        async fn token_symbol(&self, _token: &str) -> Result<String, RpcError> {
            Ok("TEST".to_string())
        }

        async fn token_total_supply(&self, _token: &str) -> Result<String, RpcError> {
            Ok("1000000".to_string())
        }

        async fn balance_of(&self, _token: &str, holder: &str) -> Result<String, RpcError> {
            self.balance_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_balance_for.as_deref() == Some(holder) {
                return Err(RpcError::ContractCallError("reverted".to_string()));
            }
            Ok("500".to_string())
        }
    }

    fn event(block: u64, n: u64) -> TransferEvent {
        TransferEvent {
            token: TOKEN.to_string(),
            from: "0x0000000000000000000000000000000000000001".to_string(),
            to: "0x0000000000000000000000000000000000000002".to_string(),
            amount: n.to_string(),
            block_number: block,
            tx_hash: format!("0x{:064x}", n),
        }
    }

    fn known_token_row() -> tokens::Model {
        tokens::Model {
            address: TOKEN.to_string(),
            name: "Test Token".to_string(),
            symbol: "TEST".to_string(),
            total_supply: "1000000".to_string(),
            first_seen: 1_699_000_000,
            last_updated: 1_699_000_000,
        }
    }

    struct Fixture {
        persister: BatchPersister,
        buffer: Arc<TransferBuffer>,
        pending: Arc<PendingBalanceSet>,
        registry: Arc<TokenRegistry>,
    }

    fn fixture(db: DatabaseConnection, rpc: Arc<MockRpc>, ttl: Duration) -> Fixture {
        let (buffer, _rx) = TransferBuffer::new(usize::MAX);
        let pending = PendingBalanceSet::new();
        let registry = Arc::new(TokenRegistry::new(db.clone(), rpc.clone()));
        let persister = BatchPersister::new(
            db,
            rpc,
            registry.clone(),
            buffer.clone(),
            pending.clone(),
            ttl,
        );
        Fixture {
            persister,
            buffer,
            pending,
            registry,
        }
    }

    #[tokio::test]
    async fn test_flush_transfers_resolves_each_height_once() {
        // 4 transfers over 2 blocks: exactly 2 block lookups
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([
                // insert_many transfers
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 4,
                },
                // last_updated bump for the one touched token
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
            ])
            .into_connection();
        let rpc = Arc::new(MockRpc::new());
        let f = fixture(db, rpc.clone(), Duration::from_secs(60));
        f.registry.insert_cached(known_token_row());

        f.buffer.append(event(100, 1));
        f.buffer.append(event(100, 2));
        f.buffer.append(event(101, 3));
        f.buffer.append(event(101, 4));

        let count = f.persister.flush_transfers().await.expect("flush succeeds");
        assert_eq!(count, 4);
        assert_eq!(rpc.block_calls.load(Ordering::SeqCst), 2);
        assert!(f.buffer.is_empty());
    }

    #[tokio::test]
    async fn test_transfer_batch_commits_in_one_transaction() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 2,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
            ])
            .into_connection();
        let probe = db.clone();
        let rpc = Arc::new(MockRpc::new());
        let f = fixture(db, rpc, Duration::from_secs(60));
        f.registry.insert_cached(known_token_row());

        f.buffer.append(event(100, 1));
        f.buffer.append(event(100, 2));
        f.persister.flush_transfers().await.expect("flush succeeds");

        // Transfer rows and the token activity bump share one transaction:
        // all-or-nothing
        let log = probe.into_transaction_log();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_flush_transfers_empty_buffer_is_noop() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let rpc = Arc::new(MockRpc::new());
        let f = fixture(db, rpc.clone(), Duration::from_secs(60));

        let count = f.persister.flush_transfers().await.expect("noop flush");
        assert_eq!(count, 0);
        assert_eq!(rpc.block_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_commit_drops_batch_and_keeps_ingesting() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_errors([DbErr::Custom("constraint violation".to_string())])
            .into_connection();
        let rpc = Arc::new(MockRpc::new());
        let f = fixture(db, rpc, Duration::from_secs(60));
        f.registry.insert_cached(known_token_row());

        f.buffer.append(event(100, 1));
        let result = f.persister.flush_transfers().await;
        assert!(result.is_err());

        // The batch is gone (dropped, not re-queued) and the buffer is
        // free for new events
        assert!(f.buffer.is_empty());
        f.buffer.append(event(101, 2));
        assert_eq!(f.buffer.len(), 1);
    }

    #[tokio::test]
    async fn test_flush_balances_groups_and_upserts() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 3,
            }])
            .into_connection();
        let rpc = Arc::new(MockRpc::new());
        let f = fixture(db, rpc.clone(), Duration::from_secs(60));

        f.pending.flag(TOKEN, "0x0000000000000000000000000000000000000001");
        f.pending.flag(TOKEN, "0x0000000000000000000000000000000000000002");
        f.pending.flag(TOKEN, "0x0000000000000000000000000000000000000003");
        // Duplicate flag coalesces before the flush
        f.pending.flag(TOKEN, "0x0000000000000000000000000000000000000001");

        let count = f.persister.flush_balances().await.expect("flush succeeds");
        assert_eq!(count, 3);
        assert_eq!(rpc.balance_calls.load(Ordering::SeqCst), 3);
        assert_eq!(f.pending.len(), 0);
    }

    #[tokio::test]
    async fn test_fresh_balance_served_from_cache() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let rpc = Arc::new(MockRpc::new());
        let f = fixture(db, rpc.clone(), Duration::from_secs(60));

        let holder = "0x0000000000000000000000000000000000000001";
        f.pending.flag(TOKEN, holder);
        f.persister.flush_balances().await.expect("first flush");
        assert_eq!(rpc.balance_calls.load(Ordering::SeqCst), 1);

        // Flagged again within the TTL: no external call, nothing written
        f.pending.flag(TOKEN, holder);
        let count = f.persister.flush_balances().await.expect("second flush");
        assert_eq!(count, 0);
        assert_eq!(rpc.balance_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_balance_triggers_new_lookup() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
            ])
            .into_connection();
        let rpc = Arc::new(MockRpc::new());
        let f = fixture(db, rpc.clone(), Duration::from_millis(50));

        let holder = "0x0000000000000000000000000000000000000001";
        f.pending.flag(TOKEN, holder);
        f.persister.flush_balances().await.expect("first flush");
        assert_eq!(rpc.balance_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;

        f.pending.flag(TOKEN, holder);
        let count = f.persister.flush_balances().await.expect("second flush");
        assert_eq!(count, 1);
        assert_eq!(rpc.balance_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_balance_lookup_skips_only_that_holder() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let mut rpc = MockRpc::new();
        rpc.fail_balance_for =
            Some("0x0000000000000000000000000000000000000002".to_string());
        let rpc = Arc::new(rpc);
        let f = fixture(db, rpc.clone(), Duration::from_secs(60));

        f.pending.flag(TOKEN, "0x0000000000000000000000000000000000000001");
        f.pending.flag(TOKEN, "0x0000000000000000000000000000000000000002");

        let count = f.persister.flush_balances().await.expect("flush succeeds");
        assert_eq!(count, 1);
        assert_eq!(rpc.balance_calls.load(Ordering::SeqCst), 2);
    }
}
