//! Token registry
//!
//! Authoritative cache of known token metadata backed by the tokens table.
//! Lookups never touch the chain; registration fetches metadata for unknown
//! addresses with independent per-field fallbacks, persists with
//! first-writer-wins semantics, and updates the cache to exactly what was
//! persisted. The cache is rebuilt from the store at process start.

use futures_util::future::join_all;
use parking_lot::RwLock;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, Set};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::entities::{prelude::Tokens, tokens};
use crate::services::ledger_rpc::LedgerRpc;

/// Fallbacks when a single metadata call fails; a failing field never
/// aborts registration of the token.
const FALLBACK_NAME: &str = "Unknown";
const FALLBACK_SYMBOL: &str = "UNKNOWN";
const FALLBACK_SUPPLY: &str = "0";

/// Independent timeout per metadata call
const METADATA_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Error types for token registration
#[derive(Debug)]
pub enum RegistryError {
    DatabaseError(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}

/// In-memory + persisted token registry
pub struct TokenRegistry {
    db: DatabaseConnection,
    rpc: Arc<dyn LedgerRpc>,
    cache: RwLock<HashMap<String, tokens::Model>>,
}

impl TokenRegistry {
    pub fn new(db: DatabaseConnection, rpc: Arc<dyn LedgerRpc>) -> Self {
        Self {
            db,
            rpc,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild the cache from the tokens table. Called once at startup.
    pub async fn hydrate(&self) -> Result<usize, RegistryError> {
        let rows = Tokens::find()
            .all(&self.db)
            .await
            .map_err(|e| RegistryError::DatabaseError(format!("Failed to load tokens: {}", e)))?;

        let count = rows.len();
        let mut cache = self.cache.write();
        for row in rows {
            cache.insert(row.address.clone(), row);
        }
        drop(cache);

        info!(count = count, "Token registry hydrated from store");
        Ok(count)
    }

    /// Cache-first lookup; never performs an external call
    pub fn lookup(&self, address: &str) -> Option<tokens::Model> {
        self.cache.read().get(address).cloned()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.cache.read().contains_key(address)
    }

    /// Register every address not already known, fetching metadata
    /// concurrently. `discovered_at` becomes first_seen/last_updated for
    /// newly created rows. Per-token failures are logged and do not abort
    /// the rest of the batch.
    pub async fn register_batch(&self, addresses: &[String], discovered_at: i64) -> usize {
        let unknown: Vec<&String> = {
            let cache = self.cache.read();
            addresses
                .iter()
                .filter(|a| !cache.contains_key(a.as_str()))
                .collect()
        };

        if unknown.is_empty() {
            return 0;
        }

        let results = join_all(
            unknown
                .iter()
                .map(|address| self.register_one(address, discovered_at)),
        )
        .await;

        results.into_iter().filter(|r| *r).count()
    }

    /// Fetch metadata, persist with ON CONFLICT DO NOTHING, converge the
    /// cache to the persisted row. Returns false when persistence failed.
    async fn register_one(&self, address: &str, discovered_at: i64) -> bool {
        let (name, symbol, total_supply) = self.fetch_metadata(address).await;

        let model = tokens::ActiveModel {
            address: Set(address.to_string()),
            name: Set(name.clone()),
            symbol: Set(symbol.clone()),
            total_supply: Set(total_supply.clone()),
            first_seen: Set(discovered_at),
            last_updated: Set(discovered_at),
        };

        let inserted = Tokens::insert(model)
            .on_conflict(
                OnConflict::column(tokens::Column::Address)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await;

        let persisted = match inserted {
            // We won the race: the persisted row is exactly ours
            Ok(rows) if rows > 0 => {
                info!(
                    name = %name,
                    symbol = %symbol,
                    token = %address,
                    "New token discovered"
                );
                tokens::Model {
                    address: address.to_string(),
                    name,
                    symbol,
                    total_supply,
                    first_seen: discovered_at,
                    last_updated: discovered_at,
                }
            }
            // A concurrent discoverer won; converge to its row
            Ok(_) => match Tokens::find_by_id(address.to_string()).one(&self.db).await {
                Ok(Some(row)) => row,
                Ok(None) => {
                    warn!(token = %address, "Token row missing after conflicting insert");
                    return false;
                }
                Err(e) => {
                    warn!(token = %address, error = %e, "Failed to reload token after conflict");
                    return false;
                }
            },
            Err(e) => {
                warn!(token = %address, error = %e, "Failed to persist new token");
                return false;
            }
        };

        self.cache
            .write()
            .insert(persisted.address.clone(), persisted);
        true
    }

    #[cfg(test)]
    pub(crate) fn insert_cached(&self, row: tokens::Model) {
        self.cache.write().insert(row.address.clone(), row);
    }

    /// Read name/symbol/totalSupply concurrently with independent timeouts
    /// and per-field fallbacks
    async fn fetch_metadata(&self, address: &str) -> (String, String, String) {
        let (name, symbol, total_supply) = tokio::join!(
            timeout(METADATA_CALL_TIMEOUT, self.rpc.token_name(address)),
            timeout(METADATA_CALL_TIMEOUT, self.rpc.token_symbol(address)),
            timeout(METADATA_CALL_TIMEOUT, self.rpc.token_total_supply(address)),
        );

        let name = match name {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(token = %address, error = %e, "Failed to read token name");
                FALLBACK_NAME.to_string()
            }
            Err(_) => {
                warn!(token = %address, "Token name call timed out");
                FALLBACK_NAME.to_string()
            }
        };

        let symbol = match symbol {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(token = %address, error = %e, "Failed to read token symbol");
                FALLBACK_SYMBOL.to_string()
            }
            Err(_) => {
                warn!(token = %address, "Token symbol call timed out");
                FALLBACK_SYMBOL.to_string()
            }
        };

        let total_supply = match total_supply {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(token = %address, error = %e, "Failed to read token total supply");
                FALLBACK_SUPPLY.to_string()
            }
            Err(_) => {
                warn!(token = %address, "Token total supply call timed out");
                FALLBACK_SUPPLY.to_string()
            }
        };

        (name, symbol, total_supply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ledger_rpc::{RpcError, TransferEvent};
    use async_trait::async_trait;
    use futures_util::stream::BoxStream;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mock chain that counts metadata calls and can fail single fields
    struct MockRpc {
        fail_name: bool,
        calls: AtomicUsize,
    }

    impl MockRpc {
        fn new(fail_name: bool) -> Self {
            Self {
                fail_name,
                calls: AtomicUsize::new(0),
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

        async fn block_timestamp(&self, _block_number: u64) -> Result<i64, RpcError> {
            Err(RpcError::ProviderError("not supported in mock".to_string()))
        }

        async fn token_name(&self, _token: &str) -> Result<String, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_name {
                Err(RpcError::ContractCallError("no name()".to_string()))
            } else {
                Ok("Test Token".to_string())
            }
        }

        async fn token_symbol(&self, _token: &str) -> Result<String, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("TEST".to_string())
        }

        async fn token_total_supply(&self, _token: &str) -> Result<String, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("1000000000000000000000000".to_string())
        }

        async fn balance_of(&self, _token: &str, _holder: &str) -> Result<String, RpcError> {
            Err(RpcError::ProviderError("not supported in mock".to_string()))
        }
    }

    const TOKEN: &str = "0x00000000000000000000000000000000000000aa";

    fn existing_row() -> tokens::Model {
        tokens::Model {
            address: TOKEN.to_string(),
            name: "Winner Token".to_string(),
            symbol: "WIN".to_string(),
            total_supply: "42".to_string(),
            first_seen: 1_700_000_000,
            last_updated: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_register_batch_skips_known_tokens() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let rpc = Arc::new(MockRpc::new(false));
        let registry = TokenRegistry::new(db, rpc.clone());

        registry
            .cache
            .write()
            .insert(TOKEN.to_string(), existing_row());

        let registered = registry
            .register_batch(&[TOKEN.to_string()], 1_700_000_100)
            .await;

        assert_eq!(registered, 0);
        assert_eq!(rpc.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_register_persists_and_caches_with_field_fallback() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let rpc = Arc::new(MockRpc::new(true));
        let registry = TokenRegistry::new(db, rpc.clone());

        let registered = registry
            .register_batch(&[TOKEN.to_string()], 1_700_000_100)
            .await;
        assert_eq!(registered, 1);

        // name() failed, the other fields came through
        let cached = registry.lookup(TOKEN).expect("cached after registration");
        assert_eq!(cached.name, FALLBACK_NAME);
        assert_eq!(cached.symbol, "TEST");
        assert_eq!(cached.total_supply, "1000000000000000000000000");
        assert_eq!(cached.first_seen, 1_700_000_100);
        assert_eq!(rpc.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_lost_registration_race_converges_to_winner() {
        // Insert conflicts (rows_affected = 0), read-back returns the
        // concurrent discoverer's row
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .append_query_results([vec![existing_row()]])
            .into_connection();
        let rpc = Arc::new(MockRpc::new(false));
        let registry = TokenRegistry::new(db, rpc);

        let registered = registry
            .register_batch(&[TOKEN.to_string()], 1_700_000_100)
            .await;
        assert_eq!(registered, 1);

        let cached = registry.lookup(TOKEN).expect("cached after registration");
        assert_eq!(cached.name, "Winner Token");
        assert_eq!(cached.first_seen, 1_700_000_000);
    }

    #[tokio::test]
    async fn test_lookup_is_cache_only() {
        let db = MockDatabase::new(DatabaseBackend::Postgres).into_connection();
        let rpc = Arc::new(MockRpc::new(false));
        let registry = TokenRegistry::new(db, rpc.clone());

        assert!(registry.lookup(TOKEN).is_none());
        assert_eq!(rpc.calls.load(Ordering::SeqCst), 0);
    }
}
