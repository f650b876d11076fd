//! Ledger RPC collaborator
//!
//! Boundary between the pipeline and the chain. Everything the pipeline
//! needs from the node goes through the `LedgerRpc` trait: the transfer log
//! subscription, block timestamps, ERC-20 metadata reads, and balance
//! lookups. The production implementation speaks to a WebSocket provider
//! via alloy; tests substitute in-memory impls.

use alloy::{
    eips::BlockNumberOrTag,
    primitives::Address,
    providers::{Provider, ProviderBuilder, RootProvider, WsConnect},
    pubsub::PubSubFrontend,
    rpc::types::{BlockTransactionsKind, Filter, Log},
    sol,
    sol_types::SolEvent,
};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use std::str::FromStr;
use tracing::{info, warn};

/// The burn/mint sentinel. Never tracked as a holder.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

// Minimal ERC-20 surface: the Transfer event plus the read calls the
// pipeline issues. Each call is independently failable.
sol! {
    #[sol(rpc)]
    interface IErc20 {
        event Transfer(address indexed from, address indexed to, uint256 value);
        function name() external view returns (string);
        function symbol() external view returns (string);
        function totalSupply() external view returns (uint256);
        function balanceOf(address holder) external view returns (uint256);
    }
}

/// A decoded Transfer log as it comes off the subscription
#[derive(Debug, Clone)]
pub struct TransferEvent {
    /// Emitting token contract, lowercase 0x hex
    pub token: String,
    pub from: String,
    pub to: String,
    /// Raw token units as a decimal string
    pub amount: String,
    pub block_number: u64,
    pub tx_hash: String,
}

/// Error types for ledger RPC access
#[derive(Debug)]
pub enum RpcError {
    ProviderError(String),
    ContractCallError(String),
    InvalidConfig(String),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::ProviderError(msg) => write!(f, "Provider error: {}", msg),
            RpcError::ContractCallError(msg) => write!(f, "Contract call error: {}", msg),
            RpcError::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

/// Chain capabilities consumed by the pipeline
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Subscribe to all Transfer logs on the chain. The stream does not
    /// terminate under normal operation; malformed logs are dropped and
    /// logged inside the implementation.
    async fn subscribe_transfers(&self) -> Result<BoxStream<'static, TransferEvent>, RpcError>;

    /// Timestamp (unix seconds) of the block at the given height
    async fn block_timestamp(&self, block_number: u64) -> Result<i64, RpcError>;

    async fn token_name(&self, token: &str) -> Result<String, RpcError>;

    async fn token_symbol(&self, token: &str) -> Result<String, RpcError>;

    /// Total supply in raw token units, as a decimal string
    async fn token_total_supply(&self, token: &str) -> Result<String, RpcError>;

    /// Balance of `holder` in raw token units, as a decimal string
    async fn balance_of(&self, token: &str, holder: &str) -> Result<String, RpcError>;
}

/// Production `LedgerRpc` over an alloy WebSocket provider
pub struct AlloyLedgerRpc {
    provider: RootProvider<PubSubFrontend>,
}

impl AlloyLedgerRpc {
    /// Connect to the given WebSocket RPC endpoint and verify the connection
    pub async fn connect(ws_url: &str) -> Result<Self, RpcError> {
        let provider = ProviderBuilder::new()
            .on_ws(WsConnect::new(ws_url))
            .await
            .map_err(|e| RpcError::ProviderError(format!("WebSocket connect failed: {}", e)))?;

        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| RpcError::ProviderError(format!("Connection check failed: {}", e)))?;

        info!(chain_id = chain_id, "Connected to ledger RPC");

        Ok(Self { provider })
    }

    fn parse_address(token: &str) -> Result<Address, RpcError> {
        Address::from_str(token)
            .map_err(|e| RpcError::InvalidConfig(format!("Invalid address {}: {}", token, e)))
    }
}

#[async_trait]
impl LedgerRpc for AlloyLedgerRpc {
    async fn subscribe_transfers(&self) -> Result<BoxStream<'static, TransferEvent>, RpcError> {
        let filter = Filter::new().event_signature(IErc20::Transfer::SIGNATURE_HASH);

        let subscription = self
            .provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| RpcError::ProviderError(format!("subscribe_logs failed: {}", e)))?;

        let stream = subscription
            .into_stream()
            .filter_map(|log| futures_util::future::ready(decode_transfer_log(log)))
            .boxed();

        Ok(stream)
    }

    async fn block_timestamp(&self, block_number: u64) -> Result<i64, RpcError> {
        let block = self
            .provider
            .get_block_by_number(
                BlockNumberOrTag::Number(block_number),
                BlockTransactionsKind::Hashes,
            )
            .await
            .map_err(|e| RpcError::ProviderError(format!("get_block failed: {}", e)))?
            .ok_or_else(|| {
                RpcError::ProviderError(format!("Block {} not found", block_number))
            })?;

        Ok(block.header.timestamp as i64)
    }

    async fn token_name(&self, token: &str) -> Result<String, RpcError> {
        let contract = IErc20::new(Self::parse_address(token)?, &self.provider);
        contract
            .name()
            .call()
            .await
            .map(|r| r._0)
            .map_err(|e| RpcError::ContractCallError(format!("name() failed: {}", e)))
    }

    async fn token_symbol(&self, token: &str) -> Result<String, RpcError> {
        let contract = IErc20::new(Self::parse_address(token)?, &self.provider);
        contract
            .symbol()
            .call()
            .await
            .map(|r| r._0)
            .map_err(|e| RpcError::ContractCallError(format!("symbol() failed: {}", e)))
    }

    async fn token_total_supply(&self, token: &str) -> Result<String, RpcError> {
        let contract = IErc20::new(Self::parse_address(token)?, &self.provider);
        contract
            .totalSupply()
            .call()
            .await
            .map(|r| r._0.to_string())
            .map_err(|e| RpcError::ContractCallError(format!("totalSupply() failed: {}", e)))
    }

    async fn balance_of(&self, token: &str, holder: &str) -> Result<String, RpcError> {
        let contract = IErc20::new(Self::parse_address(token)?, &self.provider);
        let holder = Self::parse_address(holder)?;
        contract
            .balanceOf(holder)
            .call()
            .await
            .map(|r| r._0.to_string())
            .map_err(|e| RpcError::ContractCallError(format!("balanceOf() failed: {}", e)))
    }
}

/// Decode a raw subscription log into a `TransferEvent`. Unparsable logs
/// are dropped with a warning; the subscription keeps running.
fn decode_transfer_log(log: Log) -> Option<TransferEvent> {
    let block_number = match log.block_number {
        Some(n) => n,
        None => {
            warn!("Transfer log without block number, skipping");
            return None;
        }
    };

    let tx_hash = log
        .transaction_hash
        .map(|h| format!("{:?}", h))
        .unwrap_or_default();

    let decoded = match log.log_decode::<IErc20::Transfer>() {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!(error = %e, "Unparsable Transfer log, skipping");
            return None;
        }
    };

    let token = format!("{:?}", decoded.inner.address);
    let event = &decoded.inner.data;

    Some(TransferEvent {
        token,
        from: format!("{:?}", event.from),
        to: format!("{:?}", event.to),
        amount: event.value.to_string(),
        block_number,
        tx_hash,
    })
}
