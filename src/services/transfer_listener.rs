//! Transfer listener
//!
//! The single long-lived consumer of the Transfer subscription. Each event
//! is appended to the transfer buffer and both touched holders are flagged
//! for a balance refresh. The listener never performs I/O or takes a
//! database transaction; the accumulators are its only side effects, so a
//! slow flush can never stall ingestion.

use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{info, warn};

use super::ledger_rpc::{LedgerRpc, RpcError, TransferEvent};
use super::transfer_buffer::{PendingBalanceSet, TransferBuffer};

pub struct TransferListener {
    rpc: Arc<dyn LedgerRpc>,
    buffer: Arc<TransferBuffer>,
    pending: Arc<PendingBalanceSet>,
}

impl TransferListener {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        buffer: Arc<TransferBuffer>,
        pending: Arc<PendingBalanceSet>,
    ) -> Self {
        Self {
            rpc,
            buffer,
            pending,
        }
    }

    /// Consume the subscription until the stream ends. Does not terminate
    /// under normal operation.
    pub async fn run(&self) -> Result<(), RpcError> {
        let mut stream = self.rpc.subscribe_transfers().await?;
        info!("Transfer listener started");

        while let Some(event) = stream.next().await {
            self.ingest(event);
        }

        warn!("Transfer subscription stream ended");
        Ok(())
    }

    fn ingest(&self, event: TransferEvent) {
        // The zero sentinel (mint/burn) is filtered inside flag()
        self.pending.flag(&event.token, &event.from);
        self.pending.flag(&event.token, &event.to);
        self.buffer.append(event);
    }
}
