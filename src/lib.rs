// src/lib.rs

pub mod entities {
    pub mod prelude;
    pub mod holder_balances;
    pub mod tokens;
    pub mod transfers;
    pub mod trend_snapshots;
}

pub mod services {
    pub mod batch_persister;
    pub mod ledger_rpc;
    pub mod token_registry;
    pub mod transfer_buffer;
    pub mod transfer_listener;
    pub mod trend_engine;
}

pub mod jobs;
