//! Trend engine
//!
//! Periodically recomputes the composite trend score per token from
//! persisted history. A token is only recomputed when its last snapshot is
//! older than the cooldown; due tokens are processed in small concurrent
//! groups with per-token error capture, so one failing token never aborts
//! the cycle. The percentile threshold and top-holder sum are pure
//! functions over in-memory value lists.

use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::entities::{
    holder_balances,
    prelude::{HolderBalances, Tokens, TrendSnapshots, Transfers},
    tokens, transfers, trend_snapshots,
};

/// Trailing window the metrics are computed over
const TREND_WINDOW_SECS: i64 = 86_400;

/// Tokens recomputed concurrently per group
const TREND_CHUNK_SIZE: usize = 10;

/// Error types for trend computation
#[derive(Debug)]
pub enum TrendError {
    DatabaseError(String),
}

impl std::fmt::Display for TrendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl std::error::Error for TrendError {}

/// Metrics for one token over one window
#[derive(Debug, Clone, PartialEq)]
pub struct TrendMetrics {
    pub velocity: f64,
    pub unique_holders: i64,
    pub large_transactions: i64,
    pub growth_rate: f64,
    pub whale_concentration: f64,
    pub trend_score: f64,
}

/// Recomputes trend snapshots on a cooldown
pub struct TrendEngine {
    db: DatabaseConnection,
    cooldown_secs: i64,
}

impl TrendEngine {
    pub fn new(db: DatabaseConnection, cooldown_secs: i64) -> Self {
        Self { db, cooldown_secs }
    }

    /// Recompute every token whose snapshot is due. Returns the number of
    /// snapshots written.
    pub async fn recompute_due(&self) -> Result<usize, TrendError> {
        let now = Utc::now().timestamp();

        let all_tokens = Tokens::find()
            .all(&self.db)
            .await
            .map_err(|e| TrendError::DatabaseError(format!("Failed to load tokens: {}", e)))?;

        let snapshots: HashMap<String, i64> = TrendSnapshots::find()
            .all(&self.db)
            .await
            .map_err(|e| TrendError::DatabaseError(format!("Failed to load snapshots: {}", e)))?
            .into_iter()
            .map(|s| (s.token_address, s.last_calculated))
            .collect();

        let due: Vec<tokens::Model> = all_tokens
            .into_iter()
            .filter(|t| is_due(snapshots.get(&t.address).copied(), now, self.cooldown_secs))
            .collect();

        if due.is_empty() {
            debug!("No tokens due for trend recompute");
            return Ok(0);
        }

        info!(count = due.len(), "Recomputing trends");

        let mut written = 0usize;
        for chunk in due.chunks(TREND_CHUNK_SIZE) {
            let results = join_all(chunk.iter().map(|token| self.recompute_one(token, now))).await;
            for (token, result) in chunk.iter().zip(results) {
                match result {
                    Ok(metrics) => {
                        written += 1;
                        debug!(
                            token = %token.address,
                            score = metrics.trend_score,
                            "Trend snapshot updated"
                        );
                    }
                    Err(e) => {
                        warn!(token = %token.address, error = %e, "Trend recompute failed, skipping");
                    }
                }
            }
        }

        info!(written = written, "Trend cycle completed");
        Ok(written)
    }

    /// Compute and upsert the snapshot for one token
    async fn recompute_one(
        &self,
        token: &tokens::Model,
        now: i64,
    ) -> Result<TrendMetrics, TrendError> {
        let window_start = now - TREND_WINDOW_SECS;

        let holders = HolderBalances::find()
            .filter(holder_balances::Column::TokenAddress.eq(token.address.clone()))
            .all(&self.db)
            .await
            .map_err(|e| TrendError::DatabaseError(format!("Failed to load holders: {}", e)))?;

        let window_transfers = Transfers::find()
            .filter(transfers::Column::TokenAddress.eq(token.address.clone()))
            .filter(transfers::Column::Timestamp.gt(window_start))
            .all(&self.db)
            .await
            .map_err(|e| TrendError::DatabaseError(format!("Failed to load transfers: {}", e)))?;

        let holder_rows: Vec<(f64, i64)> = holders
            .iter()
            .map(|h| (h.balance.parse::<f64>().unwrap_or(0.0), h.last_updated))
            .collect();
        let amounts: Vec<f64> = window_transfers
            .iter()
            .map(|t| t.amount.parse::<f64>().unwrap_or(0.0))
            .collect();

        let metrics = compute_metrics(&token.total_supply, &holder_rows, &amounts, window_start);

        let snapshot = trend_snapshots::ActiveModel {
            token_address: Set(token.address.clone()),
            velocity: Set(metrics.velocity),
            unique_holders: Set(metrics.unique_holders),
            large_transactions: Set(metrics.large_transactions),
            growth_rate: Set(metrics.growth_rate),
            whale_concentration: Set(metrics.whale_concentration),
            trend_score: Set(metrics.trend_score),
            last_calculated: Set(now),
        };

        TrendSnapshots::insert(snapshot)
            .on_conflict(
                OnConflict::column(trend_snapshots::Column::TokenAddress)
                    .update_columns([
                        trend_snapshots::Column::Velocity,
                        trend_snapshots::Column::UniqueHolders,
                        trend_snapshots::Column::LargeTransactions,
                        trend_snapshots::Column::GrowthRate,
                        trend_snapshots::Column::WhaleConcentration,
                        trend_snapshots::Column::TrendScore,
                        trend_snapshots::Column::LastCalculated,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .map_err(|e| TrendError::DatabaseError(format!("Failed to upsert snapshot: {}", e)))?;

        Ok(metrics)
    }
}

/// A token is due when it has no snapshot or the last one is older than
/// the cooldown
pub(crate) fn is_due(last_calculated: Option<i64>, now: i64, cooldown_secs: i64) -> bool {
    match last_calculated {
        None => true,
        Some(last) => now - last > cooldown_secs,
    }
}

/// All window metrics from in-memory rows.
///
/// `holder_rows` is (balance, last_updated) for every tracked holder of
/// the token; `amounts` is every in-window transfer amount.
pub(crate) fn compute_metrics(
    total_supply_raw: &str,
    holder_rows: &[(f64, i64)],
    amounts: &[f64],
    window_start: i64,
) -> TrendMetrics {
    let positive: Vec<f64> = holder_rows
        .iter()
        .filter(|(balance, _)| *balance > 0.0)
        .map(|(balance, _)| *balance)
        .collect();

    let unique_holders = positive.len() as i64;

    // Baseline for growth: holders already tracked with a positive balance
    // before the window opened
    let baseline = holder_rows
        .iter()
        .filter(|(balance, last_updated)| *balance > 0.0 && *last_updated < window_start)
        .count() as i64;

    let growth_rate = if baseline > 0 {
        ((unique_holders - baseline) as f64 / baseline as f64) * 100.0
    } else {
        0.0
    };

    let supply_whole = normalize_supply(total_supply_raw);
    let velocity = if supply_whole > 0.0 {
        (amounts.len() as f64 / supply_whole) * 100.0
    } else {
        0.0
    };

    let large_transactions = match large_transaction_threshold(amounts) {
        Some(threshold) => amounts.iter().filter(|a| **a >= threshold).count() as i64,
        None => 0,
    };

    let supply_raw = total_supply_raw.parse::<f64>().unwrap_or(0.0);
    let whale_concentration = if supply_raw > 0.0 && !positive.is_empty() {
        (top_holder_sum(&positive, 10) / supply_raw) * 100.0
    } else {
        0.0
    };

    let trend_score = trend_score(
        velocity,
        unique_holders,
        growth_rate,
        large_transactions,
        whale_concentration,
    );

    TrendMetrics {
        velocity,
        unique_holders,
        large_transactions,
        growth_rate,
        whale_concentration,
        trend_score,
    }
}

/// 90th-percentile amount: the value at index n/10 of the descending
/// sort. Counting ties at the threshold as large keeps the top decile
/// inclusive.
pub(crate) fn large_transaction_threshold(amounts: &[f64]) -> Option<f64> {
    if amounts.is_empty() {
        return None;
    }
    let mut sorted = amounts.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    sorted.get(sorted.len() / 10).copied()
}

/// Sum of the `n` largest balances
pub(crate) fn top_holder_sum(balances: &[f64], n: usize) -> f64 {
    let mut sorted = balances.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    sorted.iter().take(n).sum()
}

/// Composite score with a concentration penalty above 80%
pub(crate) fn trend_score(
    velocity: f64,
    unique_holders: i64,
    growth_rate: f64,
    large_transactions: i64,
    whale_concentration: f64,
) -> f64 {
    let penalty = if whale_concentration > 80.0 {
        (whale_concentration - 80.0) * 0.05
    } else {
        0.0
    };

    velocity * 0.3
        + (unique_holders as f64 / 100.0) * 0.2
        + growth_rate * 0.3
        + large_transactions as f64 * 0.2
        - penalty
}

/// Raw uint256 supply string to whole tokens. The ABI carries no
/// decimals() so supply is normalized at the 18-decimal convention;
/// values outside Decimal range fall back to f64 parsing.
pub(crate) fn normalize_supply(raw: &str) -> f64 {
    match Decimal::from_str(raw) {
        Ok(supply) => {
            let divisor = Decimal::from_str("1000000000000000000").unwrap_or(Decimal::ONE);
            (supply / divisor).to_f64().unwrap_or(0.0)
        }
        Err(_) => raw.parse::<f64>().unwrap_or(0.0) / 1e18,
    }
}
