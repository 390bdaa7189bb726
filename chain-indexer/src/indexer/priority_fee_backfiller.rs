//! Historical priority-fee backfiller (spec §4.9): a slow-moving worker
//! that fills `avg_priority_fee_gwei`/`total_priority_fee_gwei` for rows
//! the live path or the block backfiller left null.
//!
//! Owns a distinct cursor from every other worker, since it walks the
//! table by "known-bad" rows rather than by contiguous block number.
//! Receipt fetches here are plain fan-out, not
//! [`receipts_by_blocks_reliably`](rpc_client::RpcClient::receipts_by_blocks_reliably):
//! a block whose receipts fail to fetch is simply dropped from this pass
//! and picked up the next time its window is revisited.

use std::sync::Arc;
use std::time::Duration;

use rpc_client::{Receipt, RpcClient};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::metrics::{self, ReceiptFeeInput};
use crate::ports::{BlockStore, Clock, IndexerStateStore, SystemClock, WorkerStatusStore};
use crate::types::entities::{WorkerState, WorkerStatus};
use crate::types::primitives::BlockNumber;

/// Name this worker's cursor and status rows are keyed under.
pub const WORKER_NAME: &str = "historical_priority_fee_backfiller";

/// Window searched per slide, as a multiple of `batch_size` (spec §4.9).
const WINDOW_MULTIPLIER: u64 = 10;

/// Tunables for the priority-fee backfiller loop.
#[derive(Debug, Clone, Copy)]
pub struct PriorityFeeBackfillerConfig {
    /// Maximum candidate rows fetched/updated per batch.
    pub batch_size: u64,
    /// Sleep between batches.
    pub poll_interval: Duration,
    /// Sleep applied after an iteration fails, before retrying.
    pub worker_error_sleep: Duration,
    /// Lowest block number to search down to (inclusive).
    pub target_block: u64,
}

/// Historical priority-fee backfiller (spec §4.9).
pub struct PriorityFeeBackfiller<S, C = SystemClock> {
    store: S,
    rpc: Arc<RpcClient>,
    clock: C,
    config: PriorityFeeBackfillerConfig,
}

enum TickOutcome {
    /// Target reached, nothing left in range.
    Done,
    /// Found and updated `count` candidate rows; cursor unchanged.
    Processed(u64),
    /// No candidates in the current window; slid down to `new_cursor`.
    Slid(u64),
}

impl<S> PriorityFeeBackfiller<S, SystemClock>
where
    S: BlockStore + IndexerStateStore + WorkerStatusStore + Clone + Send + Sync + 'static,
{
    /// Build a backfiller using the system clock.
    pub fn new(store: S, rpc: Arc<RpcClient>, config: PriorityFeeBackfillerConfig) -> Self {
        Self::with_clock(store, rpc, config, SystemClock)
    }
}

impl<S, C> PriorityFeeBackfiller<S, C>
where
    S: BlockStore + IndexerStateStore + WorkerStatusStore + Clone + Send + Sync + 'static,
    C: Clock,
{
    /// Build a backfiller with an injected clock (for deterministic tests).
    pub fn with_clock(store: S, rpc: Arc<RpcClient>, config: PriorityFeeBackfillerConfig, clock: C) -> Self {
        Self { store, rpc, clock, config }
    }

    /// Run the backfill loop until `cancel` fires or the target is reached.
    ///
    /// # Errors
    /// Only returns an error for conditions outside the worker's own
    /// recovery loop; operational errors are caught per iteration, logged,
    /// and reflected in the persisted worker status.
    #[instrument(skip(self, cancel), name = "priority_fee_backfiller")]
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut cursor = self.determine_start().await?;
        self.mark_status(WorkerState::Starting, None).await;

        loop {
            if cancel.is_cancelled() {
                self.mark_status(WorkerState::Stopped, None).await;
                return Ok(());
            }

            match self.tick(cursor).await {
                Ok(TickOutcome::Done) => {
                    self.mark_status(WorkerState::Idle, None).await;
                    tokio::select! {
                        () = cancel.cancelled() => {
                            self.mark_status(WorkerState::Stopped, None).await;
                            return Ok(());
                        }
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Ok(TickOutcome::Processed(count)) => {
                    info!(count, "priority fee backfill batch updated");
                    self.mark_status(WorkerState::Running, None).await;
                    tokio::select! {
                        () = cancel.cancelled() => {
                            self.mark_status(WorkerState::Stopped, None).await;
                            return Ok(());
                        }
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Ok(TickOutcome::Slid(new_cursor)) => {
                    cursor = new_cursor;
                    self.mark_status(WorkerState::Running, None).await;
                    // No sleep: an empty window is cheap to check, and the
                    // worker should reach live data or the target quickly.
                }
                Err(err) => {
                    error!(error = %err, "priority fee backfiller iteration failed");
                    self.mark_status(WorkerState::Error, Some(err.to_string())).await;
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(self.config.worker_error_sleep) => {}
                    }
                }
            }
        }
    }

    async fn determine_start(&self) -> Result<u64> {
        if let Some((position, _)) = self.store.get_cursor(WORKER_NAME).await? {
            return Ok(position);
        }

        match self.store.max_block_number().await? {
            Some(max) => Ok(max.value()),
            None => {
                info!("store has no blocks yet, nothing to backfill");
                Ok(self.config.target_block)
            }
        }
    }

    async fn tick(&self, cursor: u64) -> Result<TickOutcome> {
        if cursor <= self.config.target_block {
            return Ok(TickOutcome::Done);
        }

        let window_size = self.config.batch_size.saturating_mul(WINDOW_MULTIPLIER);
        let window_from = cursor.saturating_sub(window_size).max(self.config.target_block);

        let candidates = self
            .store
            .blocks_missing_priority_fee(
                BlockNumber::new(window_from),
                BlockNumber::new(cursor),
                u32::try_from(self.config.batch_size).unwrap_or(u32::MAX),
            )
            .await?;

        if candidates.is_empty() {
            if window_from <= self.config.target_block {
                return Ok(TickOutcome::Done);
            }
            let new_cursor = window_from.saturating_sub(1);
            self.store.set_cursor(WORKER_NAME, new_cursor, None).await?;
            return Ok(TickOutcome::Slid(new_cursor));
        }

        let numbers: Vec<u64> = candidates.iter().map(|b| b.block_number.value()).collect();
        let fetched = self.rpc.receipts_by_blocks(&numbers).await;

        let mut updated = Vec::with_capacity(candidates.len());
        for (mut block, result) in candidates.into_iter().zip(fetched) {
            let receipts = match result {
                Ok(receipts) => receipts,
                Err(err) => {
                    warn!(block = block.block_number.value(), error = %err, "receipt fetch failed, will retry next window visit");
                    continue;
                }
            };

            let inputs: Vec<ReceiptFeeInput> =
                receipts.iter().map(|r| ReceiptFeeInput { effective_gas_price: r.effective_gas_price, gas_used: r.gas_used }).collect();
            let distribution = metrics::compute_receipt_priority_fee_metrics(&inputs, block.base_fee_gwei);

            block.min_priority_fee_gwei = distribution.min_priority_fee_gwei;
            block.max_priority_fee_gwei = distribution.max_priority_fee_gwei;
            block.median_priority_fee_gwei = distribution.median_priority_fee_gwei;
            block.avg_priority_fee_gwei = distribution.avg_priority_fee_gwei;
            block.total_priority_fee_gwei = distribution.total_priority_fee_gwei;
            updated.push(block);
        }

        if updated.is_empty() {
            return Ok(TickOutcome::Processed(0));
        }

        self.store.update_priority_fee_metrics(&updated).await?;
        Ok(TickOutcome::Processed(updated.len() as u64))
    }

    async fn mark_status(&self, state: WorkerState, last_error: Option<String>) {
        let now = self.clock.now();
        let status = WorkerStatus {
            worker_name: WORKER_NAME.into(),
            state,
            last_error: last_error.clone(),
            last_error_at: last_error.map(|_| now),
            updated_at: now,
        };
        if let Err(err) = self.store.upsert_worker_status(&status).await {
            warn!(error = %err, "failed to persist worker status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_name_matches_cursor_key() {
        assert_eq!(WORKER_NAME, "historical_priority_fee_backfiller");
    }
}
