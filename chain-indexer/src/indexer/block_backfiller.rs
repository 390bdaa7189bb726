//! Block backfiller (backward, spec §4.6): walks the block store from its
//! current minimum down to a configured target, filling in history the
//! live indexer never covered.
//!
//! Historical blocks are assumed settled, so unlike
//! [`BlockIndexer`](super::BlockIndexer) this worker performs no reorg
//! check. It also never enriches with receipts — a tx-bearing row it
//! writes is picked up later by the historical priority-fee backfiller
//! (spec §4.9, §5: "a block row visible in the store with `tx_count > 0`
//! and `avg_priority_fee_gwei = null` was written by the historical
//! backfiller path, not the live path").

use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::Transaction as _;
use rpc_client::{FullBlock, RpcClient};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::metrics::{self, PerBlockMetricsInput, TxFeeInput};
use crate::ports::{BlockStore, Clock, ConflictPolicy, FinalityStore, IndexerStateStore, StatsStore, SystemClock, WorkerStatusStore};
use crate::types::entities::{Block, WorkerState, WorkerStatus};
use crate::types::primitives::BlockNumber;
use crate::util::chunk_descending;

/// Name this worker's cursor and status rows are keyed under.
pub const WORKER_NAME: &str = "block_backfiller";

/// Tunables for the block backfiller loop.
#[derive(Debug, Clone, Copy)]
pub struct BlockBackfillerConfig {
    /// Blocks fetched per batch.
    pub batch_size: u64,
    /// Sleep between batches, and while there is nothing left to do.
    pub poll_interval: Duration,
    /// Sleep applied after an iteration fails, before retrying.
    pub worker_error_sleep: Duration,
    /// Lowest block number to backfill down to (inclusive).
    pub target_block: u64,
}

/// Backward block backfiller (spec §4.6).
pub struct BlockBackfiller<S, C = SystemClock> {
    store: S,
    rpc: Arc<RpcClient>,
    clock: C,
    config: BlockBackfillerConfig,
}

impl<S> BlockBackfiller<S, SystemClock>
where
    S: BlockStore + IndexerStateStore + FinalityStore + StatsStore + WorkerStatusStore + Clone + Send + Sync + 'static,
{
    /// Build a backfiller using the system clock.
    pub fn new(store: S, rpc: Arc<RpcClient>, config: BlockBackfillerConfig) -> Self {
        Self::with_clock(store, rpc, config, SystemClock)
    }
}

impl<S, C> BlockBackfiller<S, C>
where
    S: BlockStore + IndexerStateStore + FinalityStore + StatsStore + WorkerStatusStore + Clone + Send + Sync + 'static,
    C: Clock,
{
    /// Build a backfiller with an injected clock (for deterministic tests).
    pub fn with_clock(store: S, rpc: Arc<RpcClient>, config: BlockBackfillerConfig, clock: C) -> Self {
        Self { store, rpc, clock, config }
    }

    /// Run the backfill loop until `cancel` fires or the target is reached.
    ///
    /// # Errors
    /// Only returns an error for conditions outside the worker's own
    /// recovery loop; operational errors are caught per iteration, logged,
    /// and reflected in the persisted worker status.
    #[instrument(skip(self, cancel), name = "block_backfiller")]
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut floor = self.determine_start().await?;
        self.mark_status(WorkerState::Starting, None).await;

        loop {
            if cancel.is_cancelled() {
                self.mark_status(WorkerState::Stopped, None).await;
                return Ok(());
            }

            match self.tick(floor).await {
                Ok(Some(next_floor)) => {
                    floor = next_floor;
                    self.mark_status(WorkerState::Running, None).await;
                }
                Ok(None) => {
                    self.mark_status(WorkerState::Idle, None).await;
                }
                Err(err) => {
                    error!(error = %err, "block backfiller iteration failed");
                    self.mark_status(WorkerState::Error, Some(err.to_string())).await;
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(self.config.worker_error_sleep) => {}
                    }
                    continue;
                }
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    self.mark_status(WorkerState::Stopped, None).await;
                    return Ok(());
                }
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Determine the starting floor: the lowest block number not yet
    /// covered. If the cursor has never run, adopt the store's current
    /// minimum; if the store is empty, there is nothing to walk back from.
    async fn determine_start(&self) -> Result<u64> {
        if let Some((position, _)) = self.store.get_cursor(WORKER_NAME).await? {
            return Ok(position);
        }

        match self.store.min_block_number().await? {
            Some(min) => Ok(min.value()),
            None => {
                info!("store has no blocks yet, nothing to backfill");
                Ok(self.config.target_block)
            }
        }
    }

    /// Process one batch below `floor`. Returns `Ok(Some(new_floor))` on
    /// progress, `Ok(None)` when the target has been reached or the next
    /// batch came back empty.
    async fn tick(&self, floor: u64) -> Result<Option<u64>> {
        if floor <= self.config.target_block {
            return Ok(None);
        }

        let batch_end = floor - 1;
        if batch_end < self.config.target_block {
            return Ok(None);
        }

        let Some((batch_start, batch_end)) = chunk_descending(batch_end, self.config.target_block, self.config.batch_size)
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        let numbers: Vec<u64> = (batch_start..=batch_end).collect();
        let fetched = self.rpc.blocks_by_numbers(&numbers).await;
        let mut blocks: Vec<FullBlock> = fetched.into_iter().filter_map(std::result::Result::ok).flatten().collect();

        if blocks.is_empty() {
            warn!(batch_start, batch_end, "no blocks returned for backfill batch, will retry");
            return Ok(None);
        }

        blocks.sort_by_key(|b| b.header.number);

        let mut entities = compute_entities_backward(&blocks)?;
        self.reconcile_finality(&mut entities).await?;

        self.store.insert_blocks(&entities, ConflictPolicy::DoNothing).await?;

        let min_number = entities.first().expect("non-empty batch").block_number.value();
        let max_number = entities.last().expect("non-empty batch").block_number.value();
        self.store.update_table_stats("blocks", min_number, max_number, entities.len() as u64).await?;
        self.store.set_cursor(WORKER_NAME, min_number, None).await?;

        Ok(Some(min_number))
    }

    async fn reconcile_finality(&self, entities: &mut [Block]) -> Result<()> {
        for block in entities.iter_mut() {
            if let Some(finality) = self.store.get_finality(block.block_number).await? {
                block.finalized = true;
                block.finalized_at = Some(finality.finalized_at);
                block.milestone_id = Some(finality.milestone_id);
                block.time_to_finality_sec =
                    Some((finality.finalized_at - block.timestamp).num_milliseconds() as f64 / 1000.0);
            }
        }
        Ok(())
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

/// Translate a single backward batch into domain entities. The first
/// (lowest-numbered) block in the batch has no known predecessor timestamp
/// within this batch, so its `block_time_sec` is left null (spec §4.6).
fn compute_entities_backward(blocks: &[FullBlock]) -> Result<Vec<Block>> {
    let mut entities = Vec::with_capacity(blocks.len());
    let mut previous_timestamp: Option<i64> = None;

    for block in blocks {
        let base_fee_per_gas = u128::from(block.header.base_fee_per_gas.unwrap_or(0));
        let transactions: Vec<TxFeeInput> = block
            .transactions
            .txns()
            .map(|tx| TxFeeInput {
                max_priority_fee_per_gas: tx.max_priority_fee_per_gas(),
                gas_price: tx.gas_price(),
                gas_used: None,
            })
            .collect();

        #[allow(clippy::cast_possible_wrap)]
        let timestamp = block.header.timestamp as i64;

        let input = PerBlockMetricsInput { base_fee_per_gas, gas_used: block.header.gas_used, timestamp, transactions, previous_timestamp };
        let computed = metrics::compute_per_block_metrics(&input);

        entities.push(Block {
            block_number: BlockNumber::new(block.header.number),
            block_hash: block.header.hash.to_string(),
            parent_hash: block.header.parent_hash.to_string(),
            timestamp: chrono::DateTime::from_timestamp(timestamp, 0).unwrap_or_else(chrono::Utc::now),
            gas_used: block.header.gas_used,
            gas_limit: block.header.gas_limit,
            tx_count: u32::try_from(block.transactions.len()).unwrap_or(u32::MAX),
            base_fee_gwei: computed.base_fee_gwei,
            min_priority_fee_gwei: computed.priority_fee.min_priority_fee_gwei,
            max_priority_fee_gwei: computed.priority_fee.max_priority_fee_gwei,
            median_priority_fee_gwei: computed.priority_fee.median_priority_fee_gwei,
            avg_priority_fee_gwei: computed.priority_fee.avg_priority_fee_gwei,
            total_priority_fee_gwei: computed.priority_fee.total_priority_fee_gwei,
            block_time_sec: computed.block_time_sec,
            mgas_per_sec: computed.mgas_per_sec,
            tps: computed.tps,
            finalized: false,
            finalized_at: None,
            milestone_id: None,
            time_to_finality_sec: None,
        });

        previous_timestamp = Some(timestamp);
    }

    Ok(entities)
}
