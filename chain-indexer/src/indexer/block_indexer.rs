//! Block indexer (forward, spec §4.4): polls the chain tip, validates the
//! parent-hash chain, enriches with receipts, and inserts into the store.
//!
//! This is the only writer that inserts fresh block rows on the live path;
//! `ON CONFLICT DO NOTHING` keeps it authoritative over the backfillers,
//! which must never overwrite a row it has already written.

use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::Transaction as _;
use rpc_client::{FullBlock, RpcClient};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::indexer::{CheckpointManager, EnrichOptions, Enricher, ReorgCheckResult, ReorgHandler};
use crate::metrics::{self, PerBlockMetricsInput, TxFeeInput};
use crate::ports::{
    BlockStore, Clock, ConflictPolicy, FinalityStore, IndexerStateStore, StatsStore, SystemClock, WorkerStatusStore,
};
use crate::types::entities::{Block, WorkerState, WorkerStatus};
use crate::types::primitives::BlockNumber;

/// Name this worker's cursor and status rows are keyed under.
pub const WORKER_NAME: &str = "block_indexer";

/// Tunables for the block indexer loop (spec §4.4, §5).
#[derive(Debug, Clone, Copy)]
pub struct BlockIndexerConfig {
    /// Blocks fetched per batch.
    pub batch_size: u64,
    /// Poll interval once caught up with the tip.
    pub poll_interval: Duration,
    /// Poll interval while lagging by more than `lag_threshold_blocks`.
    pub fast_poll_interval: Duration,
    /// Lag, in blocks, past which the fast poll interval applies.
    pub lag_threshold_blocks: u64,
    /// Sleep applied after an iteration fails, before retrying.
    pub worker_error_sleep: Duration,
    /// Depth past which a detected reorg is treated as catastrophic.
    pub max_reorg_depth: u64,
    /// Number of most-recent block-hash rows retained for reorg comparison.
    pub keep_blocks: u64,
}

/// Forward block indexer (spec §4.4).
pub struct BlockIndexer<S, C = SystemClock> {
    store: S,
    rpc: Arc<RpcClient>,
    enricher: Arc<Enricher>,
    checkpoint: CheckpointManager<S>,
    reorg: ReorgHandler<S>,
    enrich_options: EnrichOptions,
    clock: C,
    config: BlockIndexerConfig,
}

impl<S> BlockIndexer<S, SystemClock>
where
    S: BlockStore + IndexerStateStore + FinalityStore + StatsStore + WorkerStatusStore + Clone + Send + Sync + 'static,
{
    /// Build a block indexer using the system clock.
    pub fn new(store: S, rpc: Arc<RpcClient>, enricher: Arc<Enricher>, enrich_options: EnrichOptions, config: BlockIndexerConfig) -> Self {
        Self::with_clock(store, rpc, enricher, enrich_options, config, SystemClock)
    }
}

impl<S, C> BlockIndexer<S, C>
where
    S: BlockStore + IndexerStateStore + FinalityStore + StatsStore + WorkerStatusStore + Clone + Send + Sync + 'static,
    C: Clock,
{
    /// Build a block indexer with an injected clock (for deterministic tests).
    pub fn with_clock(
        store: S,
        rpc: Arc<RpcClient>,
        enricher: Arc<Enricher>,
        enrich_options: EnrichOptions,
        config: BlockIndexerConfig,
        clock: C,
    ) -> Self {
        Self {
            checkpoint: CheckpointManager::new(store.clone(), WORKER_NAME),
            reorg: ReorgHandler::with_retention(store.clone(), config.keep_blocks)
                .with_max_depth(config.max_reorg_depth)
                .with_chain_source(rpc.clone()),
            store,
            rpc,
            enricher,
            enrich_options,
            clock,
            config,
        }
    }

    /// Run the indexing loop until `cancel` fires.
    ///
    /// # Errors
    /// Only returns an error for conditions outside the worker's own
    /// recovery loop (none today); operational errors are caught per
    /// iteration, logged, and reflected in the persisted worker status.
    #[instrument(skip(self, cancel), name = "block_indexer")]
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut state = self.determine_start().await?;
        self.mark_status(WorkerState::Starting, None).await;

        loop {
            if cancel.is_cancelled() {
                self.mark_status(WorkerState::Stopped, None).await;
                return Ok(());
            }

            match self.tick(&mut state, &cancel).await {
                Ok(TickOutcome::Retry) => continue,
                Ok(TickOutcome::Sleep(duration)) => {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            self.mark_status(WorkerState::Stopped, None).await;
                            return Ok(());
                        }
                        () = tokio::time::sleep(duration) => {}
                    }
                }
                Err(err) => {
                    error!(error = %err, "block indexer iteration failed");
                    self.mark_status(WorkerState::Error, Some(err.to_string())).await;
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(self.config.worker_error_sleep) => {}
                    }
                }
            }
        }
    }

    /// Determine the starting cursor position (spec §4.4 "Startup").
    async fn determine_start(&self) -> Result<LoopState> {
        let checkpoint = self.checkpoint.load().await?;
        if !checkpoint.is_empty() {
            return Ok(LoopState {
                next_block: checkpoint.next_block(),
                last_hash: checkpoint.hash,
                last_timestamp: self.lookup_timestamp(checkpoint.position).await?,
            });
        }

        if let Some(max) = self.store.max_block_number().await? {
            let last_hash = self.store.get_block_hash(max).await?;
            return Ok(LoopState {
                next_block: max.next(),
                last_hash,
                last_timestamp: self.lookup_timestamp(max).await?,
            });
        }

        let tip = self.rpc.latest_block_number().await?;
        info!(tip, "no prior state, initialising cursor at chain tip");
        Ok(LoopState {
            next_block: BlockNumber::new(tip).next(),
            last_hash: None,
            last_timestamp: None,
        })
    }

    async fn lookup_timestamp(&self, block_number: BlockNumber) -> Result<Option<i64>> {
        let rows = self.store.block_timestamps(&[block_number]).await?;
        Ok(rows.first().map(|(_, ts)| ts.timestamp()))
    }

    /// Run one loop iteration. Never leaves `state` in a half-applied state:
    /// either the whole batch is accounted for (inserted or explicitly
    /// deferred) or an error is returned and `state` is untouched.
    async fn tick(&self, state: &mut LoopState, cancel: &CancellationToken) -> Result<TickOutcome> {
        let tip = self.rpc.latest_block_number().await?;

        if tip < state.next_block.value() {
            self.mark_status(WorkerState::Idle, None).await;
            return Ok(TickOutcome::Sleep(self.config.poll_interval));
        }

        let batch_end = tip.min(state.next_block.value().saturating_add(self.config.batch_size - 1));
        let numbers: Vec<u64> = (state.next_block.value()..=batch_end).collect();

        let fetched = self.rpc.blocks_by_numbers(&numbers).await;
        let mut blocks: Vec<FullBlock> = Vec::new();
        for result in fetched {
            match result {
                Ok(Some(block)) => blocks.push(block),
                _ => break,
            }
        }

        if blocks.is_empty() {
            self.mark_status(WorkerState::Idle, None).await;
            return Ok(TickOutcome::Sleep(self.config.poll_interval));
        }

        blocks.sort_by_key(|b| b.header.number);

        let blocks = match self.resolve_reorg(state, blocks).await? {
            Some(blocks) => blocks,
            None => return Ok(TickOutcome::Retry),
        };

        self.mark_status(WorkerState::Running, None).await;

        let mut entities = self.compute_entities(&blocks, state.last_timestamp).await?;

        self.enricher.enrich_reliably(&mut entities, &self.enrich_options, cancel).await?;

        self.reconcile_finality(&mut entities).await?;

        self.store.insert_blocks(&entities, ConflictPolicy::DoNothing).await?;
        ::metrics::counter!("chain_indexer_blocks_indexed_total").increment(entities.len() as u64);

        for entity in &entities {
            self.reorg
                .record_block(entity.block_number, &entity.block_hash, &entity.parent_hash, entity.timestamp)
                .await?;
        }

        let last = entities.last().expect("non-empty batch");
        self.checkpoint.update(last.block_number, &last.block_hash).await?;

        let min_number = entities.first().expect("non-empty batch").block_number.value();
        let max_number = last.block_number.value();
        self.store
            .update_table_stats("blocks", min_number, max_number, entities.len() as u64)
            .await?;

        state.next_block = last.block_number.next();
        state.last_hash = Some(last.block_hash.clone());
        state.last_timestamp = Some(last.timestamp.timestamp());

        let lag = tip.saturating_sub(max_number);
        ::metrics::gauge!("chain_indexer_block_lag").set(lag as f64);
        let sleep = crate::util::adaptive_poll_delay(
            lag,
            self.config.lag_threshold_blocks,
            self.config.fast_poll_interval,
            self.config.poll_interval,
        );
        Ok(TickOutcome::Sleep(sleep))
    }

    /// Validate the parent-hash chain and resolve a detected reorg (spec
    /// §4.4 step 4). Returns `Ok(None)` when the caller should restart the
    /// loop immediately (a reorg was rolled back and the cursor rewound).
    async fn resolve_reorg(&self, state: &mut LoopState, mut blocks: Vec<FullBlock>) -> Result<Option<Vec<FullBlock>>> {
        for i in 0..blocks.len() {
            let parent_hash = blocks[i].header.parent_hash.to_string();
            let expected = if i == 0 { state.last_hash.clone() } else { Some(blocks[i - 1].header.hash.to_string()) };

            let Some(expected_hash) = expected else {
                continue;
            };
            if parent_hash == expected_hash {
                continue;
            }

            if i > 0 {
                // Internal inconsistency within a single fetch, not yet
                // grounded in the store. Truncate before the offending
                // block; the next iteration's i==0 check is store-grounded
                // and will catch a genuine reorg.
                warn!(block = blocks[i].header.number, "mid-batch parent-hash mismatch, truncating batch");
                blocks.truncate(i);
                break;
            }

            let block_number = BlockNumber::new(blocks[0].header.number);
            let check = self.reorg.check_for_reorg(block_number, &parent_hash).await?;
            match check {
                ReorgCheckResult::ReorgDetected { fork_point, .. } => {
                    let stats = self
                        .reorg
                        .handle_reorg(block_number, fork_point, expected_hash, parent_hash.clone())
                        .await?;
                    let fork_hash = self.store.get_block_hash(stats.fork_point).await?.unwrap_or_default();
                    self.checkpoint.reset_to(stats.fork_point, &fork_hash).await?;
                    state.next_block = stats.fork_point.next();
                    state.last_hash = Some(fork_hash);
                    state.last_timestamp = self.lookup_timestamp(stats.fork_point).await?;
                    return Ok(None);
                }
                ReorgCheckResult::ParentNotFound | ReorgCheckResult::NoReorg | ReorgCheckResult::FirstBlock => {
                    warn!(block = block_number.value(), ?check, "unresolved parent mismatch, proceeding without rollback");
                }
            }
        }

        if blocks.is_empty() { Ok(None) } else { Ok(Some(blocks)) }
    }

    /// Translate fetched blocks into domain entities with per-block metrics
    /// applied, but no receipt-derived or finality fields yet.
    async fn compute_entities(&self, blocks: &[FullBlock], mut previous_timestamp: Option<i64>) -> Result<Vec<Block>> {
        let mut entities = Vec::with_capacity(blocks.len());

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

            let input = PerBlockMetricsInput {
                base_fee_per_gas,
                gas_used: block.header.gas_used,
                timestamp,
                transactions,
                previous_timestamp,
            };
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

    /// Reconcile finality for freshly-fetched blocks against any
    /// pre-existing finality record (spec §4.4 step 8): a milestone can
    /// arrive before the block it covers has been indexed.
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

/// In-loop state threaded across iterations.
struct LoopState {
    next_block: BlockNumber,
    last_hash: Option<String>,
    last_timestamp: Option<i64>,
}

enum TickOutcome {
    /// Restart the loop immediately (no sleep); used after a reorg rewind.
    Retry,
    /// Sleep for the given duration before the next iteration.
    Sleep(Duration),
}
