//! Milestone backfiller (backward, spec §4.7): walks milestone sequence ids
//! from the store's current minimum down to a configured target,
//! populating `block_finality` for blocks that were backfilled before
//! their milestone was known.
//!
//! Symmetric to [`MilestoneIndexer`](super::MilestoneIndexer) but without
//! its LRU predecessor check — historical sequence ids are assumed
//! published and contiguous on the oracle side; a sequence id the oracle
//! can't return today is simply skipped and retried on a later run.

use std::sync::Arc;
use std::time::Duration;

use oracle_client::OracleClient;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::indexer::FinalityWriter;
use crate::ports::{BlockStore, Clock, FinalityStore, IndexerStateStore, MilestoneStore, StatsStore, SystemClock, WorkerStatusStore};
use crate::types::entities::{Milestone, WorkerState, WorkerStatus};
use crate::types::primitives::{BlockNumber, SequenceId};
use crate::util::chunk_descending;

/// Name this worker's cursor and status rows are keyed under.
pub const WORKER_NAME: &str = "milestone_backfiller";

/// Tunables for the milestone backfiller loop.
#[derive(Debug, Clone, Copy)]
pub struct MilestoneBackfillerConfig {
    /// Sequence ids fetched per batch.
    pub batch_size: u64,
    /// Sleep between batches, and while there is nothing left to do.
    pub poll_interval: Duration,
    /// Sleep applied after an iteration fails, before retrying.
    pub worker_error_sleep: Duration,
    /// Lowest sequence id to backfill down to (inclusive).
    pub target_sequence: u64,
}

/// Backward milestone backfiller (spec §4.7).
pub struct MilestoneBackfiller<S, C = SystemClock> {
    store: S,
    oracle: Arc<OracleClient>,
    finality: Arc<FinalityWriter<S>>,
    clock: C,
    config: MilestoneBackfillerConfig,
}

impl<S> MilestoneBackfiller<S, SystemClock>
where
    S: MilestoneStore + IndexerStateStore + StatsStore + WorkerStatusStore + BlockStore + FinalityStore + Clone + Send + Sync + 'static,
{
    /// Build a milestone backfiller using the system clock.
    pub fn new(store: S, oracle: Arc<OracleClient>, finality: Arc<FinalityWriter<S>>, config: MilestoneBackfillerConfig) -> Self {
        Self::with_clock(store, oracle, finality, config, SystemClock)
    }
}

impl<S, C> MilestoneBackfiller<S, C>
where
    S: MilestoneStore + IndexerStateStore + StatsStore + WorkerStatusStore + BlockStore + FinalityStore + Clone + Send + Sync + 'static,
    C: Clock,
{
    /// Build a milestone backfiller with an injected clock (for
    /// deterministic tests).
    pub fn with_clock(store: S, oracle: Arc<OracleClient>, finality: Arc<FinalityWriter<S>>, config: MilestoneBackfillerConfig, clock: C) -> Self {
        Self { store, oracle, finality, clock, config }
    }

    /// Run the backfill loop until `cancel` fires or the target is reached.
    ///
    /// # Errors
    /// Only returns an error for conditions outside the worker's own
    /// recovery loop; operational errors are caught per iteration, logged,
    /// and reflected in the persisted worker status.
    #[instrument(skip(self, cancel), name = "milestone_backfiller")]
    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) -> Result<()> {
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
                    error!(error = %err, "milestone backfiller iteration failed");
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

    /// Determine the starting floor (spec §4.7, symmetric to §4.5 startup).
    async fn determine_start(&self) -> Result<u64> {
        if let Some((position, _)) = self.store.get_cursor(WORKER_NAME).await? {
            return Ok(position);
        }

        match self.store.min_sequence_id().await? {
            Some(min) => Ok(min),
            None => {
                info!("store has no milestones yet, nothing to backfill");
                Ok(self.config.target_sequence)
            }
        }
    }

    /// Process one batch below `floor`. Returns `Ok(Some(new_floor))` on
    /// progress, `Ok(None)` when the target has been reached or the batch
    /// came back entirely empty.
    async fn tick(&self, floor: u64) -> Result<Option<u64>> {
        if floor <= self.config.target_sequence {
            return Ok(None);
        }

        let batch_end = floor - 1;
        if batch_end < self.config.target_sequence {
            return Ok(None);
        }

        let Some((batch_start, batch_end)) = chunk_descending(batch_end, self.config.target_sequence, self.config.batch_size)
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        let ids: Vec<u64> = (batch_start..=batch_end).collect();
        let fetched = self.oracle.milestones(&ids).await;

        let mut found = 0u64;
        for (seq_id, milestone) in ids.iter().copied().zip(fetched) {
            let Some(oracle_milestone) = milestone else {
                warn!(sequence_id = seq_id, "oracle has no milestone at this sequence id, skipping");
                continue;
            };

            let milestone = Milestone {
                sequence_id: SequenceId::new(seq_id),
                milestone_id: oracle_milestone.end_block,
                start_block: BlockNumber::new(oracle_milestone.start_block),
                end_block: BlockNumber::new(oracle_milestone.end_block),
                hash: oracle_milestone.hash.clone(),
                proposer: oracle_milestone.proposer().map(str::to_owned),
                timestamp: chrono::DateTime::from_timestamp(oracle_milestone.timestamp, 0).unwrap_or_else(chrono::Utc::now),
            };

            self.store.insert_milestone(&milestone).await?;
            self.finality.write(&milestone).await?;
            self.store.update_table_stats("milestones", seq_id, seq_id, 1).await?;
            found += 1;
        }

        if found == 0 {
            warn!(batch_start, batch_end, "no milestones found for backfill batch, will retry");
            return Ok(None);
        }

        self.store.set_cursor(WORKER_NAME, batch_start, None).await?;
        Ok(Some(batch_start))
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
        assert_eq!(WORKER_NAME, "milestone_backfiller");
    }
}
