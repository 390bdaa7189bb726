//! Milestone indexer (forward, spec §4.5): polls the finality oracle for
//! new milestones, writes them idempotently, and drives the finality
//! writer over each milestone's block range.
//!
//! Sequence ids are contiguous by construction on the oracle side; this
//! worker never advances its cursor past a gap or a broken predecessor
//! chain, so a milestone row is never inserted with in an unverifiable
//! position in the sequence.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashSet;
use oracle_client::OracleClient;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::indexer::FinalityWriter;
use crate::ports::{BlockStore, Clock, FinalityStore, IndexerStateStore, MilestoneStore, StatsStore, SystemClock, WorkerStatusStore};
use crate::types::entities::{Milestone, WorkerState, WorkerStatus};
use crate::types::primitives::{BlockNumber, SequenceId};

/// Name this worker's cursor and status rows are keyed under.
pub const WORKER_NAME: &str = "milestone_indexer";

/// Capacity of the recently-seen sequence id set (spec §4.5 "State").
const SEEN_SET_CAPACITY: usize = 1000;

/// Tunables for the milestone indexer loop.
#[derive(Debug, Clone, Copy)]
pub struct MilestoneIndexerConfig {
    /// Sequence ids fetched per batch.
    pub batch_size: u64,
    /// Poll interval once caught up with the oracle's count.
    pub poll_interval: Duration,
    /// Sleep applied after an iteration fails, before retrying.
    pub worker_error_sleep: Duration,
}

/// Bounded recently-seen set with FIFO eviction, backed by a concurrent set
/// so lookups never block the single worker task that owns it (spec §4.5:
/// "avoids a DB round-trip per milestone" for the common case).
struct SeenSet {
    capacity: usize,
    members: DashSet<u64>,
    order: Mutex<VecDeque<u64>>,
}

impl SeenSet {
    fn with_capacity(capacity: usize) -> Self {
        Self { capacity, members: DashSet::new(), order: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    fn contains(&self, id: u64) -> bool {
        self.members.contains(&id)
    }

    fn insert(&self, id: u64) {
        if !self.members.insert(id) {
            return;
        }
        let mut order = self.order.lock().expect("seen-set lock poisoned");
        order.push_back(id);
        if order.len() > self.capacity {
            if let Some(oldest) = order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }
}

/// Forward milestone indexer (spec §4.5).
pub struct MilestoneIndexer<S, C = SystemClock> {
    store: S,
    oracle: Arc<OracleClient>,
    finality: Arc<FinalityWriter<S>>,
    seen: SeenSet,
    clock: C,
    config: MilestoneIndexerConfig,
}

impl<S> MilestoneIndexer<S, SystemClock>
where
    S: MilestoneStore + IndexerStateStore + StatsStore + WorkerStatusStore + BlockStore + FinalityStore + Clone + Send + Sync + 'static,
{
    /// Build a milestone indexer using the system clock.
    pub fn new(store: S, oracle: Arc<OracleClient>, finality: Arc<FinalityWriter<S>>, config: MilestoneIndexerConfig) -> Self {
        Self::with_clock(store, oracle, finality, config, SystemClock)
    }
}

impl<S, C> MilestoneIndexer<S, C>
where
    S: MilestoneStore + IndexerStateStore + StatsStore + WorkerStatusStore + BlockStore + FinalityStore + Clone + Send + Sync + 'static,
    C: Clock,
{
    /// Build a milestone indexer with an injected clock (for deterministic tests).
    pub fn with_clock(store: S, oracle: Arc<OracleClient>, finality: Arc<FinalityWriter<S>>, config: MilestoneIndexerConfig, clock: C) -> Self {
        Self { store, oracle, finality, seen: SeenSet::with_capacity(SEEN_SET_CAPACITY), clock, config }
    }

    /// Run the indexing loop until `cancel` fires.
    ///
    /// # Errors
    /// Only returns an error for conditions outside the worker's own
    /// recovery loop (none today); operational errors are caught per
    /// iteration, logged, and reflected in the persisted worker status.
    #[instrument(skip(self, cancel), name = "milestone_indexer")]
    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) -> Result<()> {
        let mut cursor = self.determine_start().await?;
        self.mark_status(WorkerState::Starting, None).await;

        loop {
            if cancel.is_cancelled() {
                self.mark_status(WorkerState::Stopped, None).await;
                return Ok(());
            }

            match self.tick(cursor).await {
                Ok(next_cursor) => {
                    let idle = next_cursor == cursor;
                    cursor = next_cursor;
                    self.mark_status(if idle { WorkerState::Idle } else { WorkerState::Running }, None).await;
                    tokio::select! {
                        () = cancel.cancelled() => {
                            self.mark_status(WorkerState::Stopped, None).await;
                            return Ok(());
                        }
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(err) => {
                    error!(error = %err, "milestone indexer iteration failed");
                    self.mark_status(WorkerState::Error, Some(err.to_string())).await;
                    tokio::select! {
                        () = cancel.cancelled() => return Ok(()),
                        () = tokio::time::sleep(self.config.worker_error_sleep) => {}
                    }
                }
            }
        }
    }

    /// Determine the starting cursor (spec §4.5 "Startup").
    async fn determine_start(&self) -> Result<u64> {
        if let Some((position, _)) = self.store.get_cursor(WORKER_NAME).await? {
            return Ok(position);
        }

        if let Some(max) = self.store.max_sequence_id().await? {
            return Ok(max);
        }

        let count = self.oracle.count().await?;
        info!(count, "no prior state, initialising cursor at oracle's current count");
        Ok(count)
    }

    /// Run one loop iteration. Returns the cursor position after the
    /// iteration (unchanged if nothing new was available or a gap stopped
    /// progress short).
    async fn tick(&self, cursor: u64) -> Result<u64> {
        let count = self.oracle.count().await?;
        if count <= cursor {
            return Ok(cursor);
        }

        let fetch_count = (count - cursor).min(self.config.batch_size);
        let ids: Vec<u64> = (cursor + 1..=cursor + fetch_count).collect();
        let fetched = self.oracle.milestones(&ids).await;

        let mut pairs: Vec<(u64, oracle_client::OracleMilestone)> = Vec::with_capacity(ids.len());
        for (id, milestone) in ids.into_iter().zip(fetched) {
            match milestone {
                Some(m) => pairs.push((id, m)),
                None => break, // gap: do not advance past a missing id
            }
        }

        if pairs.is_empty() {
            return Ok(cursor);
        }

        let mut new_cursor = cursor;
        for (seq_id, oracle_milestone) in pairs {
            let predecessor = seq_id - 1;
            if predecessor > 0 && !self.seen.contains(predecessor) && !self.store.sequence_id_exists(predecessor).await? {
                warn!(sequence_id = seq_id, predecessor, "predecessor missing from LRU and store, stopping batch");
                break;
            }

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
            ::metrics::counter!("chain_indexer_milestones_processed_total").increment(1);
            self.store.update_table_stats("milestones", seq_id, seq_id, 1).await?;
            self.store.set_cursor(WORKER_NAME, seq_id, None).await?;

            self.seen.insert(seq_id);
            new_cursor = seq_id;
        }

        Ok(new_cursor)
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
        assert_eq!(WORKER_NAME, "milestone_indexer");
    }

    #[test]
    fn seen_set_evicts_oldest_past_capacity() {
        let seen = SeenSet::with_capacity(2);
        seen.insert(1);
        seen.insert(2);
        seen.insert(3);
        assert!(!seen.contains(1));
        assert!(seen.contains(2));
        assert!(seen.contains(3));
    }

    #[test]
    fn seen_set_insert_is_idempotent() {
        let seen = SeenSet::with_capacity(2);
        seen.insert(1);
        seen.insert(1);
        seen.insert(1);
        assert!(seen.contains(1));
    }
}
