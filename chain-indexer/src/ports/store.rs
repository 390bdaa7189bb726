//! Storage port traits for data persistence (spec §3, §4.12).
//!
//! These traits define the contract for persisting and retrieving domain
//! entities. Infrastructure adapters implement these traits using concrete
//! storage backends (the one adapter shipped here is PostgreSQL).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::entities::{Block, BlockFinality, Milestone, TableStats, WorkerStatus};
use crate::types::primitives::BlockNumber;

/// Insert conflict policy for batch writes (spec §9: "the distinction is
/// load-bearing and must survive any schema refactor").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// `ON CONFLICT DO NOTHING` — used by the live forward indexers, which
    /// are the authoritative writer for a given key.
    DoNothing,
    /// `ON CONFLICT DO UPDATE` — used by cursor/stats maintenance where the
    /// latest write should win.
    DoUpdate,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for block persistence (spec §4.4, §4.6, §4.9, §4.10).
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Insert a batch of blocks under the given conflict policy. Returns the
    /// number of rows actually inserted (may be less than `blocks.len()`
    /// under `DoNothing` if some were already present).
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn insert_blocks(&self, blocks: &[Block], policy: ConflictPolicy) -> Result<u64>;

    /// Highest block number currently stored, if any.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn max_block_number(&self) -> Result<Option<BlockNumber>>;

    /// Lowest block number currently stored, if any.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn min_block_number(&self) -> Result<Option<BlockNumber>>;

    /// Timestamps for the subset of `block_numbers` that currently exist,
    /// probed via an `IN (array)` lookup on the primary index (never a
    /// range scan, per spec §4.10 step 1).
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn block_timestamps(
        &self,
        block_numbers: &[BlockNumber],
    ) -> Result<Vec<(BlockNumber, DateTime<Utc>)>>;

    /// Fetch candidate blocks for the historical priority-fee backfiller:
    /// `tx_count > 0` and `avg_priority_fee_gwei IS NULL OR
    /// total_priority_fee_gwei IS NULL`, within `[from, to]` inclusive.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn blocks_missing_priority_fee(
        &self,
        from: BlockNumber,
        to: BlockNumber,
        limit: u32,
    ) -> Result<Vec<Block>>;

    /// Batch-update priority-fee metrics for the given blocks (spec §4.9).
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn update_priority_fee_metrics(&self, blocks: &[Block]) -> Result<()>;

    /// Set `finalized`/`finalized_at`/`milestone_id`/`time_to_finality_sec`
    /// on rows within a recent timestamp window (spec §4.10 step 4).
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn reconcile_finality_within_window(
        &self,
        window: chrono::Duration,
        finality: &[BlockFinality],
    ) -> Result<u64>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// MILESTONE STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for milestone persistence (spec §4.5, §4.7).
#[async_trait]
pub trait MilestoneStore: Send + Sync {
    /// Idempotent insert of a single milestone row.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn insert_milestone(&self, milestone: &Milestone) -> Result<()>;

    /// Highest sequence id currently stored, if any.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn max_sequence_id(&self) -> Result<Option<u64>>;

    /// Lowest sequence id currently stored, if any.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn min_sequence_id(&self) -> Result<Option<u64>>;

    /// Whether a milestone with this sequence id exists.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn sequence_id_exists(&self, sequence_id: u64) -> Result<bool>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// FINALITY STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for block-finality persistence (spec §4.10).
#[async_trait]
pub trait FinalityStore: Send + Sync {
    /// Bulk insert finality rows. On conflict (`block_number` already
    /// present), only update `time_to_finality_sec` if the stored value is
    /// null and the new one is not (spec §4.10 step 3, §8 property 5).
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn upsert_finality(&self, rows: &[BlockFinality]) -> Result<()>;

    /// Fetch the finality row for a single block, if any.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn get_finality(&self, block_number: BlockNumber) -> Result<Option<BlockFinality>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// INDEXER STATE STORE (cursors + hash chain for reorg detection)
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for cursor management and reorg bookkeeping (spec §3 "Indexer
/// cursor", §4.11).
///
/// Cursors are keyed by `service_name` so every forward indexer and
/// backfiller owns an independent, non-overlapping row; concurrent writers
/// to the same key would corrupt gap-freeness (spec §3 invariants).
#[async_trait]
pub trait IndexerStateStore: Send + Sync {
    /// Load the cursor for `service_name`, if it has ever run.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn get_cursor(&self, service_name: &str) -> Result<Option<(u64, Option<String>)>>;

    /// Persist the cursor for `service_name`.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn set_cursor(
        &self,
        service_name: &str,
        position: u64,
        hash: Option<&str>,
    ) -> Result<()>;

    /// Record a block's hash/parent/timestamp for reorg detection.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn insert_block_hash(
        &self,
        block: BlockNumber,
        hash: &str,
        parent: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Stored hash for a block, for reorg comparison.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn get_block_hash(&self, block: BlockNumber) -> Result<Option<String>>;

    /// Move the row at `block` (if present) to the reorg archive and delete
    /// it from the main table, transactionally.
    ///
    /// # Errors
    /// Returns an error if the rollback fails.
    async fn archive_reorged_block(&self, block: BlockNumber, replaced_by_hash: &str)
    -> Result<()>;

    /// Whether `block` is currently `finalized=true`.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn is_finalized(&self, block: BlockNumber) -> Result<bool>;

    /// Prune block-hash rows older than the retention window.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn prune_old_blocks(&self, keep_blocks: u64) -> Result<u64>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATS STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for the O(1) `table_stats` cache (spec §4.12).
#[async_trait]
pub trait StatsStore: Send + Sync {
    /// Upsert: `min = LEAST(existing, min_inserted)`, `max =
    /// GREATEST(existing, max_inserted)`, `total_count += count`.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn update_table_stats(
        &self,
        table_name: &str,
        min_inserted: u64,
        max_inserted: u64,
        count: u64,
    ) -> Result<()>;

    /// Same as [`update_table_stats`](Self::update_table_stats) but also
    /// folds in finalized-row bounds (blocks table only).
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn update_finalized_stats(
        &self,
        table_name: &str,
        min_finalized: u64,
        max_finalized: u64,
        finalized_count: u64,
    ) -> Result<()>;

    /// Read the cached stats for a table.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn get_table_stats(&self, table_name: &str) -> Result<Option<TableStats>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// WORKER STATUS STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for worker health/diagnostic persistence (spec §7, §9).
#[async_trait]
pub trait WorkerStatusStore: Send + Sync {
    /// Upsert a worker's status snapshot.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn upsert_worker_status(&self, status: &WorkerStatus) -> Result<()>;

    /// Fetch all known worker statuses, for the health endpoint.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn all_worker_statuses(&self) -> Result<Vec<WorkerStatus>>;
}
