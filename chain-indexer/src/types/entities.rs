//! Domain entities persisted by the reconciler (spec §3 data model).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::primitives::{BlockNumber, SequenceId};

/// A block of the execution-layer chain, keyed by `(block_number)` with a
/// co-indexed `timestamp` for time-range pruning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block number (primary identity).
    pub block_number: BlockNumber,
    /// Block hash.
    pub block_hash: String,
    /// Parent block hash.
    pub parent_hash: String,
    /// Block timestamp (UTC, seconds precision as reported by the node).
    pub timestamp: DateTime<Utc>,
    /// Total gas used by the block.
    pub gas_used: u64,
    /// Block gas limit.
    pub gas_limit: u64,
    /// Number of transactions in the block.
    pub tx_count: u32,
    /// Base fee in gwei (fractional).
    pub base_fee_gwei: f64,
    /// Minimum per-tx priority fee in gwei, over all transactions.
    pub min_priority_fee_gwei: Option<f64>,
    /// Maximum per-tx priority fee in gwei, over all transactions.
    pub max_priority_fee_gwei: Option<f64>,
    /// Median per-tx priority fee in gwei.
    pub median_priority_fee_gwei: Option<f64>,
    /// Weighted average priority fee in gwei. Null unless every transaction
    /// carried `gasUsed` (i.e. receipts were available).
    pub avg_priority_fee_gwei: Option<f64>,
    /// Total priority fee paid in gwei (`Σ priorityFeePerGas × gasUsed`).
    /// Null under the same condition as `avg_priority_fee_gwei`.
    pub total_priority_fee_gwei: Option<f64>,
    /// Seconds since the previous block. Null for the first block of a
    /// batch when the previous timestamp is unknown.
    pub block_time_sec: Option<f64>,
    /// Megagas per second (`gasUsed / blockTime / 1e6`).
    pub mgas_per_sec: Option<f64>,
    /// Transactions per second (`txCount / blockTime`).
    pub tps: Option<f64>,
    /// Whether this block has been finalized by a milestone.
    pub finalized: bool,
    /// Timestamp at which finality was recorded.
    pub finalized_at: Option<DateTime<Utc>>,
    /// Id of the milestone that finalized this block.
    pub milestone_id: Option<u64>,
    /// Seconds between block production and finality.
    pub time_to_finality_sec: Option<f64>,
}

impl Block {
    /// `true` if receipts were joined for every transaction in this block
    /// (equivalently: `avg`/`total` priority fee are populated).
    #[must_use]
    pub const fn has_complete_priority_fee_metrics(&self) -> bool {
        self.avg_priority_fee_gwei.is_some() && self.total_priority_fee_gwei.is_some()
    }
}

/// A finality attestation from the consensus layer, ordered by a monotone
/// `sequence_id`, covering a contiguous block range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    /// Monotone ordering index from the finality oracle.
    pub sequence_id: SequenceId,
    /// Milestone identity; equal to `end_block`.
    pub milestone_id: u64,
    /// First block covered (inclusive).
    pub start_block: BlockNumber,
    /// Last block covered (inclusive).
    pub end_block: BlockNumber,
    /// Milestone hash, as reported by the oracle.
    pub hash: String,
    /// Proposer address. `None` if the oracle reported an empty string.
    pub proposer: Option<String>,
    /// Milestone timestamp.
    pub timestamp: DateTime<Utc>,
}

/// A block-finality record, keyed by `block_number`. Written eagerly for
/// every block covered by an incoming milestone, even before the block row
/// itself exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockFinality {
    /// Finalized block number.
    pub block_number: BlockNumber,
    /// Id of the milestone that finalized this block.
    pub milestone_id: u64,
    /// When finality was recorded (the milestone's timestamp).
    pub finalized_at: DateTime<Utc>,
    /// Seconds between block production and finality. Null until the block
    /// itself is indexed and its timestamp is known.
    pub time_to_finality_sec: Option<f64>,
}

/// An immutable archive row for a block that was displaced by a reorg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReorgedBlock {
    /// The reorged block's original number.
    pub block_number: BlockNumber,
    /// The reorged block's original hash.
    pub block_hash: String,
    /// The reorged block's original parent hash.
    pub parent_hash: String,
    /// The reorged block's original timestamp.
    pub timestamp: DateTime<Utc>,
    /// When the reorg was observed and this row archived.
    pub reorged_at: DateTime<Utc>,
    /// Hash of the block that replaced this one at the same height.
    pub replaced_by_hash: String,
}

/// A cursor row for one indexer/backfiller service. `last_position` is
/// either a block number or a sequence id, interpreted by the owning
/// service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerCursor {
    /// Owning service name, e.g. `block_indexer`.
    pub service_name: String,
    /// Last processed position (block number or sequence id).
    pub last_position: u64,
    /// Hash at `last_position`, when the owner is hash-chain-aware.
    pub last_hash: Option<String>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// O(1) min/max/count cache for a hot table, maintained incrementally by
/// inserters so that headline reads never scan compressed time-partitioned
/// chunks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    /// Minimum key value ever inserted.
    pub min_value: u64,
    /// Maximum key value ever inserted.
    pub max_value: u64,
    /// Approximate total row count.
    pub total_count: u64,
    /// Count of finalized rows (blocks table only).
    pub finalized_count: Option<u64>,
    /// Minimum finalized key value (blocks table only).
    pub min_finalized: Option<u64>,
    /// Maximum finalized key value (blocks table only).
    pub max_finalized: Option<u64>,
}

/// Health/diagnostic snapshot for one worker, persisted to `worker_status`
/// (spec §9: "expose a status service that both writers and readers share
/// via dependency injection; persist periodically to the store").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Worker/service name.
    pub worker_name: String,
    /// Current lifecycle state.
    pub state: WorkerState,
    /// Last error message observed, if any.
    pub last_error: Option<String>,
    /// When `last_error` was observed.
    pub last_error_at: Option<DateTime<Utc>>,
    /// Last heartbeat time.
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle state of a worker, persisted alongside [`WorkerStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Worker has not completed its first iteration yet.
    Starting,
    /// Worker is actively processing.
    Running,
    /// Worker is caught up and sleeping between polls.
    Idle,
    /// Worker hit a transient error and is backing off.
    Error,
    /// Worker has been asked to stop and is draining.
    Stopping,
    /// Worker has exited.
    Stopped,
}

impl WorkerState {
    /// The health endpoint considers the worker healthy in these states.
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Running | Self::Idle | Self::Starting)
    }
}
