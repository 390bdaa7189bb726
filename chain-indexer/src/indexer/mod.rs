//! Core indexing workers: cursor management, reorg detection, and the
//! forward/backward workers that keep `blocks`/`milestones`/`block_finality`
//! in sync with the chain and the finality oracle.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Indexer Core                            │
//! │                                                                 │
//! │  ┌──────────────────┐     ┌──────────────────┐                 │
//! │  │ CheckpointManager│◀───▶│  ReorgHandler    │                 │
//! │  │ (per-worker      │     │  (hash-chain     │                 │
//! │  │  cursor)         │     │   comparison)    │                 │
//! │  └──────────────────┘     └──────────────────┘                 │
//! │           ▲                                                    │
//! │           │ owned by                                           │
//! │  ┌────────┴─────────┬──────────────────┬──────────────────┐    │
//! │  │  BlockIndexer     │ MilestoneIndexer │  *Backfiller      │    │
//! │  └───────────────────┴──────────────────┴──────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod block_backfiller;
mod block_indexer;
mod checkpoint;
mod enricher;
mod finality_writer;
mod milestone_backfiller;
mod milestone_indexer;
mod priority_fee_backfiller;
mod reorg_handler;

pub use block_backfiller::{BlockBackfiller, BlockBackfillerConfig};
pub use block_indexer::{BlockIndexer, BlockIndexerConfig};
pub use checkpoint::{CheckpointManager, CheckpointState};
pub use enricher::{EnrichOptions, EnrichOutcome, Enricher, RealtimePush};
pub use finality_writer::FinalityWriter;
pub use milestone_backfiller::{MilestoneBackfiller, MilestoneBackfillerConfig};
pub use milestone_indexer::{MilestoneIndexer, MilestoneIndexerConfig};
pub use priority_fee_backfiller::{PriorityFeeBackfiller, PriorityFeeBackfillerConfig};
pub use reorg_handler::{ReorgCheckResult, ReorgHandler, ReorgStats};
