//! Domain types for the chain reconciler.
//!
//! - [`primitives`] - validated newtypes (`BlockNumber`, `SequenceId`)
//! - [`entities`] - domain entities for database persistence (spec §3)

pub mod entities;
pub mod primitives;

pub use entities::{
    Block, BlockFinality, IndexerCursor, Milestone, ReorgedBlock, TableStats, WorkerState,
    WorkerStatus,
};
pub use primitives::{BlockNumber, SequenceId};
