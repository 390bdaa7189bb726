//! Port definitions for dependency injection and testability.
//!
//! Ports are trait definitions that describe what the domain layer needs.
//! Following hexagonal architecture, adapters (in the infrastructure layer)
//! implement these traits to provide concrete functionality.
//!
//! | Category | Ports | Purpose |
//! |----------|-------|---------|
//! | Storage | [`BlockStore`], [`MilestoneStore`], [`FinalityStore`], [`IndexerStateStore`], [`StatsStore`], [`WorkerStatusStore`] | Data persistence |
//! | Time | [`Clock`] | Testable time operations |

mod clock;
mod store;

pub use clock::{Clock, SystemClock};
pub use store::{
    BlockStore, ConflictPolicy, FinalityStore, IndexerStateStore, MilestoneStore, StatsStore,
    WorkerStatusStore,
};

#[cfg(any(test, feature = "test-utils"))]
pub use clock::FakeClock;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_ports_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}

        fn check_block_store<T: BlockStore>() {
            assert_send_sync::<T>();
        }
        fn check_milestone_store<T: MilestoneStore>() {
            assert_send_sync::<T>();
        }
        fn check_finality_store<T: FinalityStore>() {
            assert_send_sync::<T>();
        }
        fn check_indexer_state_store<T: IndexerStateStore>() {
            assert_send_sync::<T>();
        }
        fn check_stats_store<T: StatsStore>() {
            assert_send_sync::<T>();
        }
        fn check_worker_status_store<T: WorkerStatusStore>() {
            assert_send_sync::<T>();
        }
        fn check_clock<T: Clock>() {
            assert_send_sync::<T>();
        }
    }
}
