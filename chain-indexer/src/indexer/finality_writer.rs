//! Finality writer (spec §4.10): given a milestone's block range, populates
//! `block_finality` and reconciles `blocks.finalized` for recent rows.
//!
//! This is a leaf worker: it has no cursor or poll loop of its own.
//! [`BlockIndexer`](super::BlockIndexer) and the milestone backfiller both
//! call [`FinalityWriter::write`] once a milestone's range is known.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::warn;

use crate::error::Result;
use crate::indexer::RealtimePush;
use crate::ports::{BlockStore, FinalityStore};
use crate::types::entities::{BlockFinality, Milestone};
use crate::types::primitives::BlockNumber;

/// Width of the "tip window" fire-and-forget push (spec §4.10 step 5):
/// the external consumer's ring buffer might still hold blocks this close
/// to the milestone's end.
const TIP_WINDOW_BLOCKS: u64 = 30;

/// Populates `block_finality` rows and reconciles recent `blocks` rows for
/// a single milestone's coverage range.
pub struct FinalityWriter<S> {
    store: S,
    push: Option<Arc<RealtimePush>>,
    recent_window: ChronoDuration,
}

impl<S> FinalityWriter<S>
where
    S: BlockStore + FinalityStore + Send + Sync,
{
    /// Build a writer backed by `store`, optionally notifying `push` of the
    /// tip-window block range once a milestone lands. `recent_window` is
    /// the width of the eager `blocks.finalized` reconciliation pass (spec
    /// §4.10 step 4, configured via `workers.finality_window_days`).
    pub const fn new(store: S, push: Option<Arc<RealtimePush>>, recent_window: ChronoDuration) -> Self {
        Self { store, push, recent_window }
    }

    /// Run the full finality-write sequence for `milestone` (spec §4.10
    /// steps 1-5).
    ///
    /// # Errors
    /// Returns an error if any store operation fails.
    pub async fn write(&self, milestone: &Milestone) -> Result<u64> {
        let range: Vec<BlockNumber> =
            (milestone.start_block.value()..=milestone.end_block.value()).map(BlockNumber::new).collect();

        if range.is_empty() {
            return Ok(0);
        }

        // Step 1: IN (array) probe, never a range scan.
        let timestamps = self.store.block_timestamps(&range).await?;
        let timestamps: std::collections::HashMap<BlockNumber, DateTime<Utc>> = timestamps.into_iter().collect();

        // Step 2: build one row per block in the milestone's range, even
        // for blocks not yet indexed; `time_to_finality_sec` stays null
        // until the block's own timestamp is known.
        let rows: Vec<BlockFinality> = range
            .iter()
            .map(|&block_number| {
                let time_to_finality_sec = timestamps
                    .get(&block_number)
                    .map(|block_timestamp| (milestone.timestamp - *block_timestamp).num_milliseconds().max(0) as f64 / 1000.0);
                BlockFinality {
                    block_number,
                    milestone_id: milestone.milestone_id,
                    finalized_at: milestone.timestamp,
                    time_to_finality_sec,
                }
            })
            .collect();

        // Step 3: bulk upsert, fill-null-only semantics owned by the store.
        self.store.upsert_finality(&rows).await?;

        // Step 4: reconcile the recent window so legacy `blocks.finalized`
        // reads stay current without a full backfill.
        let reconciled = self.store.reconcile_finality_within_window(self.recent_window, &rows).await?;

        // Step 5: fire-and-forget tip-window push.
        if let Some(push) = &self.push {
            let to_block = milestone.end_block.value();
            let from_block = to_block.saturating_sub(TIP_WINDOW_BLOCKS.saturating_sub(1));
            push.notify_finality_window(from_block, to_block);
        }

        if reconciled == 0 {
            warn!(
                milestone_id = milestone.milestone_id,
                "finality rows written but no blocks fell inside the recent reconciliation window"
            );
        }

        Ok(rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    use super::*;
    use crate::ports::ConflictPolicy;
    use crate::types::entities::Block;
    use crate::types::primitives::SequenceId;

    #[derive(Default)]
    struct FakeStore {
        timestamps: Mutex<Vec<(BlockNumber, chrono::DateTime<Utc>)>>,
        upserted: Mutex<Vec<BlockFinality>>,
        reconciled: Mutex<u64>,
    }

    #[async_trait]
    impl BlockStore for FakeStore {
        async fn insert_blocks(&self, _blocks: &[Block], _policy: ConflictPolicy) -> Result<u64> {
            Ok(0)
        }
        async fn max_block_number(&self) -> Result<Option<BlockNumber>> {
            Ok(None)
        }
        async fn min_block_number(&self) -> Result<Option<BlockNumber>> {
            Ok(None)
        }
        async fn block_timestamps(&self, _block_numbers: &[BlockNumber]) -> Result<Vec<(BlockNumber, chrono::DateTime<Utc>)>> {
            Ok(self.timestamps.lock().expect("lock").clone())
        }
        async fn blocks_missing_priority_fee(&self, _from: BlockNumber, _to: BlockNumber, _limit: u32) -> Result<Vec<Block>> {
            Ok(Vec::new())
        }
        async fn update_priority_fee_metrics(&self, _blocks: &[Block]) -> Result<()> {
            Ok(())
        }
        async fn reconcile_finality_within_window(&self, _window: chrono::Duration, finality: &[BlockFinality]) -> Result<u64> {
            *self.reconciled.lock().expect("lock") = finality.len() as u64;
            Ok(finality.len() as u64)
        }
    }

    #[async_trait]
    impl FinalityStore for FakeStore {
        async fn upsert_finality(&self, rows: &[BlockFinality]) -> Result<()> {
            self.upserted.lock().expect("lock").extend_from_slice(rows);
            Ok(())
        }
        async fn get_finality(&self, _block_number: BlockNumber) -> Result<Option<BlockFinality>> {
            Ok(None)
        }
    }

    fn sample_milestone() -> Milestone {
        Milestone {
            sequence_id: SequenceId::new(5),
            milestone_id: 164,
            start_block: BlockNumber::new(100),
            end_block: BlockNumber::new(164),
            hash: "0xabc".into(),
            proposer: Some("0xdef".into()),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn writes_null_ttf_row_for_blocks_not_yet_indexed() {
        let store = FakeStore::default();
        *store.timestamps.lock().expect("lock") = vec![(BlockNumber::new(100), Utc::now() - ChronoDuration::seconds(5))];
        let writer = FinalityWriter::new(store, None, ChronoDuration::days(10));

        let written = writer.write(&sample_milestone()).await.expect("write");
        let expected = sample_milestone().end_block.value() - sample_milestone().start_block.value() + 1;
        assert_eq!(written, expected);

        let upserted = writer.store.upserted.lock().expect("lock");
        assert_eq!(upserted.len() as u64, expected);
        let known = upserted.iter().find(|row| row.block_number == BlockNumber::new(100)).expect("row for known block");
        assert!(known.time_to_finality_sec.is_some());
        let unknown = upserted.iter().find(|row| row.block_number == BlockNumber::new(101)).expect("row for unindexed block");
        assert!(unknown.time_to_finality_sec.is_none());
    }

    #[tokio::test]
    async fn writes_every_block_in_range_when_none_are_indexed_yet() {
        let store = FakeStore::default();
        let writer = FinalityWriter::new(store, None, ChronoDuration::days(10));

        let milestone = sample_milestone();
        let expected = milestone.end_block.value() - milestone.start_block.value() + 1;
        let written = writer.write(&milestone).await.expect("write");
        assert_eq!(written, expected);

        let upserted = writer.store.upserted.lock().expect("lock");
        assert_eq!(upserted.len() as u64, expected);
        assert!(upserted.iter().all(|row| row.time_to_finality_sec.is_none()));
    }
}
