//! Full-flow integration tests: block ingestion, finality reconciliation,
//! and priority-fee backfill against a real TimescaleDB instance.
//!
//! These exercise the store and [`FinalityWriter`] together, since the
//! RPC-facing workers require a live execution-layer endpoint and are
//! covered by their own unit tests with fake clocks/stores instead.

mod common;

use chrono::Duration as ChronoDuration;

use chain_indexer::indexer::FinalityWriter;
use chain_indexer::ports::{BlockStore, ConflictPolicy, FinalityStore, StatsStore};
use chain_indexer::types::primitives::BlockNumber;

use common::fixtures::{TestDb, block_fixtures, milestone_fixtures};

// ═══════════════════════════════════════════════════════════════════════════════
// MILESTONE ARRIVES AFTER THE BLOCK IS INDEXED
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_finality_writer_reconciles_already_indexed_blocks() {
    let db = TestDb::new().await;

    let blocks = vec![
        block_fixtures::enriched_block(100, 3),
        block_fixtures::enriched_block(101, 2),
        block_fixtures::enriched_block(102, 4),
    ];
    db.store.insert_blocks(&blocks, ConflictPolicy::DoNothing).await.unwrap();

    let writer = FinalityWriter::new(db.store.clone(), None, ChronoDuration::days(10));
    let milestone = milestone_fixtures::milestone(1, 100, 102);

    let written = writer.write(&milestone).await.unwrap();
    assert_eq!(written, 3);

    for number in [100, 101, 102] {
        let finality = db.store.get_finality(BlockNumber::new(number)).await.unwrap();
        assert!(finality.is_some(), "block {number} should have a finality row");
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MILESTONE ARRIVES BEFORE THE BLOCK IS INDEXED
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_finality_writer_skips_unknown_blocks() {
    let db = TestDb::new().await;

    let writer = FinalityWriter::new(db.store.clone(), None, ChronoDuration::days(10));
    let milestone = milestone_fixtures::milestone(2, 200, 202);

    // None of blocks 200-202 exist yet; the writer must not fabricate rows.
    let written = writer.write(&milestone).await.unwrap();
    assert_eq!(written, 0);

    for number in [200, 201, 202] {
        assert!(db.store.get_finality(BlockNumber::new(number)).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_finality_arrives_before_block_then_block_is_indexed() {
    let db = TestDb::new().await;

    // 1. Milestone covering 300-301 lands first, but those blocks aren't
    //    indexed yet: the writer must write zero rows without erroring.
    let writer = FinalityWriter::new(db.store.clone(), None, ChronoDuration::days(10));
    let milestone = milestone_fixtures::milestone(3, 300, 301);
    assert_eq!(writer.write(&milestone).await.unwrap(), 0);

    // 2. The block indexer later inserts block 300. A real worker would
    //    reconcile finality on insert (spec §4.4 step 8); here we emulate
    //    that by re-running the writer once the range is known, which is
    //    the same code path the milestone backfiller takes when it catches
    //    up to a milestone whose blocks have since appeared.
    let block = block_fixtures::enriched_block(300, 2);
    db.store.insert_blocks(&[block], ConflictPolicy::DoNothing).await.unwrap();

    assert_eq!(writer.write(&milestone).await.unwrap(), 1);
    let finality = db.store.get_finality(BlockNumber::new(300)).await.unwrap();
    assert!(finality.is_some());
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRIORITY-FEE BACKFILL FLOW
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_backfilled_block_priority_fee_completion_flow() {
    let db = TestDb::new().await;

    let blocks = vec![
        block_fixtures::backfilled_block(400, 3),
        block_fixtures::backfilled_block(401, 0), // tx_count 0, not a candidate
        block_fixtures::enriched_block(402, 5),   // already complete
    ];
    db.store.insert_blocks(&blocks, ConflictPolicy::DoNothing).await.unwrap();

    let candidates = db.store.blocks_missing_priority_fee(BlockNumber::new(0), BlockNumber::new(1000), 10).await.unwrap();
    assert_eq!(candidates.len(), 1, "only the tx-bearing backfilled block is a candidate");
    assert_eq!(candidates[0].block_number, BlockNumber::new(400));

    let mut completed = candidates[0].clone();
    completed.avg_priority_fee_gwei = Some(2.4);
    completed.total_priority_fee_gwei = Some(7.2);
    db.store.update_priority_fee_metrics(std::slice::from_ref(&completed)).await.unwrap();

    let remaining = db.store.blocks_missing_priority_fee(BlockNumber::new(0), BlockNumber::new(1000), 10).await.unwrap();
    assert!(remaining.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════════
// FULL PIPELINE: INGEST, FINALIZE, BACKFILL, STATS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_full_pipeline_ingest_finalize_and_track_stats() {
    let db = TestDb::new().await;

    // Ingest a small run of blocks, as the live indexer would.
    let blocks: Vec<_> = (500..=505).map(|n| block_fixtures::enriched_block(n, 2)).collect();
    let inserted = db.store.insert_blocks(&blocks, ConflictPolicy::DoNothing).await.unwrap();
    assert_eq!(inserted, 6);
    db.store.update_table_stats("blocks", 500, 505, 6).await.unwrap();

    // A milestone finalizes the whole run.
    let writer = FinalityWriter::new(db.store.clone(), None, ChronoDuration::days(10));
    let milestone = milestone_fixtures::milestone(10, 500, 505);
    let written = writer.write(&milestone).await.unwrap();
    assert_eq!(written, 6);

    db.store.update_finalized_stats("blocks", 500, 505, 6).await.unwrap();

    let stats = db.store.get_table_stats("blocks").await.unwrap().expect("stats row should exist");
    assert_eq!(stats.min_value, 500);
    assert_eq!(stats.max_value, 505);
    assert_eq!(stats.total_count, 6);
    assert_eq!(stats.finalized_count, Some(6));
}
