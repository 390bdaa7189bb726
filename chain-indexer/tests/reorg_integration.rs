//! Integration tests for reorg detection and checkpoint management against
//! a real TimescaleDB instance.

mod common;

use chrono::Utc;

use chain_indexer::indexer::{CheckpointManager, RecoveryMode, ReorgCheckResult, ReorgHandler};
use chain_indexer::ports::{BlockStore, ConflictPolicy, IndexerStateStore};
use chain_indexer::types::primitives::BlockNumber;

use common::fixtures::{TestDb, block_fixtures};

// ═══════════════════════════════════════════════════════════════════════════════
// REORG HANDLER INTEGRATION TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_reorg_detection_no_reorg() {
    let db = TestDb::new().await;

    db.store.insert_block_hash(BlockNumber::new(100), "0x100", "0x99", Utc::now()).await.unwrap();
    db.store.insert_block_hash(BlockNumber::new(101), "0x101", "0x100", Utc::now()).await.unwrap();
    db.store.insert_block_hash(BlockNumber::new(102), "0x102", "0x101", Utc::now()).await.unwrap();

    let handler = ReorgHandler::new(db.store.clone());

    let result = handler.check_for_reorg(BlockNumber::new(103), "0x102").await.unwrap();
    assert_eq!(result, ReorgCheckResult::NoReorg);
}

#[tokio::test]
async fn test_reorg_detection_parent_mismatch() {
    let db = TestDb::new().await;

    db.store.insert_block_hash(BlockNumber::new(100), "0x100", "0x99", Utc::now()).await.unwrap();
    db.store.insert_block_hash(BlockNumber::new(101), "0x101", "0x100", Utc::now()).await.unwrap();
    db.store.insert_block_hash(BlockNumber::new(102), "0x102", "0x101", Utc::now()).await.unwrap();

    let handler = ReorgHandler::new(db.store.clone());

    let result = handler.check_for_reorg(BlockNumber::new(103), "0xwrong").await.unwrap();

    match result {
        ReorgCheckResult::ReorgDetected { fork_point, depth } => {
            assert_eq!(fork_point.value(), 101, "fork point should be two blocks before detection");
            assert_eq!(depth, 2, "depth should match distance from detection to fork point");
        }
        other => panic!("expected ReorgDetected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reorg_detection_first_block() {
    let db = TestDb::new().await;
    let handler = ReorgHandler::new(db.store.clone());

    let result = handler.check_for_reorg(BlockNumber::new(0), "0x0").await.unwrap();
    assert_eq!(result, ReorgCheckResult::FirstBlock);
}

#[tokio::test]
async fn test_reorg_detection_parent_not_found() {
    let db = TestDb::new().await;
    let handler = ReorgHandler::new(db.store.clone());

    let result = handler.check_for_reorg(BlockNumber::new(100), "0xaa").await.unwrap();
    assert_eq!(result, ReorgCheckResult::ParentNotFound);
}

#[tokio::test]
async fn test_execute_rollback_archives_range() {
    let db = TestDb::new().await;

    for i in 100..=105u64 {
        let parent = format!("0x{:x}", i.saturating_sub(1));
        db.store.insert_block_hash(BlockNumber::new(i), &format!("0x{i:x}"), &parent, Utc::now()).await.unwrap();
    }

    let handler = ReorgHandler::new(db.store.clone());

    handler.execute_rollback(BlockNumber::new(102), BlockNumber::new(105), "0xnew").await.unwrap();

    for i in 103..=105u64 {
        let hash = db.store.get_block_hash(BlockNumber::new(i)).await.unwrap();
        assert!(hash.is_none(), "block {i} should have been rolled back");
    }
    for i in 100..=102u64 {
        let hash = db.store.get_block_hash(BlockNumber::new(i)).await.unwrap();
        assert!(hash.is_some(), "block {i} should still exist");
    }
}

#[tokio::test]
async fn test_record_block_stores_hash() {
    let db = TestDb::new().await;
    let handler = ReorgHandler::new(db.store.clone());

    let block = BlockNumber::new(100);
    handler.record_block(block, "0xaa", "0x99", Utc::now()).await.unwrap();

    let stored = db.store.get_block_hash(block).await.unwrap().expect("hash should be stored");
    assert_eq!(stored, "0xaa");
}

#[tokio::test]
async fn test_handle_reorg_full_flow() {
    let db = TestDb::new().await;

    db.store.insert_block_hash(BlockNumber::new(100), "0x100", "0x99", Utc::now()).await.unwrap();
    db.store.insert_block_hash(BlockNumber::new(101), "0x101", "0x100", Utc::now()).await.unwrap();
    db.store.insert_block_hash(BlockNumber::new(102), "0x102", "0x101", Utc::now()).await.unwrap();

    let handler = ReorgHandler::new(db.store.clone());

    let stats = handler
        .handle_reorg(BlockNumber::new(103), BlockNumber::new(100), "0x102".to_string(), "0xbb".to_string())
        .await
        .unwrap();

    assert_eq!(stats.detected_at.value(), 103);
    assert_eq!(stats.fork_point.value(), 100);
    assert_eq!(stats.depth, 3);
    assert_eq!(stats.orphaned_hash, "0x102");
    assert_eq!(stats.new_hash, "0xbb");

    assert!(db.store.get_block_hash(BlockNumber::new(101)).await.unwrap().is_none());
    assert!(db.store.get_block_hash(BlockNumber::new(102)).await.unwrap().is_none());
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHECKPOINT MANAGER INTEGRATION TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_checkpoint_load_empty() {
    let db = TestDb::new().await;
    let manager = CheckpointManager::new(db.store.clone(), "block_indexer");

    let state = manager.load().await.unwrap();

    assert!(state.is_empty());
    assert_eq!(state.position.value(), 0);
    assert!(state.hash.is_none());
}

#[tokio::test]
async fn test_checkpoint_update_and_load() {
    let db = TestDb::new().await;
    let manager = CheckpointManager::new(db.store.clone(), "block_indexer");

    let block = BlockNumber::new(100);
    manager.update(block, "0xaa").await.unwrap();

    let state = manager.load().await.unwrap();

    assert!(!state.is_empty());
    assert_eq!(state.position.value(), 100);
    assert_eq!(state.hash.as_deref(), Some("0xaa"));
}

#[tokio::test]
async fn test_checkpoint_get_start_block_resume_empty() {
    let db = TestDb::new().await;
    let manager = CheckpointManager::new(db.store.clone(), "block_indexer").with_min_block(BlockNumber::new(1000));

    let start = manager.get_start_block().await.unwrap();
    assert_eq!(start.value(), 1000);
}

#[tokio::test]
async fn test_checkpoint_get_start_block_resume_existing() {
    let db = TestDb::new().await;
    let manager = CheckpointManager::new(db.store.clone(), "block_indexer");

    let block = BlockNumber::new(500);
    manager.update(block, "0xbb").await.unwrap();

    let start = manager.get_start_block().await.unwrap();
    assert_eq!(start.value(), 501);
}

#[tokio::test]
async fn test_checkpoint_reindex_from_mode() {
    let db = TestDb::new().await;

    db.store.set_cursor("block_indexer", 500, Some("0xbb")).await.unwrap();

    let manager = CheckpointManager::new(db.store.clone(), "block_indexer")
        .with_recovery_mode(RecoveryMode::ReindexFrom(BlockNumber::new(100)));

    let start = manager.get_start_block().await.unwrap();
    assert_eq!(start.value(), 100);
}

#[tokio::test]
async fn test_checkpoint_genesis_mode() {
    let db = TestDb::new().await;

    db.store.set_cursor("block_indexer", 500, Some("0xbb")).await.unwrap();

    let manager = CheckpointManager::new(db.store.clone(), "block_indexer").with_recovery_mode(RecoveryMode::Genesis);

    let start = manager.get_start_block().await.unwrap();
    assert_eq!(start.value(), 0);
}

#[tokio::test]
async fn test_checkpoint_min_block_overrides_genesis() {
    let db = TestDb::new().await;

    let manager = CheckpointManager::new(db.store.clone(), "block_indexer")
        .with_recovery_mode(RecoveryMode::Genesis)
        .with_min_block(BlockNumber::new(1000));

    let start = manager.get_start_block().await.unwrap();
    assert_eq!(start.value(), 1000);
}

#[tokio::test]
async fn test_checkpoint_reset_after_rollback() {
    let db = TestDb::new().await;
    let manager = CheckpointManager::new(db.store.clone(), "block_indexer");

    db.store.insert_block_hash(BlockNumber::new(400), "0x400", "0x399", Utc::now()).await.unwrap();
    db.store.insert_block_hash(BlockNumber::new(500), "0x500", "0x400", Utc::now()).await.unwrap();

    manager.update(BlockNumber::new(500), "0x500").await.unwrap();

    let handler = ReorgHandler::new(db.store.clone());
    handler.execute_rollback(BlockNumber::new(400), BlockNumber::new(500), "0x400").await.unwrap();

    manager.reset_to(BlockNumber::new(400), "0x400").await.unwrap();

    let state = manager.load().await.unwrap();
    assert_eq!(state.position.value(), 400);
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMBINED REORG + CHECKPOINT TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_full_reorg_workflow_with_blocks() {
    let db = TestDb::new().await;

    // 1. Ingest blocks 100-102.
    let blocks = vec![
        block_fixtures::enriched_block(100, 3),
        block_fixtures::enriched_block(101, 2),
        block_fixtures::enriched_block(102, 5),
    ];
    db.store.insert_blocks(&blocks, ConflictPolicy::DoNothing).await.unwrap();

    db.store.insert_block_hash(BlockNumber::new(100), "0x100", "0x99", Utc::now()).await.unwrap();
    db.store.insert_block_hash(BlockNumber::new(101), "0x101", "0x100", Utc::now()).await.unwrap();
    db.store.insert_block_hash(BlockNumber::new(102), "0x102", "0x101", Utc::now()).await.unwrap();

    // 2. Advance the cursor to block 102.
    let checkpoint_manager = CheckpointManager::new(db.store.clone(), "block_indexer");
    checkpoint_manager.update(BlockNumber::new(102), "0x102").await.unwrap();

    // 3. Detect and handle a reorg at block 103 with a mismatched parent.
    let reorg_handler = ReorgHandler::new(db.store.clone());
    let result = reorg_handler.check_for_reorg(BlockNumber::new(103), "0xwrong").await.unwrap();

    match result {
        ReorgCheckResult::ReorgDetected { fork_point, .. } => {
            reorg_handler.execute_rollback(fork_point, BlockNumber::new(103), "0xcanonical").await.unwrap();

            let fork_hash = db
                .store
                .get_block_hash(fork_point)
                .await
                .unwrap()
                .expect("fork point block hash should exist after rollback");
            checkpoint_manager.reset_to(fork_point, &fork_hash).await.unwrap();
        }
        other => panic!("expected reorg to be detected, got {other:?}"),
    }

    // 4. Blocks after the fork point are gone from the hash chain.
    assert!(db.store.get_block_hash(BlockNumber::new(102)).await.unwrap().is_none());

    // 5. Block rows (the metrics-bearing table) are untouched by the hash-chain
    // rollback; the reorg handler only archives `block_hashes`.
    let max = db.store.max_block_number().await.unwrap();
    assert_eq!(max, Some(BlockNumber::new(102)));
}
