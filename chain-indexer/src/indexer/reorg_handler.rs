//! Chain reorganization detection and rollback handling.
//!
//! This module provides the logic layer for detecting and handling chain
//! reorganizations (reorgs). A reorg occurs when the canonical chain changes,
//! typically due to network propagation delays or competing blocks.
//!
//! # Reorg Detection
//!
//! Reorgs are detected by checking parent hash consistency:
//!
//! ```text
//! Stored:   Block 100 (hash: 0xAAA) → Block 101 (hash: 0xBBB, parent: 0xAAA)
//! Incoming: Block 102 (hash: 0xCCC, parent: 0xXXX)  ← Parent mismatch!
//!
//! This indicates a reorg occurred. We find the fork point (last matching block)
//! and archive every row from the fork point forward before reprocessing.
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        ReorgHandler                                 │
//! │                                                                     │
//! │  ┌──────────────────┐    ┌──────────────────┐    ┌───────────────┐ │
//! │  │  Detect Reorg    │───▶│  Find Fork Point │───▶│  Execute      │ │
//! │  │  (parent check)  │    │  (walk backward) │    │  Rollback     │ │
//! │  └──────────────────┘    └──────────────────┘    └───────────────┘ │
//! │         │                                                │         │
//! │         ▼                                                ▼         │
//! │  ┌──────────────────┐                        ┌───────────────────┐ │
//! │  │  Record Block    │                        │  Emit Reorg Event │ │
//! │  │  Hash            │                        │  (for monitoring) │ │
//! │  └──────────────────┘                        └───────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rpc_client::RpcClient;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::ports::IndexerStateStore;
use crate::types::primitives::BlockNumber;

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum depth to search for fork point. Beyond this, the reorg is treated
/// as catastrophic and surfaces `DomainError::ReorgTooDeep` for manual
/// intervention rather than an automatic rollback.
const MAX_REORG_DEPTH: u64 = 256;

/// Number of block-hash rows to keep for reorg detection. Must exceed
/// `MAX_REORG_DEPTH` or a legitimate reorg could walk past retained history.
const DEFAULT_BLOCK_RETENTION: u64 = 512;

// ═══════════════════════════════════════════════════════════════════════════════
// REORG RESULT
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of checking a block for reorg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorgCheckResult {
    /// No reorg detected - parent hash matches.
    NoReorg,
    /// Reorg detected - fork point found at the given block.
    ReorgDetected {
        /// The block where the fork occurred (last common block).
        fork_point: BlockNumber,
        /// Depth of the reorg (blocks to roll back).
        depth: u64,
    },
    /// First block being indexed - no parent to check.
    FirstBlock,
    /// Parent block not in our history (pruned or never indexed).
    ParentNotFound,
}

/// Statistics about a reorg event.
#[derive(Debug, Clone)]
pub struct ReorgStats {
    /// The block number where the reorg was detected.
    pub detected_at: BlockNumber,
    /// The fork point (last common block).
    pub fork_point: BlockNumber,
    /// Number of blocks rolled back.
    pub depth: u64,
    /// Hash we had stored for the block at `detected_at`.
    pub orphaned_hash: String,
    /// Hash of the new (canonical) block at `detected_at`.
    pub new_hash: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// REORG HANDLER
// ═══════════════════════════════════════════════════════════════════════════════

/// Handles chain reorganization detection and recovery.
///
/// # Type Parameters
///
/// * `S` - Store implementation that provides `IndexerStateStore`
#[derive(Debug)]
pub struct ReorgHandler<S> {
    store: S,
    /// Number of blocks to retain for reorg detection.
    block_retention: u64,
    /// Depth past which a reorg is treated as catastrophic (spec §5's
    /// `max_reorg_depth` tunable).
    max_reorg_depth: u64,
    /// Execution-layer client used to walk the canonical chain backward
    /// when searching for the fork point. `None` in tests and anywhere
    /// else a live chain isn't available; the search then falls back to
    /// assuming a single-block-deep fork.
    chain: Option<Arc<RpcClient>>,
}

impl<S> ReorgHandler<S>
where
    S: IndexerStateStore,
{
    /// Create a new reorg handler.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self {
            store,
            block_retention: DEFAULT_BLOCK_RETENTION,
            max_reorg_depth: MAX_REORG_DEPTH,
            chain: None,
        }
    }

    /// Create a new reorg handler with custom block retention.
    #[must_use]
    pub const fn with_retention(store: S, block_retention: u64) -> Self {
        Self {
            store,
            block_retention,
            max_reorg_depth: MAX_REORG_DEPTH,
            chain: None,
        }
    }

    /// Override the depth past which a reorg is treated as catastrophic
    /// (defaults to `MAX_REORG_DEPTH`; configured via `workers.max_reorg_depth`).
    #[must_use]
    pub const fn with_max_depth(mut self, max_reorg_depth: u64) -> Self {
        self.max_reorg_depth = max_reorg_depth;
        self
    }

    /// Wire an execution-layer client so fork-point search walks the real
    /// canonical chain instead of assuming a depth-1 fork.
    #[must_use]
    pub fn with_chain_source(mut self, rpc: Arc<RpcClient>) -> Self {
        self.chain = Some(rpc);
        self
    }

    /// Check if processing this block would result in a reorg.
    ///
    /// Compares the incoming block's parent hash against our stored hash
    /// for the parent block number.
    ///
    /// # Errors
    /// Returns an error if the store fails to retrieve block hashes, or if
    /// a detected reorg's depth exceeds `MAX_REORG_DEPTH`.
    #[instrument(skip(self, parent_hash), fields(block = %block_number.value()))]
    pub async fn check_for_reorg(
        &self,
        block_number: BlockNumber,
        parent_hash: &str,
    ) -> Result<ReorgCheckResult> {
        if block_number.value() == 0 {
            return Ok(ReorgCheckResult::FirstBlock);
        }

        let parent_block = block_number.prev();
        let stored_hash = self.store.get_block_hash(parent_block).await?;

        match stored_hash {
            None => {
                debug!(parent_block = %parent_block.value(), "parent block not found in history");
                Ok(ReorgCheckResult::ParentNotFound)
            }
            Some(stored) if stored == parent_hash => {
                debug!("parent hash matches, no reorg");
                Ok(ReorgCheckResult::NoReorg)
            }
            Some(stored) => {
                warn!(
                    parent_block = %parent_block.value(),
                    stored_hash = %stored,
                    incoming_parent = %parent_hash,
                    "reorg detected: parent hash mismatch"
                );

                let fork_point = self.find_fork_point(block_number).await?;
                self.reject_if_any_finalized(fork_point, block_number).await?;
                let depth = block_number.value() - fork_point.value();

                info!(fork_point = %fork_point.value(), depth, "found fork point");
                Ok(ReorgCheckResult::ReorgDetected { fork_point, depth })
            }
        }
    }

    /// Find the fork point by walking backward through block history.
    ///
    /// With a chain source wired, walks downward from `from_block.prev()`
    /// comparing our stored hash at each height against the hash the
    /// execution layer currently reports there, stopping at the first
    /// match (the common ancestor, spec §4.11 steps 1-2).
    ///
    /// Without a chain source, falls back to assuming the fork is exactly
    /// one block deep.
    ///
    /// # Errors
    /// Returns an error if the fork point cannot be found within
    /// `MAX_REORG_DEPTH`.
    #[instrument(skip(self), fields(from = %from_block.value()))]
    async fn find_fork_point(&self, from_block: BlockNumber) -> Result<BlockNumber> {
        let Some(rpc) = &self.chain else {
            let fork_point = from_block.prev().prev();
            self.check_depth(from_block, fork_point)?;
            return Ok(fork_point);
        };

        let mut candidate = from_block.prev();
        loop {
            self.check_depth(from_block, candidate)?;

            let stored_hash = self.store.get_block_hash(candidate).await?;
            let onchain_hash = rpc.block_by_number(candidate.value()).await?.map(|b| b.header.hash.to_string());

            if stored_hash.is_some() && stored_hash == onchain_hash {
                return Ok(candidate);
            }

            if candidate.value() == 0 {
                return Ok(candidate);
            }
            candidate = candidate.prev();
        }
    }

    fn check_depth(&self, from_block: BlockNumber, candidate: BlockNumber) -> Result<()> {
        let depth = from_block.value().saturating_sub(candidate.value());
        if depth > self.max_reorg_depth {
            error!(depth, max = self.max_reorg_depth, "reorg too deep, manual intervention required");
            return Err(crate::error::DomainError::ReorgTooDeep {
                depth,
                max: self.max_reorg_depth,
            }
            .into());
        }
        Ok(())
    }

    /// Refuse to roll back a block that was already marked finalized (spec
    /// §4.11 step 3): under honest consensus a finalized block must never
    /// be reorged, so this surfaces as a fatal error for manual
    /// intervention rather than a silent rollback.
    async fn reject_if_any_finalized(&self, fork_point: BlockNumber, detected_at: BlockNumber) -> Result<()> {
        let mut block = fork_point.next();
        while block.value() < detected_at.value() {
            if self.store.is_finalized(block).await? {
                error!(block = block.value(), "finalized block was reorged, this should not happen under honest consensus");
                return Err(crate::error::DomainError::FinalityViolation {
                    block_number: block.value(),
                }
                .into());
            }
            block = block.next();
        }
        Ok(())
    }

    /// Archive every row from `fork_point + 1` through `detected_at`
    /// (inclusive), replacing them with the canonical hash observed at the
    /// reorg boundary.
    ///
    /// # Errors
    /// Returns an error if the store fails to execute the archival.
    #[instrument(skip(self, replaced_by_hash), fields(fork_point = %fork_point.value(), detected_at = %detected_at.value()))]
    pub async fn execute_rollback(
        &self,
        fork_point: BlockNumber,
        detected_at: BlockNumber,
        replaced_by_hash: &str,
    ) -> Result<()> {
        info!(fork_point = %fork_point.value(), detected_at = %detected_at.value(), "executing reorg rollback");

        let mut block = fork_point.next();
        while block.value() <= detected_at.value() {
            self.store.archive_reorged_block(block, replaced_by_hash).await?;
            block = block.next();
        }

        info!("reorg rollback complete");
        ::metrics::counter!("chain_indexer_reorgs_total").increment(1);
        Ok(())
    }

    /// Record a block hash for future reorg detection.
    ///
    /// Should be called after successfully processing a block.
    ///
    /// # Errors
    /// Returns an error if the store fails to record the block hash.
    #[instrument(skip(self, hash, parent), fields(block = %block.value()))]
    pub async fn record_block(
        &self,
        block: BlockNumber,
        hash: &str,
        parent: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.store.insert_block_hash(block, hash, parent, timestamp).await?;

        // Only prune every 100 blocks to avoid constant cleanup.
        if block.value().is_multiple_of(100) {
            let pruned = self.store.prune_old_blocks(self.block_retention).await?;
            if pruned > 0 {
                debug!(pruned, "pruned old block hashes");
            }
        }

        Ok(())
    }

    /// Handle a detected reorg by rolling back and returning the restart point.
    ///
    /// # Errors
    /// Returns an error if the rollback fails.
    #[instrument(skip(self, orphaned_hash, new_hash), fields(detected_at = %detected_at.value(), fork_point = %fork_point.value()))]
    pub async fn handle_reorg(
        &self,
        detected_at: BlockNumber,
        fork_point: BlockNumber,
        orphaned_hash: String,
        new_hash: String,
    ) -> Result<ReorgStats> {
        let depth = detected_at.value() - fork_point.value();

        warn!(
            detected_at = %detected_at.value(),
            fork_point = %fork_point.value(),
            depth,
            orphaned_hash = %orphaned_hash,
            new_hash = %new_hash,
            "handling chain reorganization"
        );

        self.execute_rollback(fork_point, detected_at, &new_hash).await?;

        let stats = ReorgStats {
            detected_at,
            fork_point,
            depth,
            orphaned_hash,
            new_hash,
        };

        info!(
            depth = stats.depth,
            fork_point = %stats.fork_point.value(),
            "reorg handled, ready to reprocess from fork point"
        );

        Ok(stats)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, Default, Clone)]
    struct MockStateStore {
        block_hashes: Arc<Mutex<HashMap<u64, String>>>,
        archived: Arc<Mutex<Vec<(u64, String)>>>,
        finalized: Arc<Mutex<std::collections::HashSet<u64>>>,
    }

    #[async_trait::async_trait]
    impl IndexerStateStore for MockStateStore {
        async fn get_cursor(&self, _service_name: &str) -> Result<Option<(u64, Option<String>)>> {
            Ok(None)
        }

        async fn set_cursor(&self, _service_name: &str, _position: u64, _hash: Option<&str>) -> Result<()> {
            Ok(())
        }

        async fn insert_block_hash(
            &self,
            block: BlockNumber,
            hash: &str,
            _parent: &str,
            _timestamp: DateTime<Utc>,
        ) -> Result<()> {
            self.block_hashes.lock().unwrap().insert(block.value(), hash.to_string());
            Ok(())
        }

        async fn get_block_hash(&self, block: BlockNumber) -> Result<Option<String>> {
            Ok(self.block_hashes.lock().unwrap().get(&block.value()).cloned())
        }

        async fn archive_reorged_block(&self, block: BlockNumber, replaced_by_hash: &str) -> Result<()> {
            self.archived.lock().unwrap().push((block.value(), replaced_by_hash.to_string()));
            self.block_hashes.lock().unwrap().remove(&block.value());
            Ok(())
        }

        async fn is_finalized(&self, block: BlockNumber) -> Result<bool> {
            Ok(self.finalized.lock().unwrap().contains(&block.value()))
        }

        async fn prune_old_blocks(&self, keep_blocks: u64) -> Result<u64> {
            let mut hashes = self.block_hashes.lock().unwrap();
            let max = hashes.keys().max().copied().unwrap_or(0);
            let cutoff = max.saturating_sub(keep_blocks);

            let before = hashes.len();
            hashes.retain(|&k, _| k > cutoff);
            Ok((before - hashes.len()) as u64)
        }
    }

    impl MockStateStore {
        fn with_blocks(blocks: Vec<(u64, &str)>) -> Self {
            let store = Self::default();
            {
                let mut hashes = store.block_hashes.lock().unwrap();
                for (num, hash) in blocks {
                    hashes.insert(num, hash.to_string());
                }
            }
            store
        }

        fn mark_finalized(&self, block: u64) {
            self.finalized.lock().unwrap().insert(block);
        }
    }

    #[test]
    fn constants_are_reasonable() {
        assert!(MAX_REORG_DEPTH >= 64, "should handle moderate reorgs");
        assert!(MAX_REORG_DEPTH <= 1024, "don't search forever");
        assert!(
            DEFAULT_BLOCK_RETENTION > MAX_REORG_DEPTH,
            "should retain more than max reorg depth"
        );
    }

    #[tokio::test]
    async fn check_first_block_returns_first_block() {
        let store = MockStateStore::default();
        let handler = ReorgHandler::new(store);

        let result = handler.check_for_reorg(BlockNumber::new(0), "0x0").await.unwrap();

        assert_eq!(result, ReorgCheckResult::FirstBlock);
    }

    #[tokio::test]
    async fn check_parent_not_found() {
        let store = MockStateStore::default();
        let handler = ReorgHandler::new(store);

        let result = handler
            .check_for_reorg(BlockNumber::new(100), "0x11")
            .await
            .unwrap();

        assert_eq!(result, ReorgCheckResult::ParentNotFound);
    }

    #[tokio::test]
    async fn check_no_reorg_when_hashes_match() {
        let store = MockStateStore::with_blocks(vec![(99, "0xaa")]);
        let handler = ReorgHandler::new(store);

        let result = handler.check_for_reorg(BlockNumber::new(100), "0xaa").await.unwrap();

        assert_eq!(result, ReorgCheckResult::NoReorg);
    }

    #[tokio::test]
    async fn check_reorg_detected_when_hashes_differ() {
        let store = MockStateStore::with_blocks(vec![(97, "0x97"), (98, "0x98"), (99, "0xaa")]);
        let handler = ReorgHandler::new(store);

        let result = handler.check_for_reorg(BlockNumber::new(100), "0xbb").await.unwrap();

        match result {
            ReorgCheckResult::ReorgDetected { fork_point, depth } => {
                assert!(fork_point.value() < 100);
                assert!(depth > 0);
            }
            other => panic!("expected ReorgDetected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn check_reorg_rejects_rollback_over_finalized_block() {
        let store = MockStateStore::with_blocks(vec![(97, "0x97"), (98, "0x98"), (99, "0xaa")]);
        store.mark_finalized(99);
        let handler = ReorgHandler::new(store);

        let err = handler
            .check_for_reorg(BlockNumber::new(100), "0xbb")
            .await
            .unwrap_err();

        assert!(err.to_string().contains("finality violation"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn check_reorg_honors_configured_max_depth() {
        // Depth-1 fallback (no chain source) computes fork_point = 100 - 2 = 98,
        // which exceeds a max depth tightened to 1.
        let store = MockStateStore::with_blocks(vec![(99, "0x99")]);
        let handler = ReorgHandler::new(store).with_max_depth(1);

        let err = handler
            .check_for_reorg(BlockNumber::new(100), "0xbb")
            .await
            .unwrap_err();

        assert!(err.to_string().to_lowercase().contains("reorg too deep"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn record_block_stores_hash() {
        let store = MockStateStore::default();
        let handler = ReorgHandler::new(store.clone());

        let block = BlockNumber::new(100);
        handler.record_block(block, "0xaa", "0x99", Utc::now()).await.unwrap();

        let stored = store.get_block_hash(block).await.unwrap().expect("hash should be stored");
        assert_eq!(stored, "0xaa");
    }

    #[tokio::test]
    async fn execute_rollback_archives_range() {
        let store = MockStateStore::with_blocks(vec![(100, "0xaa"), (101, "0xbb"), (102, "0xcc")]);
        let handler = ReorgHandler::new(store.clone());

        handler
            .execute_rollback(BlockNumber::new(100), BlockNumber::new(102), "0xnew")
            .await
            .unwrap();

        let archived = store.archived.lock().unwrap();
        assert_eq!(archived.len(), 2);
        assert!(archived.iter().all(|(_, replaced)| replaced == "0xnew"));

        assert!(store.get_block_hash(BlockNumber::new(101)).await.unwrap().is_none());
        assert!(store.get_block_hash(BlockNumber::new(102)).await.unwrap().is_none());
        assert!(store.get_block_hash(BlockNumber::new(100)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn handle_reorg_returns_stats() {
        let store = MockStateStore::with_blocks(vec![(98, "0x98"), (99, "0x99"), (100, "0xaa")]);
        let handler = ReorgHandler::new(store);

        let stats = handler
            .handle_reorg(
                BlockNumber::new(101),
                BlockNumber::new(99),
                "0xaa".to_string(),
                "0xbb".to_string(),
            )
            .await
            .unwrap();

        assert_eq!(stats.detected_at.value(), 101);
        assert_eq!(stats.fork_point.value(), 99);
        assert_eq!(stats.depth, 2);
    }

    #[test]
    fn handler_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ReorgHandler<MockStateStore>>();
    }
}
