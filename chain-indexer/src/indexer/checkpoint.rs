//! Checkpoint management for indexer cursor persistence and recovery.
//!
//! This module provides a high-level interface for managing a single
//! worker's cursor, keyed by `service_name` in `indexer_state` (spec §3,
//! §4.12). Every forward indexer and backfiller owns its own
//! `CheckpointManager` instance so their cursors never collide.
//!
//! # Checkpoint Strategy
//!
//! 1. **On batch success**: Update the cursor to the last processed position.
//! 2. **On restart**: Resume from the last cursor.
//! 3. **On reorg**: Roll the cursor back to the fork point.

use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::ports::IndexerStateStore;
use crate::types::primitives::BlockNumber;

// ═══════════════════════════════════════════════════════════════════════════════
// CHECKPOINT STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// The current cursor state of a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointState {
    /// The last successfully processed position (block number or sequence id).
    pub position: BlockNumber,
    /// The hash recorded at that position (for reorg detection), if any.
    pub hash: Option<String>,
}

impl CheckpointState {
    /// Create a new checkpoint state.
    #[must_use]
    pub const fn new(position: BlockNumber, hash: Option<String>) -> Self {
        Self { position, hash }
    }

    /// Create an empty checkpoint (worker has never run).
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            position: BlockNumber::new(0),
            hash: None,
        }
    }

    /// Get the next position to process.
    #[must_use]
    pub const fn next_block(&self) -> BlockNumber {
        self.position.next()
    }

    /// Check if this worker has never advanced its cursor.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.position.value() == 0 && self.hash.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHECKPOINT MANAGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Manages a single worker's cursor for persistence and recovery.
///
/// # Type Parameters
///
/// * `S` - Store implementation that provides `IndexerStateStore`
#[derive(Debug)]
pub struct CheckpointManager<S> {
    store: S,
    /// Key this worker's cursor is stored under in `indexer_state`.
    service_name: String,
}

impl<S> CheckpointManager<S>
where
    S: IndexerStateStore,
{
    /// Create a new checkpoint manager for `service_name`.
    pub fn new(store: S, service_name: impl Into<String>) -> Self {
        Self {
            store,
            service_name: service_name.into(),
        }
    }

    /// Load the current checkpoint state from storage.
    ///
    /// # Errors
    /// Returns an error if the store fails to retrieve the cursor.
    #[instrument(skip(self), fields(service = %self.service_name))]
    pub async fn load(&self) -> Result<CheckpointState> {
        let state = match self.store.get_cursor(&self.service_name).await? {
            Some((position, hash)) => CheckpointState::new(BlockNumber::new(position), hash),
            None => CheckpointState::empty(),
        };

        debug!(
            position = %state.position.value(),
            has_hash = state.hash.is_some(),
            "loaded checkpoint state"
        );

        Ok(state)
    }

    /// Advance the cursor after successfully processing `position`.
    ///
    /// # Errors
    /// Returns an error if the store fails to persist the cursor.
    #[instrument(skip(self, hash), fields(service = %self.service_name, position = %position.value()))]
    pub async fn update(&self, position: BlockNumber, hash: &str) -> Result<()> {
        self.store
            .set_cursor(&self.service_name, position.value(), Some(hash))
            .await?;
        debug!("checkpoint updated");
        Ok(())
    }

    /// Reset the cursor to a specific position (for reorg recovery).
    ///
    /// # Errors
    /// Returns an error if the store fails to persist the cursor.
    #[instrument(skip(self, hash), fields(service = %self.service_name, position = %position.value()))]
    pub async fn reset_to(&self, position: BlockNumber, hash: &str) -> Result<()> {
        info!(position = %position.value(), "resetting checkpoint after reorg");
        self.store
            .set_cursor(&self.service_name, position.value(), Some(hash))
            .await
    }

    /// Get a reference to the underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Consume the manager and return the underlying store.
    pub fn into_store(self) -> S {
        self.store
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
