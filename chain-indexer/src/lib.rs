//! Chain-reconciler indexer
//!
//! An online ingestion service that tails an EVM-compatible chain and an
//! external finality oracle, reconciling their views into a queryable
//! Postgres schema (`blocks`, `milestones`, `block_finality`).
//!
//! # Architecture
//!
//! The indexer follows a hexagonal architecture: domain workers in
//! [`indexer`] depend only on the port traits in [`ports`], which the
//! [`store`] module implements against Postgres.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         INDEXER CORE                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐  │
//! │  │ BlockIndexer │  │ Milestone    │  │ FinalityWriter /      │  │
//! │  │ / Backfiller │  │ Indexer /    │  │ PriorityFeeBackfiller │  │
//! │  │              │  │ Backfiller   │  │                      │  │
//! │  └──────┬───────┘  └──────┬───────┘  └──────────┬───────────┘  │
//! │         │                 │                     │              │
//! │         ▼                 ▼                     ▼              │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │              ports (BlockStore, MilestoneStore, ...)      │  │
//! │  └──────────────────────────┬───────────────────────────────┘  │
//! │                             ▼                                  │
//! │                   store::postgres::PostgresStore                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`types`] - Domain types (entities, primitives)
//! - [`error`] - Layered error types
//! - [`config`] - Configuration loading and validation
//! - [`metrics`] - Pure per-block and priority-fee metric computation
//! - [`indexer`] - Cursor/reorg bookkeeping and the forward/backward workers
//! - [`store`] - Data persistence (`PostgreSQL`)
//! - [`ports`] - Storage port traits implemented by `store`
//! - [`supervisor`] - Worker wiring, health endpoint, graceful shutdown
//! - [`util`] - Small shared helpers (sleep/range/unit conversions)
//!
//! # Getting Started
//!
//! ```bash
//! cp .env.example .env
//! sqlx migrate run
//! cargo run -- run
//! ```

#![doc(html_root_url = "https://docs.rs/chain-indexer")]

pub mod config;
pub mod error;
pub mod indexer;
pub mod metrics;
pub mod ports;
pub mod store;
pub mod supervisor;
pub mod types;
pub mod util;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version string
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}
