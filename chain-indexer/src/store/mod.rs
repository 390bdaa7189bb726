//! Data persistence layer (adapters for store ports).
//!
//! This module provides concrete implementations of the store ports
//! defined in [`crate::ports::store`]. The only implementation shipped
//! here uses `PostgreSQL` with `TimescaleDB` extensions for the
//! time-series tables.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Store Adapters                            │
//! │                                                                 │
//! │   ┌──────────────────────────────────────────────────────────┐  │
//! │   │                  PostgresStore                            │  │
//! │   │   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐   │  │
//! │   │   │    Block     │  │  Milestone   │  │  Finality    │   │  │
//! │   │   └──────────────┘  └──────────────┘  └──────────────┘   │  │
//! │   │   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐   │  │
//! │   │   │ IndexerState │  │    Stats     │  │WorkerStatus  │   │  │
//! │   │   └──────────────┘  └──────────────┘  └──────────────┘   │  │
//! │   └──────────────────────────────────────────────────────────┘  │
//! │                               │                                  │
//! │                               ▼                                  │
//! │   ┌──────────────────────────────────────────────────────────┐  │
//! │   │              SQLx Connection Pool                         │  │
//! │   │         (PostgreSQL + TimescaleDB)                        │  │
//! │   └──────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # TimescaleDB Hypertables
//!
//! We use TimescaleDB hypertables for the time-series tables:
//!
//! | Table | Partition Column | Chunk Interval |
//! |-------|------------------|----------------|
//! | `blocks` | `timestamp` | 1 day |
//! | `milestones` | `timestamp` | 1 day |
//! | `reorged_blocks` | `reorged_at` | 1 day |
//!
//! # Usage
//!
//! ```ignore
//! use chain_indexer::store::PostgresStore;
//! use sqlx::postgres::PgPoolOptions;
//!
//! let pool = PgPoolOptions::new()
//!     .max_connections(10)
//!     .connect("postgres://localhost/chain_reconciler")
//!     .await?;
//!
//! let store = PostgresStore::new(pool);
//! store.run_migrations().await?;
//! ```
//!
//! # Migrations
//!
//! Migrations are located in `migrations/` and run via `sqlx migrate run`
//! or the `migrate` CLI subcommand. See individual migration files for
//! schema details.

mod postgres;

pub use postgres::PostgresStore;

// Re-export commonly used types for convenience
pub use sqlx::postgres::PgPool;
