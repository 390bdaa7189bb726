//! Execution-layer JSON-RPC client with endpoint rotation, bounded retry
//! and bounded-concurrency fan-out.
//!
//! # Quick Start
//!
//! ```ignore
//! use rpc_client::RpcClient;
//!
//! let client = RpcClient::new(vec![
//!     "https://rpc-a.example.com".into(),
//!     "https://rpc-b.example.com".into(),
//! ])?;
//!
//! let latest = client.latest_block_number().await?;
//! let block = client.block_by_number(latest).await?;
//! ```
//!
//! # Modules
//!
//! - [`client`] - the main [`RpcClient`] implementation
//! - [`config`] - configuration via [`ClientConfig`]
//! - [`types`] - request/response types
//! - [`error`] - error types with retry/exhaustion context

#![doc(html_root_url = "https://docs.chain-reconciler.io/rpc-client")]

pub mod client;
pub mod config;
pub mod error;
pub mod types;

pub use client::RpcClient;
pub use config::ClientConfig;
pub use error::{Result, RpcError};
pub use types::{FullBlock, Receipt};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version string.
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}
