//! Finality-oracle REST client with endpoint rotation and exponential
//! backoff.
//!
//! # Quick Start
//!
//! ```ignore
//! use oracle_client::OracleClient;
//!
//! let client = OracleClient::new(vec![
//!     "https://oracle-a.example.com".into(),
//!     "https://oracle-b.example.com".into(),
//! ])?;
//!
//! let latest = client.latest().await?;
//! ```
//!
//! # Modules
//!
//! - [`client`] - the main [`OracleClient`] implementation
//! - [`config`] - configuration via [`ClientConfig`], plus [`config::backoff_delay`]
//! - [`types`] - response types
//! - [`error`] - error types with retry/exhaustion context

#![doc(html_root_url = "https://docs.chain-reconciler.io/oracle-client")]

pub mod client;
pub mod config;
pub mod error;
pub mod types;

pub use client::OracleClient;
pub use config::ClientConfig;
pub use error::{OracleError, Result};
pub use types::OracleMilestone;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version string.
#[must_use]
pub const fn version() -> &'static str {
    VERSION
}
