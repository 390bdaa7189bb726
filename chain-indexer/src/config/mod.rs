//! Configuration loading and validation for the chain-reconciler indexer.
//!
//! Configuration is loaded from multiple sources in order of precedence:
//! 1. Environment variables (highest)
//! 2. Environment-specific file (e.g., `development.toml`)
//! 3. Default file (`default.toml`)
//!
//! # Example
//!
//! ```ignore
//! use chain_indexer::config::Settings;
//!
//! let settings = Settings::load("development")?;
//! println!("RPC endpoints: {:?}", settings.rpc.endpoints);
//! ```

mod settings;

pub use settings::{
    BackfillSettings, DatabaseSettings, HealthSettings, LoggingSettings, MetricsSettings,
    OracleSettings, RealtimeSettings, RpcSettings, Settings, WorkerSettings,
};
