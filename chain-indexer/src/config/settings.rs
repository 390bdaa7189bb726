//! Settings structs and loading logic.
//!
//! All settings have sensible defaults and can be overridden via
//! environment variables or configuration files.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Execution-layer RPC configuration.
    pub rpc: RpcSettings,
    /// Finality-oracle configuration.
    pub oracle: OracleSettings,
    /// Database configuration.
    pub database: DatabaseSettings,
    /// Worker poll intervals, batch sizes and thresholds.
    pub workers: WorkerSettings,
    /// One-off backfill targets (used by the `backfill` CLI command).
    pub backfill: BackfillSettings,
    /// Health endpoint configuration.
    pub health: HealthSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Process telemetry configuration.
    pub metrics: MetricsSettings,
    /// Fire-and-forget real-time push sink configuration.
    pub realtime: RealtimeSettings,
}

impl Settings {
    /// Load settings from configuration files and environment variables.
    ///
    /// Files are loaded in this order (later overrides earlier):
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (if exists)
    /// 3. Environment variables with `INDEXER_` prefix
    ///
    /// # Arguments
    /// * `environment` - Environment name (e.g., "development", "production")
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration is invalid or cannot be loaded.
    pub fn load(environment: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("rpc.endpoints", vec!["http://localhost:8545"])?
            .set_default("rpc.max_retries", 3)?
            .set_default("rpc.retry_delay_ms", 500)?
            .set_default("rpc.request_timeout_ms", 30000)?
            .set_default("rpc.max_parallel", 8)?
            .set_default("oracle.endpoints", vec!["http://localhost:9191"])?
            .set_default("oracle.max_attempts", 6)?
            .set_default("oracle.request_timeout_ms", 10000)?
            .set_default("oracle.max_parallel", 8)?
            .set_default("database.url", "postgres://localhost/chain_reconciler")?
            .set_default("database.max_connections", 30)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout_ms", 5000)?
            .set_default("database.idle_timeout_ms", 600_000)?
            .set_default("database.statement_timeout_ms", 30000)?
            .set_default("workers.block_poll_interval_ms", 1000)?
            .set_default("workers.milestone_poll_interval_ms", 2000)?
            .set_default("workers.fast_poll_interval_ms", 100)?
            .set_default("workers.lag_threshold_blocks", 10)?
            .set_default("workers.block_batch_size", 50)?
            .set_default("workers.milestone_batch_size", 20)?
            .set_default("workers.priority_fee_batch_size", 200)?
            .set_default("workers.enrichment_deadline_secs", 300)?
            .set_default("workers.finality_window_days", 10)?
            .set_default("workers.max_reorg_depth", 64)?
            .set_default("workers.keep_blocks", 500_000)?
            .set_default("workers.worker_error_sleep_secs", 5)?
            .set_default("backfill.target_block", Option::<i64>::None)?
            .set_default("backfill.target_sequence", Option::<i64>::None)?
            .set_default("health.host", "0.0.0.0")?
            .set_default("health.port", 8080)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("logging.file_path", Option::<String>::None)?
            .set_default("metrics.enabled", true)?
            .set_default("metrics.host", "0.0.0.0")?
            .set_default("metrics.port", 9090)?
            .set_default("realtime.enabled", false)?
            .set_default("realtime.endpoint", Option::<String>::None)?
            .set_default("realtime.timeout_ms", 2000)?
            // Load default configuration file
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            // Load environment-specific file
            .add_source(File::with_name(&format!("{config_dir}/{environment}")).required(false))
            // Override with environment variables (INDEXER_ prefix)
            .add_source(
                Environment::with_prefix("INDEXER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("rpc.endpoints")
                    .with_list_parse_key("oracle.endpoints")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load settings from a specific file path.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    /// Validate settings and return any validation errors.
    ///
    /// # Errors
    /// Returns a list of validation error messages.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.rpc.endpoints.is_empty() {
            errors.push("rpc.endpoints cannot be empty".into());
        }
        if self.rpc.max_parallel == 0 {
            errors.push("rpc.max_parallel must be non-zero".into());
        }

        if self.oracle.endpoints.is_empty() {
            errors.push("oracle.endpoints cannot be empty".into());
        }
        if self.oracle.max_parallel == 0 {
            errors.push("oracle.max_parallel must be non-zero".into());
        }

        if self.database.url.is_empty() {
            errors.push("database.url cannot be empty".into());
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be non-zero".into());
        }
        if self.database.min_connections > self.database.max_connections {
            errors.push("database.min_connections cannot exceed max_connections".into());
        }

        if self.workers.block_batch_size == 0 {
            errors.push("workers.block_batch_size must be non-zero".into());
        }
        if self.workers.milestone_batch_size == 0 {
            errors.push("workers.milestone_batch_size must be non-zero".into());
        }

        if self.health.port == 0 {
            errors.push("health.port must be non-zero".into());
        }

        if self.realtime.enabled && self.realtime.endpoint.is_none() {
            errors.push("realtime.endpoint must be set when realtime.enabled is true".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Execution-layer RPC configuration (spec §4.1, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct RpcSettings {
    /// Ordered RPC endpoint URLs.
    pub endpoints: Vec<String>,
    /// Maximum retry rounds across the endpoint list.
    pub max_retries: usize,
    /// Fixed delay between retry rounds, in milliseconds.
    pub retry_delay_ms: u64,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Maximum concurrent in-flight requests for fan-out calls.
    pub max_parallel: usize,
}

impl RpcSettings {
    /// Get the retry delay as a `Duration`.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Finality-oracle configuration (spec §4.2, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct OracleSettings {
    /// Ordered oracle endpoint URLs.
    pub endpoints: Vec<String>,
    /// Maximum attempts across the endpoint list before giving up.
    pub max_attempts: usize,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Maximum concurrent in-flight requests for `milestones()`.
    pub max_parallel: usize,
}

impl OracleSettings {
    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum connections in the pool.
    pub max_connections: u32,
    /// Minimum connections to maintain.
    pub min_connections: u32,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Idle connection timeout in milliseconds.
    pub idle_timeout_ms: u64,
    /// Per-statement timeout in milliseconds (spec §5: 30s).
    pub statement_timeout_ms: u64,
}

impl DatabaseSettings {
    /// Get the connection timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Get the idle timeout as a `Duration`.
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Get the statement timeout as a `Duration`.
    #[must_use]
    pub const fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

/// Worker poll intervals, batch sizes and thresholds (spec §4.4-4.11, §5).
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSettings {
    /// Block indexer poll interval when caught up, in milliseconds.
    pub block_poll_interval_ms: u64,
    /// Milestone indexer poll interval, in milliseconds.
    pub milestone_poll_interval_ms: u64,
    /// Poll interval used while a forward worker is lagging (spec §4.4:
    /// sub-second cadence when behind by more than `lag_threshold_blocks`).
    pub fast_poll_interval_ms: u64,
    /// Lag, in blocks, past which the block indexer switches to the fast
    /// poll cadence.
    pub lag_threshold_blocks: u64,
    /// Blocks fetched per batch by the forward/backward block workers.
    pub block_batch_size: u64,
    /// Sequence ids fetched per batch by the forward/backward milestone workers.
    pub milestone_batch_size: u64,
    /// Rows scanned per pass by the historical priority-fee backfiller.
    pub priority_fee_batch_size: u64,
    /// Deadline for the live indexer's reliable enrichment wait, in seconds.
    pub enrichment_deadline_secs: u64,
    /// Width of the rolling window the finality writer reconciles against, in days.
    pub finality_window_days: i64,
    /// Reorg depth past which the reorg handler raises `ReorgTooDeep`.
    pub max_reorg_depth: u64,
    /// Number of most-recent block hashes retained for reorg comparison.
    pub keep_blocks: u64,
    /// Sleep applied by a worker after it records an error snapshot, in seconds.
    pub worker_error_sleep_secs: u64,
}

impl WorkerSettings {
    /// Get the normal block-poll interval as a `Duration`.
    #[must_use]
    pub const fn block_poll_interval(&self) -> Duration {
        Duration::from_millis(self.block_poll_interval_ms)
    }

    /// Get the milestone-poll interval as a `Duration`.
    #[must_use]
    pub const fn milestone_poll_interval(&self) -> Duration {
        Duration::from_millis(self.milestone_poll_interval_ms)
    }

    /// Get the lagging-tip poll interval as a `Duration`.
    #[must_use]
    pub const fn fast_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fast_poll_interval_ms)
    }

    /// Get the enrichment deadline as a `Duration`.
    #[must_use]
    pub const fn enrichment_deadline(&self) -> Duration {
        Duration::from_secs(self.enrichment_deadline_secs)
    }

    /// Get the finality reconciliation window as a `chrono::Duration`.
    #[must_use]
    pub fn finality_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.finality_window_days)
    }

    /// Get the post-error sleep as a `Duration`.
    #[must_use]
    pub const fn worker_error_sleep(&self) -> Duration {
        Duration::from_secs(self.worker_error_sleep_secs)
    }
}

/// One-off backfill targets, consumed by the `backfill` CLI command.
#[derive(Debug, Clone, Deserialize)]
pub struct BackfillSettings {
    /// Target block number to backfill down to (inclusive).
    pub target_block: Option<i64>,
    /// Target milestone sequence id to backfill down to (inclusive).
    pub target_sequence: Option<i64>,
}

/// Health endpoint configuration (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct HealthSettings {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl HealthSettings {
    /// Get the socket address string.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,
    /// Log format (json, pretty).
    pub format: String,
    /// Optional file path for log output.
    pub file_path: Option<String>,
}

/// Process telemetry configuration (distinct from the domain metrics
/// computer in `crate::metrics`).
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSettings {
    /// Whether the Prometheus exporter is enabled.
    pub enabled: bool,
    /// Host to bind the metrics server to.
    pub host: String,
    /// Port for the metrics server.
    pub port: u16,
}

impl MetricsSettings {
    /// Get the metrics socket address string.
    #[must_use]
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Fire-and-forget real-time push sink configuration (spec §4.8, §4.10: the
/// enricher and finality writer optionally notify an external consumer
/// whose own ring buffer may still hold recently-seen blocks).
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeSettings {
    /// Whether the push sink is active. Disabled by default: most
    /// deployments have no external real-time consumer to notify.
    pub enabled: bool,
    /// Target URL for push notifications. Required when `enabled`.
    pub endpoint: Option<String>,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl RealtimeSettings {
    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
