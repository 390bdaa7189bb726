//! Configuration for the execution-layer RPC client.
//!
//! Endpoint list plus the bounded-retry policy (spec §4.1, §6: default
//! `{maxRetries: 3, delayMs: 500}`).

use std::time::Duration;

use crate::error::{Result, RpcError};

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Default timeout for HTTP requests to an RPC endpoint.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retry rounds across the endpoint list before giving up.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Default delay between retry rounds.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Default bound on concurrent in-flight requests for fan-out calls.
pub const DEFAULT_MAX_PARALLEL: usize = 8;

/// Minimum allowed timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum allowed timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(300);

// ═══════════════════════════════════════════════════════════════════════════════
// CLIENT CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for [`RpcClient`](crate::RpcClient).
///
/// ```
/// use rpc_client::ClientConfig;
///
/// let config = ClientConfig::new(vec!["https://rpc-a.example.com".into()])
///     .with_max_retries(5);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ordered list of RPC endpoint URLs. The client rotates through these
    /// on failure; order is otherwise insignificant.
    pub endpoints: Vec<String>,

    /// Request timeout for HTTP calls.
    pub timeout: Duration,

    /// Number of retry rounds across the full endpoint list before
    /// surfacing [`RpcError::AllEndpointsExhausted`].
    pub max_retries: usize,

    /// Delay applied between retry rounds.
    pub retry_delay: Duration,

    /// Maximum number of concurrent in-flight requests for fan-out calls
    /// (`blocks_by_numbers`, `receipts_by_blocks`).
    pub max_parallel: usize,
}

impl ClientConfig {
    /// Create a new configuration with default retry policy.
    ///
    /// # Panics
    /// Never panics; validation happens in [`validate`](Self::validate).
    #[must_use]
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the number of retry rounds.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay between retry rounds.
    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Set the max-parallel bound for fan-out calls.
    #[must_use]
    pub const fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns [`RpcError::InvalidConfig`] if the endpoint list is empty, the
    /// timeout is out of range, or `max_parallel` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(RpcError::InvalidConfig(
                "at least one RPC endpoint is required".into(),
            ));
        }
        if self.timeout < MIN_TIMEOUT || self.timeout > MAX_TIMEOUT {
            return Err(RpcError::InvalidConfig(format!(
                "timeout must be between {MIN_TIMEOUT:?} and {MAX_TIMEOUT:?}"
            )));
        }
        if self.max_parallel == 0 {
            return Err(RpcError::InvalidConfig(
                "max_parallel must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
