//! Configuration for the finality-oracle client.
//!
//! Unlike the execution-layer RPC client (fixed delay between bounded
//! retry rounds), the oracle's typical failure is brief overload rather
//! than persistent endpoint death, so retry uses exponential backoff with
//! jitter, capped at 60 seconds (spec §4.2).

use std::time::Duration;

use crate::error::{OracleError, Result};

/// Cap on the computed backoff delay, regardless of attempt count.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Base delay for the first retry; doubles each subsequent attempt before
/// the jitter and cap are applied.
pub const BASE_BACKOFF: Duration = Duration::from_millis(250);

/// Default number of attempts across the endpoint list before surfacing
/// [`OracleError::Exhausted`].
pub const DEFAULT_MAX_ATTEMPTS: usize = 6;

/// Default request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on concurrent in-flight requests for `milestones()`.
pub const DEFAULT_MAX_PARALLEL: usize = 8;

/// Configuration for [`OracleClient`](crate::OracleClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ordered list of oracle endpoint URLs, rotated on failure.
    pub endpoints: Vec<String>,

    /// Request timeout for HTTP calls.
    pub timeout: Duration,

    /// Total attempts across the endpoint list before giving up.
    pub max_attempts: usize,

    /// Maximum number of concurrent in-flight requests for `milestones()`.
    pub max_parallel: usize,
}

impl ClientConfig {
    /// Create a new configuration with the default backoff policy.
    #[must_use]
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the total attempt budget.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the max-parallel bound for `milestones()`.
    #[must_use]
    pub const fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// Returns [`OracleError::InvalidConfig`] if the endpoint list is empty
    /// or `max_parallel`/`max_attempts` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(OracleError::InvalidConfig(
                "at least one oracle endpoint is required".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(OracleError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.max_parallel == 0 {
            return Err(OracleError::InvalidConfig(
                "max_parallel must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Compute the backoff delay for a given (zero-based) attempt number:
/// `min(base * 2^attempt, cap)` plus up to 50% jitter.
#[must_use]
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponential = BASE_BACKOFF.saturating_mul(1_u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = exponential.min(MAX_BACKOFF);
    let jitter_fraction = rand::random::<f64>() * 0.5;
    capped.mul_f64(1.0 + jitter_fraction).min(MAX_BACKOFF)
}
