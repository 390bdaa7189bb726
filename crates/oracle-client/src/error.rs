//! Error types for the finality-oracle client.

use thiserror::Error;

/// Result type alias using [`OracleError`].
pub type Result<T> = std::result::Result<T, OracleError>;

/// Errors that can occur when talking to the finality oracle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OracleError {
    /// Failed to establish connection to an oracle endpoint.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Request timed out waiting for response.
    #[error("request timed out")]
    Timeout,

    /// Non-2xx HTTP status.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The requested resource does not exist (HTTP 404). Distinguished from
    /// [`Http`](Self::Http) so callers can treat a missing milestone as
    /// "not yet published" rather than a transient fault worth retrying.
    #[error("resource not found")]
    NotFound,

    /// Failed to serialize request or deserialize response.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Response was valid JSON but had unexpected structure.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Invalid configuration provided to the client.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Every configured endpoint failed past the backoff cap. Maps onto
    /// `DomainError::OracleExhausted` at the call site.
    #[error("oracle exhausted after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Total attempts made across all endpoints.
        attempts: usize,
        /// The last error observed before giving up.
        last_error: String,
    },
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Http(err.to_string())
        }
    }
}
