//! Layered error types for the chain reconciler.
//!
//! - [`DomainError`] - ingestion/finality business rules (reorgs, exhaustion)
//! - [`InfraError`] - infrastructure errors (database, RPC, serialization)
//! - [`AppError`] - application-level errors combining domain and infra
//! - [`ApiError`] - HTTP errors for the health endpoint
//!
//! # Error Philosophy
//!
//! - Domain errors are expected operational conditions; workers catch them,
//!   log, and persist a `WorkerStatus` snapshot rather than propagating.
//! - Infrastructure errors are logged but details are hidden from callers.
//! - The `Result` type alias uses `AppError` for application code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// DOMAIN ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Domain-level errors representing ingestion/finality business rules.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DomainError {
    /// Every configured RPC endpoint failed for `maxRetries` rounds.
    #[error("rpc exhausted after retrying every endpoint: {last_error}")]
    RpcExhausted {
        /// The last error observed across all endpoints.
        last_error: String,
    },

    /// Every configured finality-oracle endpoint failed past the backoff cap.
    #[error("oracle exhausted after retrying every endpoint: {last_error}")]
    OracleExhausted {
        /// The last error observed across all endpoints.
        last_error: String,
    },

    /// A reorg walked back further than the configured maximum depth.
    #[error("reorg too deep: {depth} blocks exceeds max {max}")]
    ReorgTooDeep {
        /// Observed depth of the reorg.
        depth: u64,
        /// Configured maximum allowed depth.
        max: u64,
    },

    /// A reorg walk reached a block already marked `finalized`. Fatal: this
    /// should not happen under honest consensus.
    #[error("finality violation: block {block_number} was reorged after finalization")]
    FinalityViolation {
        /// The finalized block number that was reorged.
        block_number: u64,
    },

    /// The current operation observed a cancellation signal.
    #[error("operation cancelled")]
    Cancelled,
}

// ═══════════════════════════════════════════════════════════════════════════════
// INFRASTRUCTURE ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Infrastructure-level errors from external systems.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum InfraError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// RPC transport error (execution-layer or oracle HTTP client).
    #[error("rpc error: {0}")]
    Rpc(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected shape in an RPC/oracle response (missing/mistyped field).
    #[error("unexpected response shape: {0}")]
    DataShape(String),

    /// Resource not found in storage.
    #[error("resource not found")]
    NotFound,

    /// Connection pool exhausted.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// Timeout waiting for operation.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Configuration file error.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

// ═══════════════════════════════════════════════════════════════════════════════
// APPLICATION ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Application-level errors combining domain and infrastructure errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppError {
    /// Domain logic error.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Infrastructure error.
    #[error(transparent)]
    Infra(#[from] InfraError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Initialization error.
    #[error("initialization error: {0}")]
    Initialization(String),

    /// Graceful shutdown requested.
    #[error("shutdown requested")]
    ShutdownRequested,
}

/// Type alias for application Results.
pub type Result<T> = std::result::Result<T, AppError>;

// ═══════════════════════════════════════════════════════════════════════════════
// API ERRORS (HTTP-specific, health endpoint only)
// ═══════════════════════════════════════════════════════════════════════════════

/// API-level errors with HTTP status codes, used by the health endpoint.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Wrapped application error.
    #[error(transparent)]
    App(#[from] AppError),

    /// At least one worker is unhealthy.
    #[error("unhealthy: {0}")]
    Unhealthy(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::Unhealthy(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "UNHEALTHY",
                self.to_string(),
            ),
            Self::App(_) => {
                tracing::error!(error = ?self, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "internal error".into(),
                )
            }
        };

        (
            status,
            Json(json!({
                "error": {
                    "code": code,
                    "message": message
                }
            })),
        )
            .into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONVENIENCE CONVERSIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Endpoint exhaustion is a domain-significant condition (it determines
/// whether a worker backs off as "transient" vs. treats the batch as
/// failed); everything else from the RPC client is an infrastructure detail.
impl From<rpc_client::RpcError> for AppError {
    fn from(err: rpc_client::RpcError) -> Self {
        match err {
            rpc_client::RpcError::AllEndpointsExhausted { last_error, .. } => {
                DomainError::RpcExhausted { last_error }.into()
            }
            other => InfraError::Rpc(Box::new(other)).into(),
        }
    }
}

/// Mirrors the `RpcError` conversion: oracle exhaustion maps to
/// [`DomainError::OracleExhausted`], everything else is infrastructure noise.
impl From<oracle_client::OracleError> for AppError {
    fn from(err: oracle_client::OracleError) -> Self {
        match err {
            oracle_client::OracleError::Exhausted { last_error, .. } => {
                DomainError::OracleExhausted { last_error }.into()
            }
            other => InfraError::Rpc(Box::new(other)).into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
