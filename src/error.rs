//! Unified error taxonomy.
//!
//! One sum type for every outbound/operational failure in the orchestrator,
//! each carrying whether a caller should retry it, the way a workflow
//! engine collapses its step-execution failures into a single tagged
//! enum rather than propagating raw library errors.

use std::time::Duration;
use thiserror::Error;

/// The stable category names used in logging and history rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimit,
    Server,
    Authentication,
    Configuration,
    Validation,
    Decryption,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Server => "server",
            Self::Authentication => "authentication",
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::Decryption => "decryption",
            Self::Unknown => "unknown",
        }
    }
}

/// The orchestrator's single error type. Outbound calls (connectors,
/// indexer-managers, notification channels) and the credential cipher all
/// produce this.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited")]
    RateLimit { retry_after: Option<Duration> },

    #[error("upstream server error: HTTP {status}")]
    Server { status: u16 },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("decryption failed")]
    Decryption,

    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl OrchestratorError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout => ErrorCategory::Timeout,
            Self::RateLimit { .. } => ErrorCategory::RateLimit,
            Self::Server { .. } => ErrorCategory::Server,
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Decryption => ErrorCategory::Decryption,
            Self::Unknown(_) => ErrorCategory::Unknown,
        }
    }

    /// Authentication, configuration, and validation never resolve by
    /// waiting; everything else is worth a retry.
    pub fn retryable(&self) -> bool {
        !matches!(
            self,
            Self::Authentication(_) | Self::Configuration(_) | Self::Validation(_) | Self::Decryption
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A decryption-specific error raised by the credential cipher. Kept
/// distinct from `OrchestratorError` at the crypto boundary so callers that
/// only touch secrets don't have to match the whole taxonomy, then folded
/// into it at the edge.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("decryption failed: {0}")]
pub struct DecryptionError(pub &'static str);

impl From<DecryptionError> for OrchestratorError {
    fn from(_: DecryptionError) -> Self {
        OrchestratorError::Decryption
    }
}

/// Database errors surfaced by the `sqlx`-backed repository implementations
/// (behind the `database` feature) collapse into `Unknown` — the caller
/// only ever sees "this storage call failed," the taxonomy here is about
/// outbound-call classification, not storage-layer detail.
#[cfg(feature = "database")]
impl From<sqlx::Error> for OrchestratorError {
    fn from(error: sqlx::Error) -> Self {
        OrchestratorError::Unknown(format!("database error: {error}"))
    }
}
