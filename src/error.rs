//! # Error Types and Failure Taxonomy
//!
//! Defines the crate-level error enum plus the operation-level failure
//! taxonomy used by the retry, batch, and cache layers to decide whether a
//! failure is worth retrying.
//!
//! The taxonomy follows a simple rule: transport-level trouble (network,
//! timeout, 5xx, 429) is transient and retryable; anything the remote
//! service rejected deterministically (non-429 4xx, validation failures) is
//! permanent and retrying it only burns quota.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, TransitError>;

/// Top-level error type for the migration core.
#[derive(Debug, thiserror::Error)]
pub enum TransitError {
    /// Configuration failed validation at construction time.
    ///
    /// Carries every violated constraint, not just the first one found.
    #[error("invalid configuration: {}", format_violations(.violations))]
    Configuration { violations: Vec<ConstraintViolation> },

    /// Rate limiter failure (registry misuse, impossible state).
    #[error("rate limiter error: {0}")]
    RateLimit(String),

    /// Batch processor failure that aborts a whole run.
    #[error("batch processing error: {0}")]
    Batch(String),

    /// Cache-level failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Orchestrator-level failure (construction, wiring).
    #[error("orchestration error: {0}")]
    Orchestration(String),

    /// The run-scoped shutdown signal was raised.
    #[error("operation cancelled by shutdown signal")]
    Shutdown,
}

impl TransitError {
    /// Convenience constructor for a single-violation configuration error.
    pub fn configuration(violation: ConstraintViolation) -> Self {
        TransitError::Configuration {
            violations: vec![violation],
        }
    }
}

fn format_violations(violations: &[ConstraintViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single violated configuration constraint.
///
/// Validation collects all violations before reporting so an operator can
/// fix a misconfigured deployment in one pass.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{parameter} = {value} is outside the valid range {valid_range}")]
pub struct ConstraintViolation {
    /// Name of the offending parameter.
    pub parameter: String,
    /// The offending value, rendered for display.
    pub value: String,
    /// Human-readable description of the valid range.
    pub valid_range: String,
}

impl ConstraintViolation {
    pub fn new(
        parameter: impl Into<String>,
        value: impl fmt::Display,
        valid_range: impl Into<String>,
    ) -> Self {
        Self {
            parameter: parameter.into(),
            value: value.to_string(),
            valid_range: valid_range.into(),
        }
    }
}

/// Coarse failure classification used to gate retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// May succeed on retry (network, timeout, 5xx, 429).
    Transient,
    /// Will never succeed if retried (non-429 4xx, malformed input).
    Permanent,
    /// Invalid configuration; fails fast at construction, never mid-run.
    Configuration,
    /// Resource pressure (pool exhaustion, memory); degrade, don't retry.
    Resource,
}

/// A failure surfaced by a unit-of-work or refresh operation.
///
/// This is the error type collaborators return from [`ChunkHandler`] and
/// [`EntryRefresher`] implementations; it is `Clone` because a chunk-level
/// failure fans out to every item in the chunk.
///
/// [`ChunkHandler`]: crate::batch::ChunkHandler
/// [`EntryRefresher`]: crate::cache::EntryRefresher
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessingError {
    /// Transport-level failure before a response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The operation exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Remote service returned a 5xx.
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Remote service returned 429 Too Many Requests.
    #[error("rate limited (HTTP 429), retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Remote service returned a non-429 4xx.
    #[error("client error (HTTP {status}): {message}")]
    Client { status: u16, message: String },

    /// The payload or response failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Local resource pressure prevented the operation.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The run was cancelled before the operation started.
    #[error("cancelled")]
    Cancelled,
}

impl ProcessingError {
    /// Classify this failure for retry gating.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::Network(_)
            | ProcessingError::Timeout(_)
            | ProcessingError::Server { .. }
            | ProcessingError::RateLimited { .. } => ErrorKind::Transient,
            ProcessingError::Client { .. }
            | ProcessingError::Validation(_)
            | ProcessingError::Cancelled => ErrorKind::Permanent,
            ProcessingError::ResourceExhausted(_) => ErrorKind::Resource,
        }
    }

    /// The HTTP status this failure maps to, for rate-limiter feedback.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProcessingError::Server { status, .. } | ProcessingError::Client { status, .. } => {
                Some(*status)
            }
            ProcessingError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}
