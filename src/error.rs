//! Error taxonomy for the retrieval core.
//!
//! Every fallible core operation returns [`CoreError`]. The HTTP layer maps
//! each variant to a status code and a machine-readable error code; the CLI
//! wraps them in `anyhow` with context. Mutating operations that fail leave
//! the session's index and store in their prior state.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad request input: rejected file type, oversized file, page limit,
    /// empty question. No state change.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The embedding or LLM provider call failed (rate limit, network,
    /// auth). Retryable from the caller's point of view.
    #[error("provider error: {0}")]
    Provider(String),

    /// Text extraction from the uploaded bytes failed.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// A vector's dimensionality does not match the configured index
    /// dimension. Indicates misconfiguration, not a per-request condition.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Malformed configuration, fatal at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Unknown document or session.
    #[error("not found: {0}")]
    NotFound(String),

    /// Registering another document would exceed the per-session limit.
    #[error("quota exceeded: session already holds {limit} documents")]
    QuotaExceeded { limit: usize },
}

pub type Result<T> = std::result::Result<T, CoreError>;
