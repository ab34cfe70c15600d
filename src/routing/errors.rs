//! Gap detector error types
//!
//! Error codes:
//! - GAP_SOURCE_FAILED (sequence source query or transaction failure)
//! - GAP_PERSISTENCE_FAILED (gap save rolled back, pass aborted)
//! - GAP_REPAIR_FAILED (overlap repair rolled back, pass aborted)
//! - GAP_CONTEXT_FAILED (cluster context store unreadable or unwritable)
//! - GAP_CONFIG_INVALID
//! - GAP_NOT_PREPARED (reconciliation requested before any registry load)
//! - GAP_IO_FAILED
//!
//! Validation rejections of individual gaps are not errors; see
//! [`GapRejection`](super::GapRejection).

use std::io;

use thiserror::Error;

/// Result type for gap detector operations
pub type GapResult<T> = Result<T, GapError>;

/// Gap detector errors
#[derive(Debug, Error)]
pub enum GapError {
    /// A query or transaction call against the sequence source failed
    #[error("Sequence source failure: {0}")]
    Source(String),

    /// Saving gap edits failed; the transaction was rolled back
    #[error("Gap persistence failed: {0}")]
    Persistence(String),

    /// Repairing overlapping gaps failed; the transaction was rolled back
    #[error("Gap overlap repair failed: {0}")]
    Repair(String),

    /// The cluster context store could not be read or written
    #[error("Cluster context failure: {0}")]
    Context(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// `after_routing` was called before any gap registry was loaded
    #[error("Gap registry not loaded; call before_routing first")]
    NotPrepared,

    /// Underlying file I/O failure
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    /// Malformed JSON in a config, context or state file
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GapError {
    /// Create a sequence source error.
    pub fn source(message: impl Into<String>) -> Self {
        Self::Source(message.into())
    }

    /// Create a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Create a repair error.
    pub fn repair(message: impl Into<String>) -> Self {
        Self::Repair(message.into())
    }

    /// Create a context store error.
    pub fn context(message: impl Into<String>) -> Self {
        Self::Context(message.into())
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            GapError::Source(_) => "GAP_SOURCE_FAILED",
            GapError::Persistence(_) => "GAP_PERSISTENCE_FAILED",
            GapError::Repair(_) => "GAP_REPAIR_FAILED",
            GapError::Context(_) => "GAP_CONTEXT_FAILED",
            GapError::Configuration(_) => "GAP_CONFIG_INVALID",
            GapError::NotPrepared => "GAP_NOT_PREPARED",
            GapError::Io(_) | GapError::Json(_) => "GAP_IO_FAILED",
        }
    }

    /// Whether this error aborts the current routing pass.
    ///
    /// Configuration errors are raised before any pass starts.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GapError::Configuration(_))
    }
}
