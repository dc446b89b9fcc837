//! Error types for the stagetree framework.

use thiserror::Error;

/// The main error type for stagetree operations.
#[derive(Debug, Error)]
pub enum StagetreeError {
    /// A run request or stage path failed validation.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A stage path string could not be parsed.
    #[error("{0}")]
    Format(#[from] FormatError),

    /// An operation was attempted in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Constructing the static stage tree failed. Fatal to the whole run.
    #[error("build fault: {0}")]
    Build(String),

    /// The persistence collaborator failed.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),
}

/// Error raised when a run request or stage path violates its contract.
///
/// Validation failures happen before any side effect and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// The first violated rule, in fixed check order.
    pub message: String,
}

impl ValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error raised when a stage path string contains a non-numeric segment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed stage path '{input}': segment '{segment}' is not a number")]
pub struct FormatError {
    /// The full input string.
    pub input: String,
    /// The offending segment.
    pub segment: String,
}

impl FormatError {
    /// Creates a new format error.
    #[must_use]
    pub fn new(input: impl Into<String>, segment: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            segment: segment.into(),
        }
    }
}

/// Errors reported by the persistence collaborator.
///
/// Failures on status and result writes are logged by the scheduler and do
/// not roll back work a branch has already completed.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    /// The backend could not be reached.
    #[error("persistence backend unavailable: {0}")]
    Unavailable(String),

    /// A create/status/result write was refused.
    #[error("persistence write failed: {0}")]
    WriteFailed(String),

    /// The collaborator rejected an existing job as stale or incompatible.
    #[error("job rejected: {0}")]
    JobRejected(String),

    /// The operation observed a cancellation signal.
    #[error("persistence operation cancelled: {0}")]
    Cancelled(String),
}
