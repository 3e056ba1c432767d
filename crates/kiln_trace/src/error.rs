//! Tracer errors.

use kiln_core::CoreError;
use kiln_log::EventError;

/// Tracer errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceError {
    /// Push or pop that does not match the top of the span stack
    #[error("Stack discipline violation: expected {expected:?}, found {found:?}")]
    StackDiscipline {
        /// Id the stack required
        expected: String,
        /// Id the caller supplied
        found: String,
    },

    /// Operation id was rejected
    #[error("Invalid operation id: {0}")]
    InvalidId(#[from] CoreError),

    /// Task lifecycle was violated
    #[error(transparent)]
    Lifecycle(#[from] EventError),
}

/// Result alias for tracer operations
pub type TraceResult<T> = Result<T, TraceError>;
