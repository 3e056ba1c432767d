//! Core error types for KILN.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Invalid ID format
    #[error("Invalid ID: {reason}")]
    InvalidId {
        /// Why the id was rejected
        reason: String,
    },

    /// Invalid hash format
    #[error("Invalid hash: {reason}")]
    InvalidHash {
        /// Why the hash was rejected
        reason: String,
    },

    /// Invalid timestamp
    #[error("Invalid timestamp: {reason}")]
    InvalidTimestamp {
        /// Why the timestamp was rejected
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidId {
            reason: "empty".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid ID: empty");
    }

    #[test]
    fn test_error_equality() {
        let err1 = CoreError::InvalidHash { reason: "x".into() };
        let err2 = CoreError::InvalidHash { reason: "x".into() };
        assert_eq!(err1, err2);
        assert_ne!(err1, CoreError::InvalidTimestamp { reason: "x".into() });
    }
}
