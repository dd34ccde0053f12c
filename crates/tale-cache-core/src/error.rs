//! Error types for cache operations

use thiserror::Error;

/// Main error type for all cache operations
///
/// `Clone` so that a single failure can be handed to every awaiter of a
/// coalesced operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Backend connection failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Backend operation failed
    #[error("backend error: {0}")]
    Backend(String),

    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Persisted storage rejected the operation
    #[error("storage error: {0}")]
    Storage(String),

    /// Persisted storage is out of space
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Store is not usable at all (disabled, revoked, circuit open)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The value producer failed
    #[error("producer failed: {0}")]
    Producer(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),

    /// Timeout
    #[error("operation timed out")]
    Timeout,
}

impl CacheError {
    /// Whether the error originates in the backing store rather than in the
    /// caller's data
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            CacheError::Connection(_)
                | CacheError::Backend(_)
                | CacheError::Unavailable(_)
                | CacheError::Timeout
                | CacheError::Internal(_)
        )
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::Connection("refused".to_string());
        assert_eq!(err.to_string(), "connection error: refused");

        let err = CacheError::QuotaExceeded;
        assert_eq!(err.to_string(), "storage quota exceeded");

        let err = CacheError::Unavailable("circuit open".to_string());
        assert_eq!(err.to_string(), "store unavailable: circuit open");
    }

    #[test]
    fn test_backend_failure_classification() {
        assert!(CacheError::Backend("boom".into()).is_backend_failure());
        assert!(CacheError::Timeout.is_backend_failure());
        assert!(!CacheError::Deserialization("bad json".into()).is_backend_failure());
        assert!(!CacheError::Producer("db down".into()).is_backend_failure());
    }

    #[test]
    fn test_error_clone() {
        let err = CacheError::Timeout;
        assert_eq!(err.clone(), err);
    }
}
