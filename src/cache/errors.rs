//! Cache error types

use thiserror::Error;

/// Errors that can occur during cache operations
///
/// None of these escape the [`CacheService`](super::CacheService) facade; they
/// are returned by stores and by the [`HybridManager`](super::HybridManager)
/// so each layer can decide routing and health from a concrete variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// Backend cannot be reached or the connection was lost
    #[error("Cache connection error: {0}")]
    ConnectionError(String),

    /// A single operation failed against a connected backend
    #[error("Cache backend error: {0}")]
    BackendError(String),

    /// Cache operation timed out
    #[error("Cache operation timed out: {0}")]
    Timeout(String),

    /// Failed to serialize or deserialize cache value
    #[error("Cache serialization error: {0}")]
    SerializationError(String),

    /// Every backend relevant to the operation is disconnected or failed
    #[error("No cache backend available: {0}")]
    Unavailable(String),

    /// Misconfiguration detected while building a store
    #[error("Cache configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Whether this error means the backend itself is gone (as opposed to a
    /// single command failing). Connection failures flip the owning handle
    /// to `Disconnected` and start reconnection.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failure_classification() {
        assert!(CacheError::ConnectionError("refused".into()).is_connection_failure());
        assert!(CacheError::Timeout("GET".into()).is_connection_failure());
        assert!(!CacheError::BackendError("WRONGTYPE".into()).is_connection_failure());
        assert!(!CacheError::SerializationError("eof".into()).is_connection_failure());
        assert!(!CacheError::Unavailable("both down".into()).is_connection_failure());
    }

    #[test]
    fn test_serde_json_error_converts_to_serialization_error() {
        let err = serde_json::from_str::<u32>("not a number").unwrap_err();
        let cache_err: CacheError = err.into();
        assert!(matches!(cache_err, CacheError::SerializationError(_)));
    }
}
