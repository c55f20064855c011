//! Error types for rate limiting operations.
//!
//! Three families of failure reach callers: invalid configuration (rejected
//! before any store access), store or connectivity failures, and deadlines
//! that elapse while a script is in flight. The last kind is indeterminate:
//! the script may or may not have committed.

use std::time::Duration;
use thiserror::Error;

/// Result type for rate limiting operations.
pub type Result<T> = std::result::Result<T, RateLimitError>;

/// Main error type for rate limiting operations.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connection error (e.g., Redis connection failed).
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

impl RateLimitError {
    /// Whether the outcome of the call is unknown.
    ///
    /// A timed out script may already have been applied by the store, so the
    /// caller must not assume either a grant or a denial.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Connection(ConnectionError::Timeout(_)))
    }

    /// Check if the calling layer may retry this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_retryable(),
            Self::Connection(_) => true,
            Self::Config(_) => false,
        }
    }
}

/// Storage-related errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Generic storage operation failed.
    #[error("{message}")]
    OperationFailed {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The store rejected or failed while evaluating a script.
    #[error("Script '{script}' failed: {message}")]
    Script {
        /// Name of the script.
        script: &'static str,
        /// Error reported by the store.
        message: String,
    },

    /// A key holds a value of a different type than the operation expects.
    #[error("WRONGTYPE operation against key '{key}'")]
    WrongType {
        /// Offending key.
        key: String,
    },

    /// A counter key holds a value that is not an integer.
    #[error("Value at '{key}' is not an integer")]
    NotAnInteger {
        /// Offending key.
        key: String,
    },

    /// The store returned a reply that does not have the expected shape.
    #[error("Malformed script reply: {0}")]
    MalformedReply(String),

    /// Connection pool exhausted.
    #[error("Connection pool exhausted")]
    PoolExhausted,
}

impl StorageError {
    /// Create a new operation failed error.
    pub fn operation_failed(message: impl Into<String>, retryable: bool) -> Self {
        Self::OperationFailed {
            message: message.into(),
            retryable,
        }
    }

    /// Create a script evaluation error.
    pub fn script(script: &'static str, message: impl Into<String>) -> Self {
        Self::Script {
            script,
            message: message.into(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::OperationFailed { retryable, .. } => *retryable,
            Self::PoolExhausted => true,
            _ => false,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid limiter configuration.
    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfig(String),

    /// Missing required configuration.
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Failed to connect.
    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    /// The round trip did not complete before the deadline.
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_retryable() {
        let err = StorageError::operation_failed("test", true);
        assert!(err.is_retryable());

        let err = StorageError::operation_failed("test", false);
        assert!(!err.is_retryable());

        let err = StorageError::PoolExhausted;
        assert!(err.is_retryable());

        let err = StorageError::WrongType { key: "tb:a".into() };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_timeout_is_indeterminate() {
        let err = RateLimitError::from(ConnectionError::Timeout(Duration::from_millis(50)));
        assert!(err.is_indeterminate());
        assert!(err.is_retryable());

        let err = RateLimitError::from(ConnectionError::ConnectionFailed("refused".into()));
        assert!(!err.is_indeterminate());

        let err = RateLimitError::from(ConfigError::InvalidConfig("window".into()));
        assert!(!err.is_indeterminate());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = RateLimitError::from(StorageError::script("token_bucket", "ERR boom"));
        assert_eq!(
            err.to_string(),
            "Storage error: Script 'token_bucket' failed: ERR boom"
        );

        let err = StorageError::WrongType { key: "sw:user".into() };
        assert!(err.to_string().contains("sw:user"));
    }
}
