//! Error types for the sync engine.

use leadsync_protocol::{ProtocolError, ValidationError};
use leadsync_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while refreshing, reconciling or dispatching.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Network or authentication failure talking to the remote store.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote store answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A source contact is not valid.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The cache backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A cache entry could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An internal invariant was violated. The pass is aborted rather than
    /// risk writing wrong data.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl EngineError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates an invariant violation.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Transport { retryable: true, .. })
    }

    /// Returns true if the remote call as a whole failed (as opposed to a
    /// local problem).
    pub fn is_remote(&self) -> bool {
        matches!(self, EngineError::Transport { .. } | EngineError::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(EngineError::transport_retryable("connection reset").is_retryable());
        assert!(!EngineError::transport_fatal("invalid secret key").is_retryable());
        assert!(!EngineError::invariant("create with id").is_retryable());
    }

    #[test]
    fn remote_errors() {
        assert!(EngineError::transport_fatal("x").is_remote());
        assert!(EngineError::Protocol(ProtocolError::invalid("x")).is_remote());
        assert!(!EngineError::Config("x".into()).is_remote());
    }

    #[test]
    fn error_display() {
        let err = EngineError::invariant("create carries remote id 5");
        assert_eq!(
            err.to_string(),
            "internal invariant violated: create carries remote id 5"
        );
        let err = EngineError::from(ValidationError::MissingForeignKey);
        assert!(err.to_string().contains("missing source identifier"));
    }
}
