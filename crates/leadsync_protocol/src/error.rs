//! Error types for protocol types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding remote payloads.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The payload was valid JSON but did not have the expected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The remote returned an API-level error for the whole call.
    #[error("remote API error {code}: {message}")]
    Api {
        /// Remote error code.
        code: i64,
        /// Remote error message.
        message: String,
    },

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Creates an invalid payload error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }
}

/// A source contact that cannot be turned into a valid lead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The source identifier is missing or blank.
    #[error("missing source identifier")]
    MissingForeignKey,

    /// An active contact has no email address.
    #[error("contact {foreign_key} has no email address")]
    MissingEmail {
        /// Source identifier of the contact.
        foreign_key: String,
    },

    /// The email address is not usable by the remote store.
    #[error("contact {foreign_key} has malformed email address {email:?}")]
    MalformedEmail {
        /// Source identifier of the contact.
        foreign_key: String,
        /// The rejected address.
        email: String,
    },
}
