//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding wire messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload is not valid JSON.
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// Payload has no string `type` field.
    #[error("message has no string `type` field")]
    MissingType,

    /// Payload has a known `type` but the wrong shape.
    #[error("malformed {kind} message: {reason}")]
    Malformed {
        /// Wire tag of the rejected message
        kind: &'static str,
        /// What failed validation
        reason: String,
    },

    /// Outbound message could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),
}
