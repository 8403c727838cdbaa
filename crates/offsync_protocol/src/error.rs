//! Protocol errors.

use offsync_codec::CodecError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Validation and decoding failures for protocol types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A required field is absent or empty.
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    /// A status string outside the operation status set.
    #[error("invalid status value `{0}`")]
    InvalidStatus(String),

    /// An HTTP method the queue does not carry.
    #[error("invalid method `{0}`")]
    InvalidMethod(String),

    /// A status transition the state machine forbids.
    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Cache expiry at or before the write timestamp.
    #[error("expiry {expiry} must be later than timestamp {timestamp}")]
    InvalidExpiry {
        /// Write time.
        timestamp: u64,
        /// Requested expiry.
        expiry: u64,
    },

    /// Malformed JSON body.
    #[error("malformed JSON: {0}")]
    Json(String),

    /// Journal payload failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}
