//! Error types for the queue and caches.

use offsync_codec::CodecError;
use offsync_protocol::{OperationId, OperationStatus, ProtocolError};
use offsync_storage::StorageError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the durable queue and caches.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The durable store rejected a read or write.
    ///
    /// An enqueue that returns this error did not queue the operation.
    #[error("durable storage unavailable: {0}")]
    StorageUnavailable(#[source] StorageError),

    /// The queue directory is held by another process.
    #[error("queue directory is locked by another process")]
    Locked,

    /// The journal holds a record that fails validation.
    #[error("journal corrupted: {message}")]
    Corrupted {
        /// What failed.
        message: String,
    },

    /// No operation with this id.
    #[error("operation {0} not found")]
    OperationNotFound(OperationId),

    /// An operation with this id is already queued.
    #[error("operation {0} is already queued")]
    DuplicateOperation(OperationId),

    /// The status machine forbids the requested move.
    #[error("operation {id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        /// Operation.
        id: OperationId,
        /// Current status.
        from: OperationStatus,
        /// Requested status.
        to: OperationStatus,
    },

    /// Only settled or stuck operations may be purged by hand.
    #[error("operation {id} is {status} and cannot be purged")]
    NotPurgeable {
        /// Operation.
        id: OperationId,
        /// Its status.
        status: OperationStatus,
    },

    /// Invalid record contents (for example an expiry before the write time).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl CoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Whether the failure is the durable store itself.
    #[must_use]
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::Locked)
    }
}

impl From<StorageError> for CoreError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Locked { .. } => Self::Locked,
            other => Self::StorageUnavailable(other),
        }
    }
}

impl From<CodecError> for CoreError {
    fn from(e: CodecError) -> Self {
        Self::corrupted(e.to_string())
    }
}
