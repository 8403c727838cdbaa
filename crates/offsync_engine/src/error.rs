//! Error types for the sync engine.

use offsync_core::CoreError;
use offsync_protocol::{OperationId, ProtocolError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The durable queue could not be read or written.
    ///
    /// Always surfaced; an enqueue failing this way queued nothing.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] CoreError),

    /// Any other queue-level failure, such as an unknown operation id.
    #[error("queue error: {0}")]
    Queue(#[source] CoreError),

    /// Dropped connection or a 5xx/408/429 reply.
    #[error("transient network failure: {message}")]
    TransientNetwork {
        /// Error message.
        message: String,
    },

    /// The request exceeded its timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The server rejected the request with a non-409 4xx.
    #[error("request rejected with status {status}: {message}")]
    ClientRequest {
        /// HTTP status.
        status: u16,
        /// Server message.
        message: String,
    },

    /// The server reported a conflict for this operation.
    #[error("conflict detected for operation {operation_id}")]
    ConflictDetected {
        /// The conflicting operation.
        operation_id: OperationId,
    },

    /// `/sync/resolve` refused the request.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Missing, invalid or expired bearer token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The status machine forbids the requested move.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The engine was shut down.
    #[error("sync engine is shut down")]
    ShutDown,
}

/// Failures of conflict resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// Unknown id, or an operation that was never in conflict.
    #[error("no conflict found for operation {0}")]
    NotFound(OperationId),

    /// The conflict was already settled differently.
    #[error("conflict for operation {0} is already resolved")]
    AlreadyResolved(OperationId),
}

impl SyncError {
    /// Creates a transient network error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientNetwork {
            message: message.into(),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransientNetwork { .. } | SyncError::Timeout | SyncError::NotConnected
        )
    }

    /// Returns true for failures of the durable queue itself.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, SyncError::StorageUnavailable(_))
    }
}

impl From<CoreError> for SyncError {
    fn from(e: CoreError) -> Self {
        match e {
            e if e.is_storage_failure() => SyncError::StorageUnavailable(e),
            CoreError::InvalidTransition { from, to, .. } => SyncError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            },
            other => SyncError::Queue(other),
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(e: ProtocolError) -> Self {
        SyncError::Protocol(e.to_string())
    }
}
