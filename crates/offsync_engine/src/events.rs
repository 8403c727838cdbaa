//! Engine notifications.

use crate::trigger::TriggerReason;
use offsync_protocol::{
    ConflictPayload, EntityKey, OperationId, OperationStatus, ProcessSummary, Timestamp,
};

/// Events published on the engine's bus.
///
/// Subscribe with [`SyncEngine::subscribe`](crate::SyncEngine::subscribe);
/// dropping the subscription unsubscribes.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// An operation was durably queued.
    OperationQueued {
        /// The operation.
        id: OperationId,
        /// Entity it targets, if any.
        entity: Option<EntityKey>,
    },
    /// An operation changed status.
    StatusChanged {
        /// The operation.
        id: OperationId,
        /// Previous status.
        from: OperationStatus,
        /// New status.
        to: OperationStatus,
    },
    /// The server reported a conflict.
    ConflictDetected {
        /// The local operation.
        id: OperationId,
        /// Server payload, when it could be parsed.
        payload: Option<Box<ConflictPayload>>,
    },
    /// Terminal or abandoned records were removed.
    OperationsPurged {
        /// Removed operations.
        ids: Vec<OperationId>,
    },
    /// A drain started.
    SyncStarted {
        /// What triggered it.
        reason: TriggerReason,
    },
    /// A drain ended.
    SyncFinished {
        /// What triggered it.
        reason: TriggerReason,
        /// Counts over every pass, absent on error.
        summary: Option<ProcessSummary>,
        /// Error that ended the drain early.
        error: Option<String>,
    },
    /// The link became usable.
    BecameOnline {
        /// Confirmation time.
        at: Timestamp,
    },
    /// The link was lost.
    BecameOffline {
        /// Confirmation time.
        at: Timestamp,
    },
    /// A trigger arrived mid-drain and was folded into a rerun.
    RerunCoalesced {
        /// The folded trigger.
        reason: TriggerReason,
    },
}
