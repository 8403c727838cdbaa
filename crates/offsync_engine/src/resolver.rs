//! Client side of conflict resolution.
//!
//! The server decides the outcome; the client forwards the request and then
//! mirrors the result onto its own queue records.

use crate::error::{ResolutionError, SyncError, SyncResult};
use crate::transport::SyncTransport;
use offsync_core::OperationQueue;
use offsync_protocol::{
    ErrorBody, OperationId, OperationPatch, OperationStatus, ResolutionStrategy, ResolveRequest,
    ResolvedOperation,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Sends resolutions and applies them locally.
pub struct ConflictResolver<T: SyncTransport> {
    queue: Arc<OperationQueue>,
    transport: Arc<T>,
}

impl<T: SyncTransport> ConflictResolver<T> {
    /// Creates a resolver.
    pub fn new(queue: Arc<OperationQueue>, transport: Arc<T>) -> Self {
        Self { queue, transport }
    }

    /// Resolves the conflict `id` takes part in.
    ///
    /// `id` may belong to another client; local records are updated only
    /// for operations this queue knows about.
    ///
    /// # Errors
    ///
    /// - [`ResolutionError::NotFound`] if a local `id` was never in conflict
    ///   or the server does not know it
    /// - [`ResolutionError::AlreadyResolved`] if the server settled it with
    ///   another strategy
    /// - [`SyncError::Auth`], [`SyncError::ClientRequest`] or a transient
    ///   error from the request itself
    pub fn resolve(
        &self,
        id: OperationId,
        strategy: &ResolutionStrategy,
    ) -> SyncResult<ResolvedOperation> {
        if let Some(local) = self.queue.get(&id) {
            let was_in_conflict =
                local.status == OperationStatus::Conflict || !local.conflicts_with.is_empty();
            if !was_in_conflict {
                return Err(ResolutionError::NotFound(id).into());
            }
        }

        let response = self.transport.resolve(&ResolveRequest::new(id, strategy))?;
        let message = || {
            response
                .parse_json::<ErrorBody>()
                .map(|body| body.message)
                .unwrap_or_else(|_| format!("server returned {}", response.status))
        };
        let resolved: ResolvedOperation = match response.status {
            200..=299 => response.parse_json()?,
            404 => return Err(ResolutionError::NotFound(id).into()),
            409 => return Err(ResolutionError::AlreadyResolved(id).into()),
            401 => return Err(SyncError::Auth(message())),
            408 | 429 | 500..=599 => return Err(SyncError::transient(message())),
            status => {
                return Err(SyncError::ClientRequest {
                    status,
                    message: message(),
                })
            }
        };

        let updated = self.apply_locally(&resolved)?;
        info!(
            %id,
            winner = %resolved.winner,
            strategy = ?resolved.strategy,
            local_updates = updated,
            "conflict resolved"
        );
        Ok(resolved)
    }

    /// Mirrors a resolution onto the local queue, returning how many records
    /// changed. Records already settled locally are left alone.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::StorageUnavailable`] if an update cannot be
    /// persisted.
    pub fn apply_locally(&self, resolved: &ResolvedOperation) -> SyncResult<usize> {
        let now = self.queue.clock().now_ms();
        let mut updated = 0;

        for loser in &resolved.superseded {
            let Some(op) = self.queue.get(loser) else {
                continue;
            };
            if !op.status.can_transition_to(OperationStatus::Superseded)
                || op.status == OperationStatus::Superseded
            {
                continue;
            }
            self.queue.update_status(
                loser,
                OperationStatus::Superseded,
                OperationPatch::new()
                    .superseded_by(resolved.winner)
                    .completed_at(now),
            )?;
            debug!(id = %loser, winner = %resolved.winner, "operation superseded");
            updated += 1;
        }

        if let Some(op) = self.queue.get(&resolved.winner) {
            if op.status == OperationStatus::Conflict {
                self.queue.update_status(
                    &resolved.winner,
                    OperationStatus::Completed,
                    OperationPatch::new()
                        .completed_at(now)
                        .response(200, resolved.state.clone())
                        .clear_error(),
                )?;
                debug!(id = %resolved.winner, "conflict winner completed");
                updated += 1;
            }
        }

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use offsync_core::{ManualClock, QueueConfig};
    use offsync_protocol::{
        ClientId, EntityKey, HttpMethod, HttpResponse, Operation, StrategyName,
    };
    use serde_json::json;

    fn setup() -> (Arc<OperationQueue>, Arc<MockTransport>, ConflictResolver<MockTransport>) {
        let clock = Arc::new(ManualClock::new(5_000));
        let queue = Arc::new(OperationQueue::in_memory(QueueConfig::default(), clock).unwrap());
        let transport = Arc::new(MockTransport::new());
        let resolver = ConflictResolver::new(queue.clone(), transport.clone());
        (queue, transport, resolver)
    }

    fn conflicted(queue: &OperationQueue) -> OperationId {
        let op = Operation::new(
            ClientId::new(),
            HttpMethod::Patch,
            "/entities/42",
            Some(json!({"name": "mine"})),
            1_000,
        );
        let id = queue.enqueue(op).unwrap();
        queue.claim(&id).unwrap();
        queue
            .update_status(&id, OperationStatus::Conflict, OperationPatch::new().response(409, None))
            .unwrap();
        id
    }

    fn resolution(winner: OperationId, losers: Vec<OperationId>) -> ResolvedOperation {
        ResolvedOperation {
            entity: EntityKey::new("entities", "42"),
            strategy: StrategyName::LastWriteWins,
            winner,
            superseded: losers,
            state: Some(json!({"name": "theirs"})),
            resolved_at: 5_000,
        }
    }

    #[test]
    fn losing_operation_is_superseded() {
        let (queue, transport, resolver) = setup();
        let mine = conflicted(&queue);
        let theirs = OperationId::new();
        transport.push_resolve_reply(
            HttpResponse::json(200, &resolution(theirs, vec![mine])).unwrap(),
        );

        let resolved = resolver.resolve(mine, &ResolutionStrategy::LastWriteWins).unwrap();
        assert_eq!(resolved.winner, theirs);

        let op = queue.get(&mine).unwrap();
        assert_eq!(op.status, OperationStatus::Superseded);
        assert_eq!(op.superseded_by, Some(theirs));
        assert_eq!(transport.resolved()[0].strategy, StrategyName::LastWriteWins);
    }

    #[test]
    fn winning_operation_completes() {
        let (queue, transport, resolver) = setup();
        let mine = conflicted(&queue);
        transport.push_resolve_reply(
            HttpResponse::json(200, &resolution(mine, vec![OperationId::new()])).unwrap(),
        );

        resolver.resolve(mine, &ResolutionStrategy::LastWriteWins).unwrap();
        let op = queue.get(&mine).unwrap();
        assert_eq!(op.status, OperationStatus::Completed);
        assert_eq!(op.response_data, Some(json!({"name": "theirs"})));
    }

    #[test]
    fn local_operation_never_in_conflict_is_not_found() {
        let (queue, transport, resolver) = setup();
        let op = Operation::new(ClientId::new(), HttpMethod::Post, "/items", None, 1);
        let id = queue.enqueue(op).unwrap();

        let err = resolver.resolve(id, &ResolutionStrategy::LastWriteWins).unwrap_err();
        assert!(matches!(err, SyncError::Resolution(ResolutionError::NotFound(_))));
        assert!(transport.resolved().is_empty());
    }

    #[test]
    fn server_refusals_map_to_resolution_errors() {
        let (queue, transport, resolver) = setup();
        let mine = conflicted(&queue);

        transport.push_resolve_reply(HttpResponse::empty(409));
        let err = resolver
            .resolve(mine, &ResolutionStrategy::Manual { merged_data: json!({}) })
            .unwrap_err();
        assert!(matches!(err, SyncError::Resolution(ResolutionError::AlreadyResolved(_))));

        transport.push_resolve_reply(HttpResponse::empty(404));
        let err = resolver
            .resolve(OperationId::new(), &ResolutionStrategy::LastWriteWins)
            .unwrap_err();
        assert!(matches!(err, SyncError::Resolution(ResolutionError::NotFound(_))));

        assert_eq!(queue.get(&mine).unwrap().status, OperationStatus::Conflict);
    }

    #[test]
    fn applying_twice_changes_nothing_the_second_time() {
        let (queue, _, resolver) = setup();
        let mine = conflicted(&queue);
        let resolved = resolution(OperationId::new(), vec![mine]);
        assert_eq!(resolver.apply_locally(&resolved).unwrap(), 1);
        assert_eq!(resolver.apply_locally(&resolved).unwrap(), 0);
    }
}
