//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::conflict::ConflictDetector;
use crate::error::{ServerError, ServerResult};
use crate::resolver::ConflictResolver;
use crate::store::{OperationStore, StoreState};
use offsync_core::Clock;
use offsync_protocol::{
    BatchRequest, BatchResponse, ClientId, ConflictPayload, Operation, OperationDraft,
    OperationId, OperationPatch, OperationStatus, ProcessSummary, PurgeResponse, ResolveRequest,
    ResolvedOperation, StatusReport, StatusUpdate, SubmitOutcome, Timestamp,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Client id recorded for unauthenticated submissions that name none.
const ANONYMOUS_CLIENT: ClientId = ClientId::from_bytes([0; 16]);

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Operation store (shared across all handlers).
    pub store: Arc<OperationStore>,
    /// Server clock.
    pub clock: Arc<dyn Clock>,
    detector: ConflictDetector,
    resolver: ConflictResolver,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<OperationStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
            detector: ConflictDetector::new(),
            resolver: ConflictResolver::new(),
        }
    }

    fn now(&self) -> Timestamp {
        self.clock.now_ms()
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("config", &self.config)
            .field("operations", &self.store.len())
            .finish_non_exhaustive()
    }
}

/// Result of submitting one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Applied to entity state.
    Accepted(Operation),
    /// The id was seen before; the stored record is returned unchanged.
    Replayed(Operation),
    /// Collided with other clients' edits and was not applied.
    Conflict {
        /// Stored record, now in `conflict`.
        operation: Operation,
        /// The 409 body.
        payload: ConflictPayload,
    },
}

impl Submission {
    /// HTTP status of the equivalent single submission.
    pub fn http_status(&self) -> u16 {
        match self {
            Submission::Accepted(_) => 201,
            Submission::Replayed(_) => 200,
            Submission::Conflict { .. } => 409,
        }
    }

    /// The stored record.
    pub fn operation(&self) -> &Operation {
        match self {
            Submission::Accepted(op) | Submission::Replayed(op) => op,
            Submission::Conflict { operation, .. } => operation,
        }
    }

    /// Converts to a batch entry.
    pub fn into_outcome(self) -> SubmitOutcome {
        let http_status = self.http_status();
        let (operation, conflict) = match self {
            Submission::Accepted(op) | Submission::Replayed(op) => (op, None),
            Submission::Conflict { operation, payload } => (operation, Some(payload)),
        };
        SubmitOutcome {
            operation_id: operation.id,
            http_status,
            operation,
            conflict,
        }
    }
}

/// Handler for sync requests.
#[derive(Debug)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles `POST /sync/operations`.
    ///
    /// `client` is the authenticated client, if any.
    pub fn handle_submit(
        &self,
        draft: OperationDraft,
        client: Option<ClientId>,
    ) -> ServerResult<Submission> {
        let now = self.context.now();
        let op = Self::validate(draft, client, now)?;
        Ok(self
            .context
            .store
            .with_state(|state| self.submit_locked(state, op, now)))
    }

    /// Handles `POST /sync/batch`.
    ///
    /// Every draft is validated before anything is stored; one bad draft
    /// rejects the whole batch.
    pub fn handle_batch(
        &self,
        request: BatchRequest,
        client: Option<ClientId>,
    ) -> ServerResult<BatchResponse> {
        let max = self.context.config.max_batch;
        if request.operations.len() > max {
            return Err(ServerError::InvalidRequest(format!(
                "too many operations: {} > {max}",
                request.operations.len()
            )));
        }

        let now = self.context.now();
        let ops = request
            .operations
            .into_iter()
            .enumerate()
            .map(|(i, draft)| {
                Self::validate(draft, client, now).map_err(|e| match e {
                    ServerError::InvalidRequest(msg) => {
                        ServerError::InvalidRequest(format!("operation {i}: {msg}"))
                    }
                    other => other,
                })
            })
            .collect::<ServerResult<Vec<_>>>()?;

        let results = self.context.store.with_state(|state| {
            ops.into_iter()
                .map(|op| self.submit_locked(state, op, now).into_outcome())
                .collect::<Vec<_>>()
        });
        debug!(count = results.len(), "batch accepted");
        Ok(BatchResponse { results })
    }

    /// Handles `GET /sync/operations`.
    pub fn handle_list(&self, status: Option<&str>) -> ServerResult<Vec<Operation>> {
        let status = status
            .map(str::parse::<OperationStatus>)
            .transpose()?;
        Ok(self.context.store.list(status))
    }

    /// Handles `GET /sync/operations/{id}`.
    pub fn handle_get(&self, id: &str) -> ServerResult<Operation> {
        let id = Self::parse_id(id)?;
        self.context
            .store
            .get(&id)
            .ok_or_else(|| ServerError::NotFound(format!("operation {id}")))
    }

    /// Handles `PATCH /sync/operations/{id}`.
    pub fn handle_update(&self, id: &str, update: StatusUpdate) -> ServerResult<Operation> {
        let id = Self::parse_id(id)?;
        let status: OperationStatus = update.status.parse()?;
        let updated = self.context.store.update_status(&id, status, &update.patch)?;
        debug!(%id, %status, "status updated");
        Ok(updated)
    }

    /// Handles `POST /sync/process`: applies server-side `pending` and
    /// `error` records in receipt order.
    pub fn handle_process(&self) -> ProcessSummary {
        let now = self.context.now();
        let summary = self.context.store.with_state(|state| {
            let ready: Vec<OperationId> = state
                .iter()
                .filter(|op| op.status.is_drainable())
                .map(|op| op.id)
                .collect();

            let mut summary = ProcessSummary::default();
            for id in ready {
                let Some(op) = state.get(&id).cloned() else {
                    continue;
                };
                match self.context.detector.detect(state, &op, now) {
                    Some(payload) => {
                        self.context.detector.record(state, &payload);
                        summary.conflicted += 1;
                    }
                    None => {
                        Self::apply(state, op, now, 200);
                        summary.succeeded += 1;
                    }
                }
            }
            summary
        });
        info!(
            succeeded = summary.succeeded,
            conflicted = summary.conflicted,
            "processing pass finished"
        );
        summary
    }

    /// Handles `DELETE /sync/completed`.
    pub fn handle_purge(&self) -> PurgeResponse {
        let purged = self.context.store.purge_completed();
        info!(purged, "terminal records purged");
        PurgeResponse { purged }
    }

    /// Handles `POST /sync/resolve`.
    pub fn handle_resolve(
        &self,
        request: ResolveRequest,
        client: Option<ClientId>,
    ) -> ServerResult<ResolvedOperation> {
        let strategy = request.strategy()?;
        let now = self.context.now();
        self.context.store.with_state(|state| {
            self.context.resolver.resolve(
                state,
                request.operation_id,
                &strategy,
                client.unwrap_or(ANONYMOUS_CLIENT),
                now,
            )
        })
    }

    /// Handles `GET /sync/status`.
    pub fn handle_status(&self) -> StatusReport {
        let store = &self.context.store;
        StatusReport {
            server_time: self.context.now(),
            operations: store.status_counts(),
            entities: store.entity_count(),
            open_conflicts: store.open_conflicts(),
        }
    }

    fn submit_locked(&self, state: &mut StoreState, mut op: Operation, now: Timestamp) -> Submission {
        if let Some(existing) = state.get(&op.id) {
            debug!(id = %op.id, status = %existing.status, "duplicate submission");
            if existing.status == OperationStatus::Conflict {
                if let Some(payload) = state.conflicts.get(&op.id) {
                    return Submission::Conflict {
                        operation: existing.clone(),
                        payload: payload.clone(),
                    };
                }
            }
            return Submission::Replayed(existing.clone());
        }
        if let Some(tombstone) = state.tombstone(&op.id) {
            debug!(id = %op.id, status = %tombstone.status, "replay of a purged operation");
            return Submission::Replayed(tombstone.restore(op));
        }

        if let Some(payload) = self.context.detector.detect(state, &op, now) {
            op.status = OperationStatus::Processing;
            state.put(op.clone());
            self.context.detector.record(state, &payload);
            let operation = state.get(&op.id).cloned().unwrap_or(op);
            return Submission::Conflict { operation, payload };
        }

        Submission::Accepted(Self::apply(state, op, now, 201))
    }

    /// Applies `op` to entity state and stores it as `completed`.
    fn apply(state: &mut StoreState, mut op: Operation, now: Timestamp, status: u16) -> Operation {
        let after = state.apply_effect(&op);
        op.status = OperationStatus::Completed;
        OperationPatch::new()
            .completed_at(now)
            .clear_error()
            .response(status, after)
            .apply_to(&mut op);
        debug!(id = %op.id, url = %op.url, "operation applied");
        state.put(op.clone());
        op
    }

    fn validate(
        draft: OperationDraft,
        client: Option<ClientId>,
        now: Timestamp,
    ) -> ServerResult<Operation> {
        let client = client
            .or(draft.client_id)
            .unwrap_or(ANONYMOUS_CLIENT);
        Ok(draft.validate(client, now)?)
    }

    fn parse_id(id: &str) -> ServerResult<OperationId> {
        id.parse()
            .map_err(|_| ServerError::NotFound(format!("operation {id}")))
    }
}
