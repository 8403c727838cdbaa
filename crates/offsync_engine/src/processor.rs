//! Queue drainer.
//!
//! Replays `pending` and `error` operations against the server and records
//! the outcome of each on its queue record:
//!
//! | Reply | New status |
//! |---|---|
//! | 2xx | `completed`, or `superseded` when a replay echoes a superseded record |
//! | 409 | `conflict`, never retried automatically |
//! | 408, 429, 5xx, timeout, dropped connection | `error`, or `failed` past the retry limit |
//! | other 4xx | `failed` |
//! | 401 | back to `pending`; the drain stops |
//!
//! Operations of one entity are submitted in creation order. Once one of
//! them is left waiting (backoff or a transient failure), the entity's later
//! operations are held back for the rest of the pass.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use offsync_core::{CoreError, OperationQueue};
use offsync_protocol::{
    ConflictPayload, EntityKey, ErrorBody, HttpResponse, Operation, OperationId, OperationPatch,
    OperationStatus, ProcessSummary,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest response excerpt kept in an error message.
const MAX_ERROR_EXCERPT: usize = 200;

/// Result of one processing pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    /// Outcome counts.
    pub summary: ProcessSummary,
    /// Operations that came back 409, with the server's payload when it
    /// could be parsed.
    pub conflicts: Vec<(OperationId, Option<ConflictPayload>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Done,
    Waiting,
}

enum Outcome {
    Completed(HttpResponse),
    Superseded {
        response: HttpResponse,
        winner: Option<OperationId>,
    },
    Conflict(HttpResponse),
    Retry { status: Option<u16>, message: String },
    Rejected { status: Option<u16>, message: String },
    Unauthorized(String),
}

/// Drains the queue through a [`SyncTransport`].
pub struct QueueProcessor<T: SyncTransport> {
    queue: Arc<OperationQueue>,
    transport: Arc<T>,
    retry: RetryConfig,
    batch_size: Option<usize>,
}

impl<T: SyncTransport> QueueProcessor<T> {
    /// Creates a processor.
    pub fn new(queue: Arc<OperationQueue>, transport: Arc<T>, retry: RetryConfig) -> Self {
        Self {
            queue,
            transport,
            retry,
            batch_size: None,
        }
    }

    /// Caps the submissions of one pass.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: Option<usize>) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Retry policy in use.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Runs one pass over a snapshot of the drainable operations.
    ///
    /// # Errors
    ///
    /// - [`SyncError::StorageUnavailable`] if a status update cannot be
    ///   persisted; the pass stops there
    /// - [`SyncError::Auth`] on a 401; the operation is back in `pending`
    ///   with its retry count unchanged
    pub fn process_pending(&self) -> SyncResult<DrainReport> {
        let started = self.queue.clock().now_ms();
        let snapshot = self.queue.drainable();
        let mut report = DrainReport::default();
        let mut held: HashSet<EntityKey> = HashSet::new();

        debug!(candidates = snapshot.len(), "processing pending operations");

        for op in snapshot {
            if let Some(limit) = self.batch_size {
                if report.summary.attempted() >= limit {
                    break;
                }
            }

            let key = op.entity_key();
            if key.as_ref().is_some_and(|k| held.contains(k)) {
                report.summary.deferred += 1;
                continue;
            }

            if let Some(at) = self.retry.next_attempt_at(&op) {
                if started < at {
                    debug!(id = %op.id, retry_at = at, "backoff not elapsed");
                    report.summary.deferred += 1;
                    held.extend(key);
                    continue;
                }
            }

            let Some(claimed) = self.queue.claim(&op.id)? else {
                // Settled elsewhere since the snapshot.
                continue;
            };

            if self.submit_claimed(claimed, &mut report)? == Settled::Waiting {
                held.extend(key);
            }
        }

        info!(
            succeeded = report.summary.succeeded,
            failed = report.summary.failed,
            conflicted = report.summary.conflicted,
            retrying = report.summary.retrying,
            deferred = report.summary.deferred,
            superseded = report.summary.superseded,
            "processing pass finished"
        );
        Ok(report)
    }

    /// Submits one drainable operation immediately, ignoring its backoff.
    ///
    /// Returns the report for that single submission.
    ///
    /// # Errors
    ///
    /// As [`process_pending`](Self::process_pending), plus
    /// [`SyncError::Queue`] for an unknown id and
    /// [`SyncError::InvalidStateTransition`] if it is not drainable.
    pub fn process_one(&self, id: &OperationId) -> SyncResult<DrainReport> {
        let op = self
            .queue
            .get(id)
            .ok_or(SyncError::Queue(CoreError::OperationNotFound(*id)))?;
        let not_drainable = || SyncError::InvalidStateTransition {
            from: op.status.to_string(),
            to: OperationStatus::Processing.to_string(),
        };
        if !op.status.is_drainable() {
            return Err(not_drainable());
        }
        let claimed = self.queue.claim(id)?.ok_or_else(not_drainable)?;
        let mut report = DrainReport::default();
        self.submit_claimed(claimed, &mut report)?;
        Ok(report)
    }

    fn submit_claimed(&self, claimed: Operation, report: &mut DrainReport) -> SyncResult<Settled> {
        let outcome = classify(self.transport.submit(&claimed));
        let now = self.queue.clock().now_ms();
        let id = claimed.id;

        match outcome {
            Outcome::Completed(response) => {
                self.queue.update_status(
                    &id,
                    OperationStatus::Completed,
                    OperationPatch::new()
                        .completed_at(now)
                        .response(response.status, response.json_value())
                        .clear_error(),
                )?;
                debug!(%id, status = response.status, "operation completed");
                report.summary.succeeded += 1;
                Ok(Settled::Done)
            }
            Outcome::Superseded { response, winner } => {
                let mut patch = OperationPatch::new()
                    .completed_at(now)
                    .response(response.status, response.json_value())
                    .clear_error();
                if let Some(winner) = winner {
                    patch = patch.superseded_by(winner);
                }
                self.queue.update_status(&id, OperationStatus::Superseded, patch)?;
                info!(%id, winner = ?winner, "server already superseded operation");
                report.summary.superseded += 1;
                Ok(Settled::Done)
            }
            Outcome::Conflict(response) => {
                let payload: Option<ConflictPayload> = response.parse_json().ok();
                let others = payload
                    .as_ref()
                    .map(ConflictPayload::operation_ids)
                    .unwrap_or_default();
                self.queue.update_status(
                    &id,
                    OperationStatus::Conflict,
                    OperationPatch::new()
                        .response(response.status, response.json_value())
                        .conflicts_with(others),
                )?;
                info!(%id, "server reported conflict");
                report.summary.conflicted += 1;
                report.conflicts.push((id, payload));
                Ok(Settled::Done)
            }
            Outcome::Retry { status, message } => {
                let retries = claimed.retries.saturating_add(1);
                let mut patch = OperationPatch::new()
                    .retries(retries)
                    .last_retry_at(now)
                    .error(message.clone());
                if let Some(status) = status {
                    patch = patch.response(status, None);
                }
                if retries > self.retry.max_retries {
                    warn!(%id, retries, error = %message, "giving up after repeated failures");
                    self.queue.update_status(&id, OperationStatus::Failed, patch)?;
                    report.summary.failed += 1;
                    Ok(Settled::Done)
                } else {
                    debug!(%id, retries, error = %message, "transient failure");
                    self.queue.update_status(&id, OperationStatus::Error, patch)?;
                    report.summary.retrying += 1;
                    Ok(Settled::Waiting)
                }
            }
            Outcome::Rejected { status, message } => {
                let mut patch = OperationPatch::new().error(message.clone());
                if let Some(status) = status {
                    patch = patch.response(status, None);
                }
                warn!(%id, error = %message, "operation rejected");
                self.queue.update_status(&id, OperationStatus::Failed, patch)?;
                report.summary.failed += 1;
                Ok(Settled::Done)
            }
            Outcome::Unauthorized(message) => {
                self.queue.update_status(
                    &id,
                    OperationStatus::Pending,
                    OperationPatch::new().response(401, None).error(message.clone()),
                )?;
                warn!(%id, "server refused credentials, stopping drain");
                Err(SyncError::Auth(message))
            }
        }
    }
}

fn classify(result: SyncResult<HttpResponse>) -> Outcome {
    match result {
        Ok(response) if response.is_success() => match superseded_by(&response) {
            Some(winner) => Outcome::Superseded { response, winner },
            None => Outcome::Completed(response),
        },
        Ok(response) => match response.status {
            409 => Outcome::Conflict(response),
            401 => Outcome::Unauthorized(error_message(&response)),
            408 | 429 | 500..=599 => Outcome::Retry {
                status: Some(response.status),
                message: error_message(&response),
            },
            status => Outcome::Rejected {
                status: Some(status),
                message: error_message(&response),
            },
        },
        Err(e) if e.is_retryable() => Outcome::Retry {
            status: None,
            message: e.to_string(),
        },
        Err(e) => Outcome::Rejected {
            status: None,
            message: e.to_string(),
        },
    }
}

/// Reads the record a replay echoes back. `Some` when the server holds it as
/// `superseded`, carrying the winner if named.
fn superseded_by(response: &HttpResponse) -> Option<Option<OperationId>> {
    let record = response.json_value()?;
    let status = record.get("status")?.as_str()?.parse::<OperationStatus>().ok()?;
    if status != OperationStatus::Superseded {
        return None;
    }
    Some(
        record
            .get("supersededBy")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok()),
    )
}

fn error_message(response: &HttpResponse) -> String {
    let detail = match response.parse_json::<ErrorBody>() {
        Ok(body) => body.message,
        Err(_) => {
            let text = String::from_utf8_lossy(&response.body);
            text.chars().take(MAX_ERROR_EXCERPT).collect()
        }
    };
    if detail.is_empty() {
        format!("server returned {}", response.status)
    } else {
        format!("server returned {}: {detail}", response.status)
    }
}
