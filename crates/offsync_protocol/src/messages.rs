//! Request and response bodies for the `/sync/*` endpoints.

use crate::conflict::ConflictPayload;
use crate::operation::{Operation, OperationDraft, OperationId, OperationPatch, Timestamp};
use crate::status::OperationStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Counts returned by a drain or a server processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    /// Operations that reached `completed`.
    pub succeeded: usize,
    /// Operations that reached `failed`.
    pub failed: usize,
    /// Operations that reached `conflict`.
    pub conflicted: usize,
    /// Transient failures left in `error` for a later attempt.
    #[serde(default)]
    pub retrying: usize,
    /// `error` operations whose backoff had not elapsed.
    #[serde(default)]
    pub deferred: usize,
    /// Replays the server answered with an already superseded record.
    #[serde(default)]
    pub superseded: usize,
}

impl ProcessSummary {
    /// Total operations attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed + self.conflicted + self.retrying + self.superseded
    }

    /// Adds another summary into this one.
    pub fn merge(&mut self, other: &ProcessSummary) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.conflicted += other.conflicted;
        self.retrying += other.retrying;
        self.deferred += other.deferred;
        self.superseded += other.superseded;
    }
}

/// Body of `PATCH /sync/operations/{id}`.
///
/// The status travels as a string so that an unknown value is a 400, not a
/// parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    /// Requested status.
    pub status: String,
    /// Fields to update alongside.
    #[serde(flatten)]
    pub patch: OperationPatch,
}

/// Body of `POST /sync/batch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    /// Operations in submission order.
    pub operations: Vec<OperationDraft>,
}

/// Per-operation outcome inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    /// Submitted operation.
    pub operation_id: OperationId,
    /// Status the equivalent single submission would have returned.
    pub http_status: u16,
    /// Stored record.
    pub operation: Operation,
    /// Present when `httpStatus` is 409.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictPayload>,
}

/// Body returned by `POST /sync/batch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    /// Outcomes in submission order.
    pub results: Vec<SubmitOutcome>,
}

/// Body returned by `DELETE /sync/completed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeResponse {
    /// Records removed.
    pub purged: usize,
}

/// Body returned by `GET /sync/status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Server clock.
    pub server_time: Timestamp,
    /// Record counts by status.
    pub operations: BTreeMap<OperationStatus, usize>,
    /// Entities with live state.
    pub entities: usize,
    /// Conflicts awaiting resolution.
    pub open_conflicts: usize,
}

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Short machine-readable kind.
    pub error: String,
    /// Human-readable detail.
    pub message: String,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_update_flattens_patch() {
        let update: StatusUpdate = serde_json::from_value(json!({
            "status": "failed",
            "errorMessage": "gave up",
            "retries": 5,
        }))
        .unwrap();
        assert_eq!(update.status, "failed");
        assert_eq!(update.patch.error_message.as_deref(), Some("gave up"));
        assert_eq!(update.patch.retries, Some(5));
    }

    #[test]
    fn summary_merge_adds_counts() {
        let mut total = ProcessSummary {
            succeeded: 1,
            retrying: 1,
            ..ProcessSummary::default()
        };
        total.merge(&ProcessSummary {
            succeeded: 2,
            conflicted: 1,
            deferred: 4,
            ..ProcessSummary::default()
        });
        assert_eq!(total.succeeded, 3);
        assert_eq!(total.attempted(), 5);
        assert_eq!(total.deferred, 4);
    }

    #[test]
    fn status_report_keys_are_wire_names() {
        let mut report = StatusReport::default();
        report.operations.insert(OperationStatus::Pending, 2);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["operations"]["pending"], 2);
    }
}
