//! Server-side conflict detection.
//!
//! Detection is scoped to one entity. Each operation has a timing window
//! from its creation on the client to its receipt by the server; for records
//! still unresolved the window is open until now. Two operations from
//! different clients whose windows overlap were made without either client
//! seeing the other's edit, so they conflict.

use crate::store::StoreState;
use offsync_protocol::{
    ConflictPayload, ConflictSide, Operation, OperationPatch, OperationStatus, Timestamp,
};
use tracing::info;

/// Finds and records conflicts between submissions and stored operations.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictDetector;

impl ConflictDetector {
    /// Creates a detector.
    pub fn new() -> Self {
        Self
    }

    /// Returns the 409 payload if `challenger` collides with stored
    /// operations on the same entity. Nothing is modified.
    pub fn detect(
        &self,
        state: &StoreState,
        challenger: &Operation,
        now: Timestamp,
    ) -> Option<ConflictPayload> {
        let entity = challenger.entity_key()?;
        let window = Self::window(challenger, now);

        let incumbents: Vec<ConflictSide> = state
            .iter()
            .filter(|other| other.id != challenger.id)
            .filter(|other| other.client_id != challenger.client_id)
            .filter(|other| {
                !matches!(
                    other.status,
                    OperationStatus::Superseded | OperationStatus::Failed
                )
            })
            .filter(|other| other.entity_key().as_ref() == Some(&entity))
            .filter(|other| Self::overlaps(window, Self::window(other, now)))
            .map(ConflictSide::from)
            .collect();

        if incumbents.is_empty() {
            return None;
        }
        Some(ConflictPayload {
            entity: entity.clone(),
            challenger: ConflictSide::from(challenger),
            incumbents,
            server_state: state.entities.get(&entity).cloned(),
        })
    }

    /// Marks every participant of `payload` and stores the payload.
    ///
    /// The challenger and unresolved incumbents become `conflict`; a
    /// `completed` incumbent keeps its status and only gains the cross-link.
    /// A participant that won an earlier resolution joins the new group, so
    /// its old resolution is dropped. The challenger must already be stored.
    pub fn record(&self, state: &mut StoreState, payload: &ConflictPayload) {
        let ids = payload.operation_ids();
        let challenger_id = payload.challenger.operation_id;

        for id in &ids {
            let others: Vec<_> = if *id == challenger_id {
                ids.iter().copied().filter(|o| o != id).collect()
            } else {
                vec![challenger_id]
            };
            state.resolutions.remove(id);
            let Some(op) = state.ops.get_mut(id) else {
                continue;
            };
            let mut patch = OperationPatch::new().conflicts_with(others);
            if op.status.can_transition_to(OperationStatus::Conflict) {
                op.status = OperationStatus::Conflict;
                patch = patch.response(409, None);
            }
            patch.apply_to(op);
            if op.status == OperationStatus::Conflict {
                state.conflicts.insert(*id, payload.clone());
            }
        }

        info!(
            entity = %payload.entity,
            challenger = %challenger_id,
            incumbents = payload.incumbents.len(),
            "conflict detected"
        );
    }

    fn window(op: &Operation, now: Timestamp) -> (Timestamp, Timestamp) {
        let end = match op.status {
            OperationStatus::Completed => op.received_at.unwrap_or(now),
            _ => now,
        };
        (op.created_at, end.max(op.created_at))
    }

    fn overlaps(a: (Timestamp, Timestamp), b: (Timestamp, Timestamp)) -> bool {
        a.0 <= b.1 && b.0 <= a.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::{ClientId, HttpMethod};
    use serde_json::json;

    fn completed(client: ClientId, created: Timestamp, received: Timestamp) -> Operation {
        let mut op = Operation::new(
            client,
            HttpMethod::Patch,
            "/entities/42",
            Some(json!({"name": "first"})),
            created,
        );
        op.received_at = Some(received);
        op.status = OperationStatus::Completed;
        op
    }

    fn incoming(client: ClientId, url: &str, created: Timestamp) -> Operation {
        let mut op = Operation::new(client, HttpMethod::Patch, url, Some(json!({"name": "x"})), created);
        op.received_at = Some(500);
        op
    }

    #[test]
    fn offline_edit_overlapping_applied_edit_conflicts() {
        let mut state = StoreState::default();
        state.put(completed(ClientId::new(), 100, 300));

        let challenger = incoming(ClientId::new(), "/entities/42", 200);
        let payload = ConflictDetector::new().detect(&state, &challenger, 500).unwrap();
        assert_eq!(payload.incumbents.len(), 1);
        assert_eq!(payload.challenger.operation_id, challenger.id);
    }

    #[test]
    fn edit_made_after_receipt_does_not_conflict() {
        let mut state = StoreState::default();
        state.put(completed(ClientId::new(), 100, 300));

        let challenger = incoming(ClientId::new(), "/entities/42", 400);
        assert!(ConflictDetector::new().detect(&state, &challenger, 500).is_none());
    }

    #[test]
    fn other_entities_and_same_client_never_conflict() {
        let mut state = StoreState::default();
        let client = ClientId::new();
        state.put(completed(client, 100, 300));

        let detector = ConflictDetector::new();
        assert!(detector
            .detect(&state, &incoming(ClientId::new(), "/entities/43", 200), 500)
            .is_none());
        assert!(detector
            .detect(&state, &incoming(client, "/entities/42", 200), 500)
            .is_none());
        assert!(detector
            .detect(&state, &incoming(ClientId::new(), "/entities", 200), 500)
            .is_none());
    }

    #[test]
    fn record_cross_links_and_keeps_completed_incumbent() {
        let mut state = StoreState::default();
        let first = completed(ClientId::new(), 100, 300);
        state.put(first.clone());
        let challenger = incoming(ClientId::new(), "/entities/42", 200);
        state.put(challenger.clone());

        let detector = ConflictDetector::new();
        let payload = detector.detect(&state, &challenger, 500).unwrap();
        detector.record(&mut state, &payload);

        let stored = state.get(&challenger.id).unwrap();
        assert_eq!(stored.status, OperationStatus::Conflict);
        assert_eq!(stored.conflicts_with, vec![first.id]);

        let incumbent = state.get(&first.id).unwrap();
        assert_eq!(incumbent.status, OperationStatus::Completed);
        assert_eq!(incumbent.conflicts_with, vec![challenger.id]);
        assert!(state.conflicts.contains_key(&challenger.id));
        assert!(!state.conflicts.contains_key(&first.id));
    }
}
