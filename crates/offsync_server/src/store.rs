//! Server-side operation store and entity state.

use offsync_protocol::{
    ConflictPayload, EntityKey, HttpMethod, Operation, OperationId, OperationPatch,
    OperationStatus, ResolvedOperation, Timestamp,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::error::{ServerError, ServerResult};

/// Everything the server knows, guarded as one unit so that detection,
/// application and resolution see a consistent view.
#[derive(Debug, Default)]
pub struct StoreState {
    /// Operations by id.
    pub(crate) ops: HashMap<OperationId, Operation>,
    /// Receipt order.
    pub(crate) order: Vec<OperationId>,
    /// Current state per entity.
    pub(crate) entities: BTreeMap<EntityKey, Value>,
    /// 409 payloads for operations still in conflict.
    pub(crate) conflicts: HashMap<OperationId, ConflictPayload>,
    /// Recorded resolutions, keyed by every participant.
    pub(crate) resolutions: HashMap<OperationId, ResolvedOperation>,
    /// Outcomes of purged records, so a late replay is answered instead of
    /// applied a second time.
    pub(crate) purged: HashMap<OperationId, Tombstone>,
}

/// What is kept of a purged terminal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tombstone {
    /// Final status, `completed` or `superseded`.
    pub status: OperationStatus,
    /// Winner of a superseded record.
    pub superseded_by: Option<OperationId>,
    /// When the record settled.
    pub completed_at: Option<Timestamp>,
    /// Response status recorded for it.
    pub response_status: Option<u16>,
}

impl Tombstone {
    fn of(op: &Operation) -> Self {
        Self {
            status: op.status,
            superseded_by: op.superseded_by,
            completed_at: op.completed_at,
            response_status: op.response_status,
        }
    }

    /// Rebuilds a record for a replay of the purged operation.
    pub fn restore(&self, mut op: Operation) -> Operation {
        op.status = self.status;
        op.superseded_by = self.superseded_by;
        op.completed_at = self.completed_at;
        op.response_status = self.response_status;
        op.response_data = None;
        op
    }
}

impl StoreState {
    /// Looks up an operation.
    pub fn get(&self, id: &OperationId) -> Option<&Operation> {
        self.ops.get(id)
    }

    /// Outcome of a purged operation.
    pub fn tombstone(&self, id: &OperationId) -> Option<&Tombstone> {
        self.purged.get(id)
    }

    /// Inserts or replaces an operation, keeping receipt order.
    pub(crate) fn put(&mut self, op: Operation) {
        if !self.ops.contains_key(&op.id) {
            self.order.push(op.id);
        }
        self.ops.insert(op.id, op);
    }

    /// Operations in receipt order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.order.iter().filter_map(|id| self.ops.get(id))
    }

    /// Applies the effect of `op` to its entity and returns the new state.
    ///
    /// `POST` and `PUT` replace, `PATCH` shallow-merges object fields and
    /// `DELETE` removes. Operations without an entity id change nothing.
    pub(crate) fn apply_effect(&mut self, op: &Operation) -> Option<Value> {
        let Some(key) = op.entity_key() else {
            return op.body.clone();
        };
        match op.method {
            HttpMethod::Get => {}
            HttpMethod::Post | HttpMethod::Put => {
                if let Some(body) = &op.body {
                    self.entities.insert(key.clone(), body.clone());
                }
            }
            HttpMethod::Patch => match (self.entities.get_mut(&key), &op.body) {
                (Some(Value::Object(current)), Some(Value::Object(fields))) => {
                    for (name, value) in fields {
                        current.insert(name.clone(), value.clone());
                    }
                }
                (_, Some(body)) => {
                    self.entities.insert(key.clone(), body.clone());
                }
                (_, None) => {}
            },
            HttpMethod::Delete => {
                self.entities.remove(&key);
            }
        }
        self.entities.get(&key).cloned()
    }
}

/// Thread-safe store shared by the request handlers.
#[derive(Debug, Default)]
pub struct OperationStore {
    state: Mutex<StoreState>,
}

impl OperationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` with exclusive access to the state.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Looks up an operation.
    pub fn get(&self, id: &OperationId) -> Option<Operation> {
        self.state.lock().ops.get(id).cloned()
    }

    /// Operations in receipt order, optionally filtered by status.
    pub fn list(&self, status: Option<OperationStatus>) -> Vec<Operation> {
        self.state
            .lock()
            .iter()
            .filter(|op| status.is_none_or(|s| op.status == s))
            .cloned()
            .collect()
    }

    /// Number of stored operations.
    pub fn len(&self) -> usize {
        self.state.lock().ops.len()
    }

    /// Whether the store holds no operations.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current state of an entity.
    pub fn entity_state(&self, key: &EntityKey) -> Option<Value> {
        self.state.lock().entities.get(key).cloned()
    }

    /// Entities with live state.
    pub fn entity_count(&self) -> usize {
        self.state.lock().entities.len()
    }

    /// Record counts per status.
    pub fn status_counts(&self) -> BTreeMap<OperationStatus, usize> {
        let state = self.state.lock();
        let mut counts = BTreeMap::new();
        for op in state.ops.values() {
            *counts.entry(op.status).or_insert(0) += 1;
        }
        counts
    }

    /// Operations still in `conflict`.
    pub fn open_conflicts(&self) -> usize {
        self.state
            .lock()
            .ops
            .values()
            .filter(|op| op.status == OperationStatus::Conflict)
            .count()
    }

    /// Moves an operation through the status machine.
    ///
    /// # Errors
    ///
    /// - [`ServerError::NotFound`] for an unknown id
    /// - [`ServerError::InvalidTransition`] if the machine forbids it
    pub fn update_status(
        &self,
        id: &OperationId,
        status: OperationStatus,
        patch: &OperationPatch,
    ) -> ServerResult<Operation> {
        let mut state = self.state.lock();
        let op = state
            .ops
            .get_mut(id)
            .ok_or_else(|| ServerError::NotFound(format!("operation {id}")))?;
        op.transition(status, patch)?;
        Ok(op.clone())
    }

    /// Removes `completed` and `superseded` records and their bookkeeping.
    ///
    /// Each purged id leaves a [`Tombstone`] behind; ids stay known for the
    /// life of the store.
    pub fn purge_completed(&self) -> usize {
        let mut state = self.state.lock();
        let doomed: Vec<OperationId> = state
            .ops
            .values()
            .filter(|op| op.status.is_terminal())
            .map(|op| op.id)
            .collect();
        for id in &doomed {
            if let Some(op) = state.ops.remove(id) {
                state.purged.insert(*id, Tombstone::of(&op));
            }
            state.conflicts.remove(id);
            state.resolutions.remove(id);
        }
        let StoreState { ops, order, .. } = &mut *state;
        order.retain(|id| ops.contains_key(id));
        doomed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::ClientId;
    use serde_json::json;

    fn op(method: HttpMethod, url: &str, body: Value) -> Operation {
        Operation::new(ClientId::new(), method, url, Some(body), 1)
    }

    #[test]
    fn patch_merges_object_fields() {
        let mut state = StoreState::default();
        state.apply_effect(&op(HttpMethod::Put, "/entities/1", json!({"name": "a", "n": 1})));
        let after = state.apply_effect(&op(HttpMethod::Patch, "/entities/1", json!({"name": "b"})));
        assert_eq!(after, Some(json!({"name": "b", "n": 1})));
    }

    #[test]
    fn put_replaces_and_delete_removes() {
        let mut state = StoreState::default();
        state.apply_effect(&op(HttpMethod::Put, "/entities/1", json!({"name": "a", "n": 1})));
        let after = state.apply_effect(&op(HttpMethod::Put, "/entities/1", json!({"name": "b"})));
        assert_eq!(after, Some(json!({"name": "b"})));

        let delete = Operation::new(ClientId::new(), HttpMethod::Delete, "/entities/1", None, 2);
        assert_eq!(state.apply_effect(&delete), None);
        assert!(state.entities.is_empty());
    }

    #[test]
    fn collection_posts_leave_entities_alone() {
        let mut state = StoreState::default();
        state.apply_effect(&op(HttpMethod::Post, "/items", json!({"x": 1})));
        assert!(state.entities.is_empty());
    }

    #[test]
    fn purge_keeps_attention_records() {
        let store = OperationStore::new();
        let done = op(HttpMethod::Put, "/entities/1", json!({}));
        let failed = op(HttpMethod::Put, "/entities/2", json!({}));
        store.with_state(|state| {
            let mut d = done.clone();
            d.status = OperationStatus::Completed;
            state.put(d);
            let mut f = failed.clone();
            f.status = OperationStatus::Failed;
            state.put(f);
        });

        assert_eq!(store.purge_completed(), 1);
        assert!(store.get(&done.id).is_none());
        let tombstone = store.with_state(|state| state.tombstone(&done.id).copied());
        assert_eq!(tombstone.map(|t| t.status), Some(OperationStatus::Completed));
        assert!(store.with_state(|state| state.tombstone(&failed.id).is_none()));
        assert_eq!(store.list(None).len(), 1);
        assert_eq!(store.list(Some(OperationStatus::Failed))[0].id, failed.id);
    }

    #[test]
    fn update_status_follows_the_machine() {
        let store = OperationStore::new();
        let record = op(HttpMethod::Put, "/entities/1", json!({}));
        let id = record.id;
        store.with_state(|state| state.put(record));

        let updated = store
            .update_status(&id, OperationStatus::Failed, &OperationPatch::new().error("bad"))
            .unwrap();
        assert_eq!(updated.error_message.as_deref(), Some("bad"));
        assert!(matches!(
            store.update_status(&id, OperationStatus::Completed, &OperationPatch::new()),
            Err(ServerError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store.update_status(&OperationId::new(), OperationStatus::Failed, &OperationPatch::new()),
            Err(ServerError::NotFound(_))
        ));
    }
}
