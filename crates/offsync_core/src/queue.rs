//! Durable local operation queue.
//!
//! Every mutation is journaled as a full operation snapshot before the
//! in-memory view changes, so a record visible through the API is always
//! on disk. Read-modify-write for one operation happens under a single
//! lock, which keeps interleaved triggers from losing updates.

use crate::clock::{duration_ms, Clock};
use crate::config::QueueConfig;
use crate::error::{CoreError, CoreResult};
use crate::events::{EventBus, Subscription};
use crate::log::RecordLog;
use offsync_codec::{from_cbor, to_cbor};
use offsync_protocol::{Operation, OperationId, OperationPatch, OperationStatus};
use offsync_storage::{DirLock, FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// File name of the journal inside a queue directory.
pub const JOURNAL_FILE: &str = "queue.log";

/// Journal record kind holding a full operation snapshot.
pub const KIND_PUT: u8 = 1;
/// Journal record kind holding the id of a removed operation.
pub const KIND_REMOVE: u8 = 2;

/// Notifications published by the queue after each committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// A new operation was stored.
    Enqueued {
        /// The operation.
        id: OperationId,
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
    /// Records were removed.
    Purged {
        /// Removed operations.
        ids: Vec<OperationId>,
    },
}

/// Queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Operations per status.
    pub by_status: BTreeMap<OperationStatus, usize>,
    /// Live operations.
    pub total: usize,
    /// Records in the journal, live and dead.
    pub journal_records: u64,
    /// Journal size in bytes.
    pub journal_bytes: u64,
}

impl QueueStats {
    /// Operations with `status`.
    #[must_use]
    pub fn count(&self, status: OperationStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Outcome of a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    /// Journal records before.
    pub records_before: u64,
    /// Journal records after.
    pub records_after: u64,
}

struct Entry {
    seq: u64,
    op: Operation,
}

struct QueueState {
    log: RecordLog,
    entries: HashMap<OperationId, Entry>,
    next_seq: u64,
}

impl QueueState {
    fn persist(&mut self, op: &Operation) -> CoreResult<()> {
        let payload = op.encode()?;
        self.log.append(KIND_PUT, &payload)?;
        Ok(())
    }

    fn persist_removal(&mut self, id: &OperationId) -> CoreResult<()> {
        let payload = to_cbor(id)?;
        self.log.append(KIND_REMOVE, &payload)?;
        Ok(())
    }

    fn insert(&mut self, op: Operation) {
        match self.entries.get_mut(&op.id) {
            Some(entry) => entry.op = op,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries.insert(op.id, Entry { seq, op });
            }
        }
    }

    fn sorted<'a>(&'a self, filter: impl Fn(&Operation) -> bool) -> Vec<Operation> {
        let mut matching: Vec<&'a Entry> = self.entries.values().filter(|e| filter(&e.op)).collect();
        matching.sort_by_key(|e| (e.op.created_at, e.seq));
        matching.into_iter().map(|e| e.op.clone()).collect()
    }
}

/// The durable queue of pending and settled operations.
///
/// This is the only component that mutates operation records; foreground
/// and background drains share one instance.
///
/// # Example
///
/// ```rust
/// use offsync_core::{OperationQueue, QueueConfig, SystemClock};
/// use offsync_protocol::{ClientId, HttpMethod, Operation, OperationStatus};
/// use std::sync::Arc;
///
/// let queue = OperationQueue::in_memory(QueueConfig::default(), Arc::new(SystemClock)).unwrap();
/// let op = Operation::new(ClientId::new(), HttpMethod::Post, "/notes", None, 1);
/// let id = queue.enqueue(op).unwrap();
/// assert_eq!(queue.get(&id).unwrap().status, OperationStatus::Pending);
/// ```
pub struct OperationQueue {
    state: Mutex<QueueState>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    events: EventBus<QueueEvent>,
    dir_lock: Option<DirLock>,
}

impl OperationQueue {
    /// Opens the queue stored in `dir`, taking an exclusive lock on it.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Locked`] if another process holds the directory
    /// - [`CoreError::Corrupted`] if the journal fails validation
    /// - [`CoreError::StorageUnavailable`] on I/O failure
    pub fn open(dir: &Path, config: QueueConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        let lock = DirLock::acquire(dir)?;
        let backend = FileBackend::open(&dir.join(JOURNAL_FILE))?;
        let mut queue = Self::with_backend(Box::new(backend), config, clock)?;
        queue.dir_lock = Some(lock);
        Ok(queue)
    }

    /// Opens a queue over an arbitrary journal backend.
    ///
    /// Operations left `processing` by a crash are returned to `pending`;
    /// the server deduplicates the replay by operation id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Corrupted`] if the journal fails validation, or a
    /// storage error.
    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        config: QueueConfig,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        let (log, frames) = RecordLog::open(backend, config.sync_on_write)?;
        let mut state = QueueState {
            log,
            entries: HashMap::new(),
            next_seq: 0,
        };

        for frame in frames {
            match frame.kind {
                KIND_PUT => {
                    let op = Operation::decode(&frame.payload)
                        .map_err(|e| CoreError::corrupted(format!("bad operation record: {e}")))?;
                    state.insert(op);
                }
                KIND_REMOVE => {
                    let id: OperationId = from_cbor(&frame.payload)?;
                    state.entries.remove(&id);
                }
                other => {
                    return Err(CoreError::corrupted(format!("unknown record kind {other}")));
                }
            }
        }

        let interrupted: Vec<OperationId> = state
            .entries
            .values()
            .filter(|e| e.op.status == OperationStatus::Processing)
            .map(|e| e.op.id)
            .collect();
        for id in &interrupted {
            if let Some(entry) = state.entries.get(id) {
                let mut op = entry.op.clone();
                op.transition(OperationStatus::Pending, &OperationPatch::new())?;
                state.persist(&op)?;
                state.insert(op);
            }
        }
        if !interrupted.is_empty() {
            info!(count = interrupted.len(), "requeued operations interrupted mid-drain");
        }

        debug!(operations = state.entries.len(), "queue opened");
        Ok(Self {
            state: Mutex::new(state),
            config,
            clock,
            events: EventBus::new(),
            dir_lock: None,
        })
    }

    /// Opens an empty queue backed by memory.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches the other constructors.
    pub fn in_memory(config: QueueConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        Self::with_backend(Box::new(InMemoryBackend::new()), config, clock)
    }

    /// Durably stores `op` as `pending` with zero retries.
    ///
    /// Never consults connectivity. If the journal write fails the operation
    /// is not queued and the error is returned.
    ///
    /// # Errors
    ///
    /// - [`CoreError::StorageUnavailable`] if the journal rejects the write
    /// - [`CoreError::DuplicateOperation`] if the id is already queued
    pub fn enqueue(&self, mut op: Operation) -> CoreResult<OperationId> {
        op.status = OperationStatus::Pending;
        op.retries = 0;
        let id = op.id;

        {
            let mut state = self.state.lock();
            if state.entries.contains_key(&id) {
                return Err(CoreError::DuplicateOperation(id));
            }
            state.persist(&op)?;
            state.insert(op);
        }

        debug!(%id, "operation enqueued");
        self.events.publish(QueueEvent::Enqueued { id });
        Ok(id)
    }

    /// Looks up an operation.
    #[must_use]
    pub fn get(&self, id: &OperationId) -> Option<Operation> {
        self.state.lock().entries.get(id).map(|e| e.op.clone())
    }

    /// Operations with `status`, oldest first.
    #[must_use]
    pub fn list_by_status(&self, status: OperationStatus) -> Vec<Operation> {
        self.state.lock().sorted(|op| op.status == status)
    }

    /// Every operation, oldest first.
    #[must_use]
    pub fn list_all(&self) -> Vec<Operation> {
        self.state.lock().sorted(|_| true)
    }

    /// `pending` and `error` operations, ordered by `createdAt` then
    /// enqueue order. This gives FIFO per entity.
    #[must_use]
    pub fn drainable(&self) -> Vec<Operation> {
        self.state.lock().sorted(|op| op.status.is_drainable())
    }

    /// Atomically moves `id` to `status` and applies `patch`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::OperationNotFound`] for an unknown id
    /// - [`CoreError::InvalidTransition`] if the status machine forbids it
    /// - [`CoreError::StorageUnavailable`] if the journal rejects the write;
    ///   the record keeps its previous state
    pub fn update_status(
        &self,
        id: &OperationId,
        status: OperationStatus,
        patch: OperationPatch,
    ) -> CoreResult<Operation> {
        let (updated, from) = {
            let mut state = self.state.lock();
            let current = state
                .entries
                .get(id)
                .map(|e| e.op.clone())
                .ok_or(CoreError::OperationNotFound(*id))?;
            let from = current.status;

            let mut next = current;
            next.transition(status, &patch)
                .map_err(|_| CoreError::InvalidTransition {
                    id: *id,
                    from,
                    to: status,
                })?;
            state.persist(&next)?;
            state.insert(next.clone());
            (next, from)
        };

        if from != status {
            debug!(%id, %from, to = %status, "operation status changed");
            self.events.publish(QueueEvent::StatusChanged {
                id: *id,
                from,
                to: status,
            });
        }
        Ok(updated)
    }

    /// Moves `id` to `processing` if it is still drainable.
    ///
    /// Returns `None` when another drain got there first or the operation
    /// settled meanwhile.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the journal rejects the write.
    pub fn claim(&self, id: &OperationId) -> CoreResult<Option<Operation>> {
        let claimed = {
            let mut state = self.state.lock();
            let Some(current) = state.entries.get(id).map(|e| e.op.clone()) else {
                return Ok(None);
            };
            if !current.status.is_drainable() {
                return Ok(None);
            }
            let from = current.status;
            let mut next = current;
            next.transition(OperationStatus::Processing, &OperationPatch::new())?;
            state.persist(&next)?;
            state.insert(next.clone());
            (next, from)
        };

        self.events.publish(QueueEvent::StatusChanged {
            id: *id,
            from: claimed.1,
            to: OperationStatus::Processing,
        });
        Ok(Some(claimed.0))
    }

    /// Removes `completed` and `superseded` records settled longer ago than
    /// the retention window. `failed` and `conflict` records are kept.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the journal rejects the removal.
    pub fn purge_completed(&self) -> CoreResult<usize> {
        let cutoff = self
            .clock
            .now_ms()
            .saturating_sub(duration_ms(self.config.retention));
        self.purge_where(|op| {
            op.status.is_terminal()
                && op.completed_at.or(op.last_retry_at).unwrap_or(op.created_at) <= cutoff
        })
    }

    /// Removes every `failed` record.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the journal rejects the removal.
    pub fn purge_failed(&self) -> CoreResult<usize> {
        self.purge_where(|op| op.status == OperationStatus::Failed)
    }

    /// Removes one settled or stuck operation.
    ///
    /// # Errors
    ///
    /// - [`CoreError::OperationNotFound`] for an unknown id
    /// - [`CoreError::NotPurgeable`] if it is still pending or in flight
    pub fn purge(&self, id: &OperationId) -> CoreResult<()> {
        let status = self
            .get(id)
            .map(|op| op.status)
            .ok_or(CoreError::OperationNotFound(*id))?;
        if !(status.is_terminal() || status.needs_attention()) {
            return Err(CoreError::NotPurgeable { id: *id, status });
        }
        self.purge_where(|op| op.id == *id)?;
        Ok(())
    }

    fn purge_where(&self, predicate: impl Fn(&Operation) -> bool) -> CoreResult<usize> {
        let removed = {
            let mut state = self.state.lock();
            let ids: Vec<OperationId> = state
                .entries
                .values()
                .filter(|e| predicate(&e.op))
                .map(|e| e.op.id)
                .collect();
            for id in &ids {
                state.persist_removal(id)?;
                state.entries.remove(id);
            }
            ids
        };

        if removed.is_empty() {
            return Ok(0);
        }
        info!(count = removed.len(), "purged operations");
        let count = removed.len();
        self.events.publish(QueueEvent::Purged { ids: removed });
        self.maybe_compact()?;
        Ok(count)
    }

    /// Rewrites the journal with only live records.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the rewrite fails; the old journal stays.
    pub fn compact(&self) -> CoreResult<CompactionReport> {
        let mut state = self.state.lock();
        let records_before = state.log.record_count();

        let mut live: Vec<&Entry> = state.entries.values().collect();
        live.sort_by_key(|e| e.seq);
        let payloads = live
            .iter()
            .map(|e| e.op.encode())
            .collect::<Result<Vec<_>, _>>()?;
        state
            .log
            .rewrite(payloads.iter().map(|p| (KIND_PUT, p.as_slice())))?;

        let records_after = state.log.record_count();
        info!(records_before, records_after, "queue journal compacted");
        Ok(CompactionReport {
            records_before,
            records_after,
        })
    }

    fn maybe_compact(&self) -> CoreResult<()> {
        let (dead, total) = {
            let state = self.state.lock();
            let total = state.log.record_count();
            (total.saturating_sub(state.entries.len() as u64), total)
        };
        if total == 0 || dead < self.config.compact_min_dead {
            return Ok(());
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = dead as f64 / total as f64;
        if ratio >= self.config.compact_ratio {
            self.compact()?;
        }
        Ok(())
    }

    /// Counts by status plus journal size.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the journal size cannot be read.
    pub fn stats(&self) -> CoreResult<QueueStats> {
        let state = self.state.lock();
        let mut by_status = BTreeMap::new();
        for entry in state.entries.values() {
            *by_status.entry(entry.op.status).or_insert(0) += 1;
        }
        Ok(QueueStats {
            by_status,
            total: state.entries.len(),
            journal_records: state.log.record_count(),
            journal_bytes: state.log.size()?,
        })
    }

    /// Subscribes to queue changes.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<QueueEvent> {
        self.events.subscribe()
    }

    /// The queue's clock.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The queue configuration.
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("operations", &self.state.lock().entries.len())
            .field("locked_dir", &self.dir_lock.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use offsync_protocol::{ClientId, HttpMethod};
    use serde_json::json;
    use std::time::Duration;

    fn queue_with_clock(start: u64) -> (OperationQueue, Arc<ManualClock>, InMemoryBackend) {
        let clock = Arc::new(ManualClock::new(start));
        let journal = InMemoryBackend::new();
        let queue = OperationQueue::with_backend(
            Box::new(journal.clone()),
            QueueConfig::default(),
            clock.clone(),
        )
        .unwrap();
        (queue, clock, journal)
    }

    fn op(created_at: u64, url: &str) -> Operation {
        Operation::new(
            ClientId::new(),
            HttpMethod::Patch,
            url,
            Some(json!({"name": "x"})),
            created_at,
        )
    }

    #[test]
    fn enqueue_normalizes_status_and_retries() {
        let (queue, _, _) = queue_with_clock(0);
        let mut raw = op(1, "/entities/1");
        raw.status = OperationStatus::Failed;
        raw.retries = 4;
        let id = queue.enqueue(raw).unwrap();

        let stored = queue.get(&id).unwrap();
        assert_eq!(stored.status, OperationStatus::Pending);
        assert_eq!(stored.retries, 0);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let (queue, _, _) = queue_with_clock(0);
        let first = op(1, "/entities/1");
        queue.enqueue(first.clone()).unwrap();
        assert!(matches!(
            queue.enqueue(first),
            Err(CoreError::DuplicateOperation(_))
        ));
    }

    #[test]
    fn drainable_is_ordered_by_creation() {
        let (queue, _, _) = queue_with_clock(0);
        let late = queue.enqueue(op(30, "/entities/1")).unwrap();
        let early = queue.enqueue(op(10, "/entities/1")).unwrap();
        let tie = queue.enqueue(op(30, "/entities/1")).unwrap();

        let order: Vec<_> = queue.drainable().into_iter().map(|o| o.id).collect();
        assert_eq!(order, vec![early, late, tie]);
    }

    #[test]
    fn state_survives_reopen() {
        let (queue, clock, journal) = queue_with_clock(0);
        let id = queue.enqueue(op(1, "/entities/9")).unwrap();
        queue
            .update_status(&id, OperationStatus::Processing, OperationPatch::new())
            .unwrap();
        queue
            .update_status(
                &id,
                OperationStatus::Error,
                OperationPatch::new().retries(1).last_retry_at(5).error("timeout"),
            )
            .unwrap();
        drop(queue);

        let reopened =
            OperationQueue::with_backend(Box::new(journal), QueueConfig::default(), clock).unwrap();
        let stored = reopened.get(&id).unwrap();
        assert_eq!(stored.status, OperationStatus::Error);
        assert_eq!(stored.retries, 1);
        assert_eq!(stored.error_message.as_deref(), Some("timeout"));
    }

    #[test]
    fn interrupted_processing_returns_to_pending() {
        let (queue, clock, journal) = queue_with_clock(0);
        let id = queue.enqueue(op(1, "/entities/2")).unwrap();
        queue.claim(&id).unwrap().unwrap();
        drop(queue);

        let reopened =
            OperationQueue::with_backend(Box::new(journal), QueueConfig::default(), clock).unwrap();
        assert_eq!(reopened.get(&id).unwrap().status, OperationStatus::Pending);
    }

    #[test]
    fn claim_is_exclusive() {
        let (queue, _, _) = queue_with_clock(0);
        let id = queue.enqueue(op(1, "/entities/3")).unwrap();
        assert!(queue.claim(&id).unwrap().is_some());
        assert!(queue.claim(&id).unwrap().is_none());
    }

    #[test]
    fn completed_never_moves() {
        let (queue, _, _) = queue_with_clock(0);
        let id = queue.enqueue(op(1, "/entities/4")).unwrap();
        queue.claim(&id).unwrap();
        queue
            .update_status(&id, OperationStatus::Completed, OperationPatch::new().completed_at(2))
            .unwrap();

        for next in [OperationStatus::Pending, OperationStatus::Superseded, OperationStatus::Error] {
            assert!(matches!(
                queue.update_status(&id, next, OperationPatch::new()),
                Err(CoreError::InvalidTransition { .. })
            ));
        }
        assert_eq!(queue.get(&id).unwrap().status, OperationStatus::Completed);
    }

    #[test]
    fn purge_respects_retention_and_keeps_failures() {
        let (queue, clock, _) = queue_with_clock(1_000);
        let done = queue.enqueue(op(1, "/entities/5")).unwrap();
        let failed = queue.enqueue(op(2, "/entities/6")).unwrap();
        queue.claim(&done).unwrap();
        queue
            .update_status(
                &done,
                OperationStatus::Completed,
                OperationPatch::new().completed_at(1_000),
            )
            .unwrap();
        queue.claim(&failed).unwrap();
        queue
            .update_status(&failed, OperationStatus::Failed, OperationPatch::new())
            .unwrap();

        assert_eq!(queue.purge_completed().unwrap(), 0);

        clock.advance(Duration::from_secs(24 * 60 * 60));
        assert_eq!(queue.purge_completed().unwrap(), 1);
        assert!(queue.get(&done).is_none());
        assert!(queue.get(&failed).is_some());

        assert_eq!(queue.purge_failed().unwrap(), 1);
        assert!(queue.list_all().is_empty());
    }

    #[test]
    fn pending_cannot_be_purged_by_hand() {
        let (queue, _, _) = queue_with_clock(0);
        let id = queue.enqueue(op(1, "/entities/7")).unwrap();
        assert!(matches!(queue.purge(&id), Err(CoreError::NotPurgeable { .. })));
    }

    #[test]
    fn compaction_keeps_live_state() {
        let (queue, clock, journal) = queue_with_clock(0);
        let id = queue.enqueue(op(1, "/entities/8")).unwrap();
        for attempt in 1..=3 {
            queue.claim(&id).unwrap();
            queue
                .update_status(&id, OperationStatus::Error, OperationPatch::new().retries(attempt))
                .unwrap();
        }
        let report = queue.compact().unwrap();
        assert_eq!(report.records_before, 7);
        assert_eq!(report.records_after, 1);
        drop(queue);

        let reopened =
            OperationQueue::with_backend(Box::new(journal), QueueConfig::default(), clock).unwrap();
        assert_eq!(reopened.get(&id).unwrap().retries, 3);
    }

    #[test]
    fn events_follow_changes() {
        let (queue, _, _) = queue_with_clock(0);
        let sub = queue.subscribe();
        let id = queue.enqueue(op(1, "/entities/1")).unwrap();
        queue.claim(&id).unwrap();

        assert_eq!(
            sub.drain(),
            vec![
                QueueEvent::Enqueued { id },
                QueueEvent::StatusChanged {
                    id,
                    from: OperationStatus::Pending,
                    to: OperationStatus::Processing,
                },
            ]
        );
    }

    #[test]
    fn stats_count_by_status() {
        let (queue, _, _) = queue_with_clock(0);
        let a = queue.enqueue(op(1, "/a/1")).unwrap();
        queue.enqueue(op(2, "/a/2")).unwrap();
        queue.claim(&a).unwrap();
        let stats = queue.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.count(OperationStatus::Pending), 1);
        assert_eq!(stats.count(OperationStatus::Processing), 1);
        assert_eq!(stats.journal_records, 3);
    }
}
