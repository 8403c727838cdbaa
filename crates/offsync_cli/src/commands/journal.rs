//! Read-only access to a queue journal.
//!
//! Replays records the same way the queue does on open, but never writes:
//! operations left `processing` by a crash are shown as they are on disk.

use offsync_codec::from_cbor;
use offsync_core::{log, LogScan, JOURNAL_FILE, KIND_PUT, KIND_REMOVE};
use offsync_protocol::{Operation, OperationId};
use offsync_storage::FileBackend;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A replayed view of a journal.
#[derive(Debug)]
pub struct Snapshot {
    /// Live operations in drain order.
    pub operations: Vec<Operation>,
    /// The raw scan.
    pub scan: LogScan,
}

impl Snapshot {
    /// Records that no longer describe a live operation.
    pub fn dead_records(&self) -> usize {
        self.scan.records.len().saturating_sub(self.operations.len())
    }
}

/// Returns the journal file inside `dir`, failing if there is none.
pub fn journal_path(dir: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = dir.join(JOURNAL_FILE);
    if !path.exists() {
        return Err(format!("No queue journal found at {:?}", dir).into());
    }
    Ok(path)
}

/// Scans the journal in `dir` without locking it.
pub fn scan_dir(dir: &Path) -> Result<LogScan, Box<dyn std::error::Error>> {
    let backend = FileBackend::open(&journal_path(dir)?)?;
    Ok(log::scan(&backend)?)
}

/// Replays the journal in `dir`.
pub fn read_snapshot(dir: &Path) -> Result<Snapshot, Box<dyn std::error::Error>> {
    let scan = scan_dir(dir)?;
    let mut live: HashMap<OperationId, (usize, Operation)> = HashMap::new();

    for (seq, (offset, frame)) in scan.records.iter().enumerate() {
        match frame.kind {
            KIND_PUT => {
                let op = Operation::decode(&frame.payload)
                    .map_err(|e| format!("bad operation record at {offset}: {e}"))?;
                // First write fixes the drain position.
                let seq = live.get(&op.id).map_or(seq, |(s, _)| *s);
                live.insert(op.id, (seq, op));
            }
            KIND_REMOVE => {
                let id: OperationId = from_cbor(&frame.payload)?;
                live.remove(&id);
            }
            other => {
                return Err(format!("unknown record kind {other} at {offset}").into());
            }
        }
    }

    let mut ordered: Vec<(usize, Operation)> = live.into_values().collect();
    ordered.sort_by_key(|(seq, op)| (op.created_at, *seq));
    Ok(Snapshot {
        operations: ordered.into_iter().map(|(_, op)| op).collect(),
        scan,
    })
}

/// Human-readable name of a record kind.
pub fn kind_name(kind: u8) -> &'static str {
    match kind {
        KIND_PUT => "PUT",
        KIND_REMOVE => "REMOVE",
        _ => "UNKNOWN",
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use offsync_core::{ManualClock, OperationQueue, QueueConfig};
    use offsync_protocol::{OperationPatch, OperationStatus};
    use std::sync::Arc;

    #[test]
    fn missing_journal_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_snapshot(dir.path()).is_err());
    }

    #[test]
    fn replay_keeps_latest_state_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let ids = testing::seed(dir.path(), 3);
        {
            let queue = OperationQueue::open(
                dir.path(),
                QueueConfig::default(),
                Arc::new(ManualClock::new(5_000)),
            )
            .unwrap();
            queue
                .update_status(&ids[0], OperationStatus::Failed, OperationPatch::new())
                .unwrap();
            queue.purge(&ids[0]).unwrap();
            queue
                .update_status(&ids[1], OperationStatus::Processing, OperationPatch::new())
                .unwrap();
        }

        let snapshot = read_snapshot(dir.path()).unwrap();
        let seen: Vec<OperationId> = snapshot.operations.iter().map(|op| op.id).collect();
        assert_eq!(seen, vec![ids[1], ids[2]]);
        assert_eq!(snapshot.operations[0].status, OperationStatus::Processing);
        assert_eq!(snapshot.dead_records(), 4);
    }
}
