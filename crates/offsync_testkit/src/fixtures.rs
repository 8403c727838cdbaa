//! Test fixtures and queue helpers.
//!
//! Provides convenience functions for setting up queues on a manual clock
//! and common test scenarios.

use offsync_core::{ManualClock, OperationQueue, QueueConfig};
use offsync_protocol::{ClientId, HttpMethod, Operation, OperationId};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Start time of fixture clocks, in Unix millis.
pub const FIXTURE_EPOCH: u64 = 1_700_000_000_000;

/// A test queue with automatic cleanup.
pub struct TestQueue {
    /// The queue instance.
    pub queue: Arc<OperationQueue>,
    /// The clock the queue reads.
    pub clock: Arc<ManualClock>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestQueue {
    /// Creates a new in-memory test queue.
    pub fn memory() -> Self {
        let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH));
        let queue = OperationQueue::in_memory(QueueConfig::default(), clock.clone())
            .expect("Failed to open in-memory queue");
        Self {
            queue: Arc::new(queue),
            clock,
            temp_dir: None,
        }
    }

    /// Creates a new directory-backed test queue.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = Arc::new(ManualClock::new(FIXTURE_EPOCH));
        let queue = OperationQueue::open(temp_dir.path(), QueueConfig::default(), clock.clone())
            .expect("Failed to open queue directory");
        Self {
            queue: Arc::new(queue),
            clock,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the queue directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Drops the queue and opens the same directory again, as after a
    /// process restart. Panics for in-memory queues.
    pub fn reopen(self) -> Self {
        let TestQueue {
            queue,
            clock,
            temp_dir,
        } = self;
        drop(queue);
        let dir = temp_dir.expect("Only file queues can be reopened");
        let queue = OperationQueue::open(dir.path(), QueueConfig::default(), clock.clone())
            .expect("Failed to reopen queue directory");
        Self {
            queue: Arc::new(queue),
            clock,
            temp_dir: Some(dir),
        }
    }
}

impl std::ops::Deref for TestQueue {
    type Target = OperationQueue;

    fn deref(&self) -> &Self::Target {
        &self.queue
    }
}

/// Runs a test with a temporary in-memory queue.
///
/// # Example
///
/// ```rust
/// use offsync_testkit::{with_temp_queue, patch_operation};
///
/// with_temp_queue(|queue| {
///     queue.enqueue(patch_operation(1, "x", 0)).unwrap();
///     assert_eq!(queue.list_all().len(), 1);
/// });
/// ```
pub fn with_temp_queue<F, R>(f: F) -> R
where
    F: FnOnce(&OperationQueue) -> R,
{
    let test_queue = TestQueue::memory();
    f(&test_queue.queue)
}

/// Runs a test with a temporary directory-backed queue.
pub fn with_file_queue<F, R>(f: F) -> R
where
    F: FnOnce(&OperationQueue, &Path) -> R,
{
    let test_queue = TestQueue::file();
    let path = test_queue
        .path()
        .expect("File queue should have a path")
        .to_path_buf();
    f(&test_queue.queue, &path)
}

/// A `PATCH /entities/{entity}` renaming the entity, created at
/// `FIXTURE_EPOCH + offset_ms`.
pub fn patch_operation(entity: u32, name: &str, offset_ms: u64) -> Operation {
    Operation::new(
        ClientId::new(),
        HttpMethod::Patch,
        format!("/entities/{entity}"),
        Some(json!({ "name": name })),
        FIXTURE_EPOCH + offset_ms,
    )
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A queue holding `count` pending `PUT /items/{i}` operations from one
    /// client, one millisecond apart.
    pub fn populated_queue(count: usize) -> (TestQueue, Vec<OperationId>) {
        let test_queue = TestQueue::memory();
        let client = ClientId::new();
        let mut ids = Vec::with_capacity(count);

        for i in 0..count {
            let body: Value = json!({ "index": i });
            let op = Operation::new(
                client,
                HttpMethod::Put,
                format!("/items/{i}"),
                Some(body),
                FIXTURE_EPOCH + i as u64,
            );
            ids.push(test_queue.enqueue(op).expect("Failed to enqueue"));
        }

        (test_queue, ids)
    }

    /// `count` operations all targeting `/entities/{entity}`, in creation
    /// order, from one client.
    pub fn entity_history(entity: u32, count: usize) -> Vec<Operation> {
        let client = ClientId::new();
        (0..count)
            .map(|i| {
                Operation::new(
                    client,
                    HttpMethod::Patch,
                    format!("/entities/{entity}"),
                    Some(json!({ "revision": i })),
                    FIXTURE_EPOCH + i as u64,
                )
            })
            .collect()
    }
}
