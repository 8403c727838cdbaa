//! Crash simulation for queue journals.
//!
//! [`CrashableBackend`] wraps any [`StorageBackend`] and fails writes once a
//! byte budget is exhausted, leaving a torn record behind exactly as a
//! process killed mid-append would. The [`CrashSwitch`] handle stays with
//! the test after the backend has been moved into a queue.
//!
//! ## Usage
//!
//! ```rust
//! use offsync_storage::InMemoryBackend;
//! use offsync_testkit::CrashableBackend;
//!
//! let journal = InMemoryBackend::new();
//! let backend = CrashableBackend::new(Box::new(journal.clone()));
//! let switch = backend.switch();
//! switch.crash_after(0);
//! // hand `backend` to a queue; the next append fails
//! ```

use offsync_core::{Clock, ManualClock, OperationQueue, QueueConfig};
use offsync_protocol::{ClientId, HttpMethod, Operation, OperationStatus};
use offsync_storage::{InMemoryBackend, StorageBackend, StorageError, StorageResult};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared control for a [`CrashableBackend`].
#[derive(Debug)]
pub struct CrashSwitch {
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl CrashSwitch {
    fn new() -> Self {
        Self {
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        }
    }

    /// Crashes once `bytes` more bytes have been appended.
    pub fn crash_after(&self, bytes: usize) {
        let written = self.bytes_written.load(Ordering::SeqCst);
        self.crash_after_bytes
            .store(written.saturating_add(bytes), Ordering::SeqCst);
    }

    /// Makes `flush` and `sync` fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Clears the crash state; the journal keeps whatever was written.
    pub fn reset(&self) {
        self.crash_after_bytes.store(usize::MAX, Ordering::SeqCst);
        self.crashed.store(false, Ordering::SeqCst);
        self.fail_on_sync.store(false, Ordering::SeqCst);
    }

    /// Whether a simulated crash has happened.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Bytes appended through the wrapper so far.
    pub fn bytes_written(&self) -> usize {
        self.bytes_written.load(Ordering::SeqCst)
    }
}

/// A storage backend wrapper that can simulate crashes.
pub struct CrashableBackend {
    inner: Box<dyn StorageBackend>,
    switch: Arc<CrashSwitch>,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Box<dyn StorageBackend>) -> Self {
        Self {
            inner,
            switch: Arc::new(CrashSwitch::new()),
        }
    }

    /// Handle for arming the crash after the backend is moved.
    pub fn switch(&self) -> Arc<CrashSwitch> {
        Arc::clone(&self.switch)
    }

    fn crash(&self, what: &str) -> StorageError {
        self.switch.crashed.store(true, Ordering::SeqCst);
        StorageError::unavailable(format!("simulated crash during {what}"))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        if self.switch.has_crashed() {
            return Err(self.crash("write"));
        }
        let current = self.switch.bytes_written.load(Ordering::SeqCst);
        let threshold = self.switch.crash_after_bytes.load(Ordering::SeqCst);

        if current.saturating_add(bytes.len()) > threshold {
            // Torn write: only the bytes before the crash point land.
            let partial = threshold.saturating_sub(current);
            if partial > 0 {
                self.inner.append(&bytes[..partial])?;
                self.switch.bytes_written.fetch_add(partial, Ordering::SeqCst);
            }
            return Err(self.crash("partial write"));
        }

        let offset = self.inner.append(bytes)?;
        self.switch
            .bytes_written
            .fetch_add(bytes.len(), Ordering::SeqCst);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.switch.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.crash("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.switch.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.crash("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        // A dead process cannot roll back its torn write.
        if self.switch.has_crashed() {
            return Err(self.crash("rollback"));
        }
        self.inner.truncate(new_size)
    }

    fn replace_all(&mut self, data: &[u8]) -> StorageResult<()> {
        if self.switch.has_crashed() {
            return Err(self.crash("compaction"));
        }
        self.inner.replace_all(data)
    }
}

/// Result of a crash recovery run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashRecoveryResult {
    /// Operations acknowledged by `enqueue` before the crash.
    pub acknowledged: usize,
    /// Operations present after reopening.
    pub recovered: usize,
    /// Whether every recovered operation is `pending`.
    pub all_pending: bool,
}

impl CrashRecoveryResult {
    /// Acknowledged operations survived and nothing else appeared.
    pub fn passed(&self) -> bool {
        self.acknowledged == self.recovered && self.all_pending
    }
}

/// Enqueues up to `count` operations into a journal that crashes after
/// `crash_after` bytes, then reopens it.
///
/// Every enqueue acknowledged before the crash must survive the reopen.
pub fn enqueue_until_crash(count: usize, crash_after: usize) -> CrashRecoveryResult {
    let journal = InMemoryBackend::new();
    let backend = CrashableBackend::new(Box::new(journal.clone()));
    let switch = backend.switch();
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));

    let mut acknowledged = 0;
    if let Ok(queue) = OperationQueue::with_backend(Box::new(backend), QueueConfig::default(), Arc::clone(&clock)) {
        switch.crash_after(crash_after);
        let client = ClientId::new();
        for i in 0..count {
            let op = Operation::new(
                client,
                HttpMethod::Put,
                format!("/items/{i}"),
                Some(json!({ "n": i })),
                clock.now_ms(),
            );
            match queue.enqueue(op) {
                Ok(_) => acknowledged += 1,
                Err(_) => break,
            }
        }
    }

    let (recovered, all_pending) =
        match OperationQueue::with_backend(Box::new(journal), QueueConfig::default(), clock) {
            Ok(queue) => {
                let ops = queue.list_all();
                let all_pending = ops.iter().all(|op| op.status == OperationStatus::Pending);
                (ops.len(), all_pending)
            }
            Err(_) => (0, false),
        };

    CrashRecoveryResult {
        acknowledged,
        recovered,
        all_pending,
    }
}
