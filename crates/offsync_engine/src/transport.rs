//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use offsync_protocol::{HttpResponse, Operation, ResolveRequest};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// A sync transport carries operations to the sync server.
///
/// Implementations return the server's HTTP response as-is; only failures
/// to obtain a response at all (timeouts, dropped connections, encoding
/// errors) are `Err`. Status classification belongs to the caller.
pub trait SyncTransport: Send + Sync {
    /// Submits one operation (`POST /sync/operations`).
    fn submit(&self, op: &Operation) -> SyncResult<HttpResponse>;

    /// Asks the server to settle a conflict (`POST /sync/resolve`).
    fn resolve(&self, request: &ResolveRequest) -> SyncResult<HttpResponse>;

    /// Fetches server status (`GET /sync/status`).
    fn status(&self) -> SyncResult<HttpResponse>;

    /// Lightweight reachability check.
    fn is_reachable(&self) -> bool;
}

impl<T: SyncTransport + ?Sized> SyncTransport for std::sync::Arc<T> {
    fn submit(&self, op: &Operation) -> SyncResult<HttpResponse> {
        (**self).submit(op)
    }

    fn resolve(&self, request: &ResolveRequest) -> SyncResult<HttpResponse> {
        (**self).resolve(request)
    }

    fn status(&self) -> SyncResult<HttpResponse> {
        (**self).status()
    }

    fn is_reachable(&self) -> bool {
        (**self).is_reachable()
    }
}

/// A mock transport for testing.
///
/// Replies are consumed in order; once the script is exhausted every
/// submission gets the fallback reply (201 by default).
#[derive(Debug)]
pub struct MockTransport {
    reachable: AtomicBool,
    submit_replies: Mutex<VecDeque<SyncResult<HttpResponse>>>,
    resolve_replies: Mutex<VecDeque<SyncResult<HttpResponse>>>,
    fallback_status: Mutex<u16>,
    submitted: Mutex<Vec<Operation>>,
    resolved: Mutex<Vec<ResolveRequest>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            submit_replies: Mutex::new(VecDeque::new()),
            resolve_replies: Mutex::new(VecDeque::new()),
            fallback_status: Mutex::new(201),
            submitted: Mutex::new(Vec::new()),
            resolved: Mutex::new(Vec::new()),
        }
    }

    /// Queues the reply for the next submission.
    pub fn push_reply(&self, reply: HttpResponse) {
        self.submit_replies.lock().push_back(Ok(reply));
    }

    /// Queues a transport failure for the next submission.
    pub fn push_failure(&self, error: SyncError) {
        self.submit_replies.lock().push_back(Err(error));
    }

    /// Queues the reply for the next resolve call.
    pub fn push_resolve_reply(&self, reply: HttpResponse) {
        self.resolve_replies.lock().push_back(Ok(reply));
    }

    /// Status returned once the script runs out.
    pub fn set_fallback_status(&self, status: u16) {
        *self.fallback_status.lock() = status;
    }

    /// Sets the reachability answer.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Every operation submitted so far, in order.
    pub fn submitted(&self) -> Vec<Operation> {
        self.submitted.lock().clone()
    }

    /// Every resolve request sent so far.
    pub fn resolved(&self) -> Vec<ResolveRequest> {
        self.resolved.lock().clone()
    }
}

impl SyncTransport for MockTransport {
    fn submit(&self, op: &Operation) -> SyncResult<HttpResponse> {
        if !self.is_reachable() {
            return Err(SyncError::NotConnected);
        }
        self.submitted.lock().push(op.clone());
        match self.submit_replies.lock().pop_front() {
            Some(reply) => reply,
            None => Ok(HttpResponse::empty(*self.fallback_status.lock())),
        }
    }

    fn resolve(&self, request: &ResolveRequest) -> SyncResult<HttpResponse> {
        if !self.is_reachable() {
            return Err(SyncError::NotConnected);
        }
        self.resolved.lock().push(request.clone());
        self.resolve_replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol("no mock resolve reply set".into())))
    }

    fn status(&self) -> SyncResult<HttpResponse> {
        if !self.is_reachable() {
            return Err(SyncError::NotConnected);
        }
        Ok(HttpResponse::empty(200))
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}
