//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so that different
//! implementations can be plugged in: [`ReqwestClient`](crate::ReqwestClient)
//! for a real server, [`LoopbackClient`] for an in-process one. Bodies are
//! JSON.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use offsync_protocol::{
    HttpMethod, HttpRequest, HttpResponse, Operation, OperationDraft, ResolveRequest,
};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

/// Why no HTTP response was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// The request exceeded its timeout.
    Timeout,
    /// Connection refused, reset or otherwise lost.
    Connection(String),
}

impl From<TransportFailure> for SyncError {
    fn from(failure: TransportFailure) -> Self {
        match failure {
            TransportFailure::Timeout => SyncError::Timeout,
            TransportFailure::Connection(message) => SyncError::transient(message),
        }
    }
}

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a request, giving up after `timeout`.
    ///
    /// `request.path` holds the absolute URL.
    fn send(&self, request: HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportFailure>;

    /// Cheap reachability check.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the sync server (e.g., "https://sync.example.com").
    base_url: String,
    /// HTTP client implementation.
    client: C,
    /// Bearer token.
    token: RwLock<Option<String>>,
    /// Per-request timeout.
    timeout: Duration,
    /// Cleared by [`close`](Self::close).
    open: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            token: RwLock::new(None),
            timeout: Duration::from_secs(30),
            open: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Creates a transport for `config.server_url`, carrying its token and
    /// request timeout.
    pub fn from_config(config: &SyncConfig, client: C) -> Self {
        let mut transport = Self::new(config.server_url.clone(), client).with_timeout(config.timeout);
        if let Some(token) = &config.token {
            transport = transport.with_token(token.clone());
        }
        transport
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.token.write() = Some(token.into());
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replaces the bearer token after re-authentication.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the wrapped client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Stops the transport; later calls fail with [`SyncError::NotConnected`].
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn send(&self, request: HttpRequest) -> SyncResult<HttpResponse> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }

        let mut request = request;
        request.path = format!("{}{}", self.base_url, request.path);
        if let Some(token) = self.token.read().as_deref() {
            request = request.with_bearer(token);
        }

        debug!(method = %request.method, url = %request.path, "sending request");
        match self.client.send(request, self.timeout) {
            Ok(response) => {
                *self.last_error.write() = None;
                Ok(response)
            }
            Err(failure) => {
                let err = SyncError::from(failure);
                *self.last_error.write() = Some(err.to_string());
                Err(err)
            }
        }
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn submit(&self, op: &Operation) -> SyncResult<HttpResponse> {
        let request =
            HttpRequest::new(HttpMethod::Post, "/sync/operations").with_json(&OperationDraft::from(op))?;
        self.send(request)
    }

    fn resolve(&self, request: &ResolveRequest) -> SyncResult<HttpResponse> {
        let request = HttpRequest::new(HttpMethod::Post, "/sync/resolve").with_json(request)?;
        self.send(request)
    }

    fn status(&self) -> SyncResult<HttpResponse> {
        self.send(HttpRequest::new(HttpMethod::Get, "/sync/status"))
    }

    fn is_reachable(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.client.is_healthy()
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync {
    /// Handles a request whose path starts at `/sync/`.
    fn handle(&self, request: HttpRequest) -> HttpResponse;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for std::sync::Arc<S> {
    fn handle(&self, request: HttpRequest) -> HttpResponse {
        (**self).handle(request)
    }
}

/// A loopback HTTP client that routes requests directly to a sync server.
///
/// Useful for testing without actual network overhead. The link can be cut
/// with [`set_online`](Self::set_online) to simulate going offline.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    online: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            online: AtomicBool::new(true),
        }
    }

    /// Connects or disconnects the simulated link.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Returns the wrapped server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn send(&self, mut request: HttpRequest, _timeout: Duration) -> Result<HttpResponse, TransportFailure> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportFailure::Connection("network unreachable".into()));
        }

        // Extract path from URL
        if let Some(i) = request.path.find("/sync/") {
            request.path = request.path[i..].to_string();
        }
        Ok(self.server.handle(request))
    }

    fn is_healthy(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
