//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Maximum operations in one `POST /sync/batch`.
    pub max_batch: usize,
    /// Secret key for token validation.
    pub auth_secret: Option<Vec<u8>>,
    /// Accept requests without a token when no secret is set; the client
    /// id is then taken from the body. Off by default, so a server with
    /// neither a secret nor this flag rejects everything with 401.
    pub open_access: bool,
    /// Token lifetime.
    pub token_expiry: Duration,
    /// Sustained `GET /sync/status` rate per token.
    pub status_rps: u32,
    /// Burst allowance for `GET /sync/status`.
    pub status_burst: u32,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            request_timeout: Duration::from_secs(30),
            max_batch: 100,
            auth_secret: None,
            open_access: false,
            token_expiry: Duration::from_secs(24 * 60 * 60),
            status_rps: 5,
            status_burst: 10,
        }
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch(mut self, size: usize) -> Self {
        self.max_batch = size;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.auth_secret = Some(secret);
        self
    }

    /// Accepts unauthenticated requests when no secret is configured.
    pub fn with_open_access(mut self) -> Self {
        self.open_access = true;
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Sets the status endpoint rate limit.
    pub fn with_status_rate(mut self, rps: u32, burst: u32) -> Self {
        self.status_rps = rps;
        self.status_burst = burst;
        self
    }

    /// Whether bearer tokens are checked.
    pub fn requires_auth(&self) -> bool {
        self.auth_secret.is_some()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
