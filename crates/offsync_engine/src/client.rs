//! Network [`HttpClient`] backed by reqwest's blocking client.
//!
//! Drains run on plain threads (or tokio's blocking pool through the
//! scheduler), so the blocking API is used. Do not call it from inside an
//! async task.

use crate::error::{SyncError, SyncResult};
use crate::http::{HttpClient, TransportFailure};
use offsync_protocol::{HttpRequest, HttpResponse};
use reqwest::blocking::Client;
use reqwest::Method;
use std::time::Duration;
use tracing::debug;

/// Bound on the health check.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for a real sync server.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
    health_url: Option<String>,
}

impl ReqwestClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the TLS backend cannot be set up.
    pub fn new() -> SyncResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("offsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            health_url: None,
        })
    }

    /// Checks `url` with a GET for [`is_healthy`](HttpClient::is_healthy).
    /// Without one the client always reports healthy.
    #[must_use]
    pub fn with_health_url(mut self, url: impl Into<String>) -> Self {
        self.health_url = Some(url.into());
        self
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportFailure> {
        let method = Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransportFailure::Connection(e.to_string()))?;

        let mut builder = self.client.request(method, &request.path).timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder.send().map_err(failure)?;
        let mut out = HttpResponse::empty(response.status().as_u16());
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                out = out.with_header(name.as_str(), value);
            }
        }
        out.body = response.bytes().map_err(failure)?.to_vec();
        Ok(out)
    }

    fn is_healthy(&self) -> bool {
        let Some(url) = &self.health_url else {
            return true;
        };
        match self.client.get(url).timeout(HEALTH_TIMEOUT).send() {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(%url, error = %e, "health check failed");
                false
            }
        }
    }
}

fn failure(e: reqwest::Error) -> TransportFailure {
    if e.is_timeout() {
        TransportFailure::Timeout
    } else {
        TransportFailure::Connection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offsync_protocol::HttpMethod;

    #[test]
    fn refused_connection_is_a_connection_failure() {
        let client = ReqwestClient::new().unwrap();
        // Port 9 (discard) is closed on test machines.
        let request = HttpRequest::new(HttpMethod::Get, "http://127.0.0.1:9/sync/status");
        assert!(matches!(
            client.send(request, Duration::from_secs(2)),
            Err(TransportFailure::Connection(_) | TransportFailure::Timeout)
        ));
    }

    #[test]
    fn unreachable_health_url_is_unhealthy() {
        let client = ReqwestClient::new()
            .unwrap()
            .with_health_url("http://127.0.0.1:9/health");
        assert!(!client.is_healthy());
        assert!(ReqwestClient::new().unwrap().is_healthy());
    }
}
