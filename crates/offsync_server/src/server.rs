//! Main sync server.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler, Submission};
use crate::rate_limit::RateLimiter;
use crate::store::OperationStore;
use offsync_core::{Clock, SystemClock};
use offsync_protocol::{
    BatchRequest, ClientId, HttpMethod, HttpRequest, HttpResponse, OperationDraft,
    ResolveRequest, StatusUpdate,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

const OPERATIONS: &str = "/sync/operations";

/// The sync server.
///
/// Routes `/sync/*` requests to the [`RequestHandler`], checking bearer
/// tokens and rate limiting `GET /sync/status`. Without a secret every
/// request is refused unless the config opts into open access.
/// It speaks the protocol's [`HttpRequest`]/[`HttpResponse`] so it can be
/// mounted behind axum (see [`router`](crate::router)) or called in-process.
///
/// # Example
///
/// ```
/// use offsync_protocol::{HttpMethod, HttpRequest};
/// use offsync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let response = server.handle(HttpRequest::new(HttpMethod::Get, "/sync/operations"));
/// assert_eq!(response.status, 401);
///
/// let open = SyncServer::new(ServerConfig::default().with_open_access());
/// let response = open.handle(HttpRequest::new(HttpMethod::Get, "/sync/operations"));
/// assert_eq!(response.status, 200);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    validator: Option<TokenValidator>,
    status_limiter: RateLimiter,
}

impl SyncServer {
    /// Creates a new sync server on the system clock.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a sync server with an explicit clock.
    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_store(config, Arc::new(OperationStore::new()), clock)
    }

    /// Creates a sync server with an existing store.
    pub fn with_store(
        config: ServerConfig,
        store: Arc<OperationStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let validator = config.auth_secret.clone().map(|secret| {
            TokenValidator::new(AuthConfig::new(secret).with_expiry(config.token_expiry))
        });
        let status_limiter = RateLimiter::new(config.status_rps, config.status_burst);
        let context = Arc::new(HandlerContext::new(config, store, clock));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self {
            handler,
            context,
            validator,
            status_limiter,
        }
    }

    /// The operation store.
    pub fn store(&self) -> &Arc<OperationStore> {
        &self.context.store
    }

    /// The configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Issues a bearer token for `client`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidRequest`] when authentication is not
    /// configured.
    pub fn mint_token(&self, client: ClientId) -> ServerResult<String> {
        self.validator
            .as_ref()
            .ok_or_else(|| ServerError::InvalidRequest("no signing secret configured".into()))?
            .create_token(client, self.context.clock.now_ms())
    }

    /// Handles one request. Never panics; every failure becomes an error
    /// response.
    pub fn handle(&self, request: HttpRequest) -> HttpResponse {
        let method = request.method;
        let route = request.route().to_string();
        match self.dispatch(&request) {
            Ok(response) => {
                debug!(%method, %route, status = response.status, "request handled");
                response
            }
            Err(e) => {
                if e.is_server_error() {
                    warn!(%method, %route, error = %e, "request failed");
                } else {
                    debug!(%method, %route, error = %e, "request rejected");
                }
                e.to_response()
            }
        }
    }

    fn dispatch(&self, request: &HttpRequest) -> ServerResult<HttpResponse> {
        let client = self.authenticate(request)?;
        let route = request.route();
        let segments: Vec<&str> = route.trim_matches('/').split('/').collect();

        match (request.method, segments.as_slice()) {
            (HttpMethod::Post, ["sync", "operations"]) => {
                let draft: OperationDraft = Self::body(request)?;
                let submission = self.handler.handle_submit(draft, client)?;
                Self::submission_response(&submission)
            }
            (HttpMethod::Get, ["sync", "operations"]) => {
                let list = self.handler.handle_list(request.query_param("status"))?;
                Self::json(200, &list)
            }
            (HttpMethod::Get, ["sync", "operations", id]) => {
                Self::json(200, &self.handler.handle_get(id)?)
            }
            (HttpMethod::Patch, ["sync", "operations", id]) => {
                let update: StatusUpdate = Self::body(request)?;
                Self::json(200, &self.handler.handle_update(id, update)?)
            }
            (HttpMethod::Post, ["sync", "batch"]) => {
                let batch: BatchRequest = Self::body(request)?;
                Self::json(200, &self.handler.handle_batch(batch, client)?)
            }
            (HttpMethod::Post, ["sync", "process"]) => {
                Self::json(200, &self.handler.handle_process())
            }
            (HttpMethod::Delete, ["sync", "completed"]) => {
                Self::json(200, &self.handler.handle_purge())
            }
            (HttpMethod::Post, ["sync", "resolve"]) => {
                let resolve: ResolveRequest = Self::body(request)?;
                Self::json(200, &self.handler.handle_resolve(resolve, client)?)
            }
            (HttpMethod::Get, ["sync", "status"]) => {
                let key = client.map_or_else(|| "anonymous".to_string(), |c| c.to_string());
                self.status_limiter
                    .check(&key, self.context.clock.now_ms())
                    .map_err(|retry_after_secs| ServerError::RateLimited { retry_after_secs })?;
                Self::json(200, &self.handler.handle_status())
            }
            _ => Err(ServerError::NotFound(format!(
                "no route for {} {route}",
                request.method
            ))),
        }
    }

    /// Returns the authenticated client, or `None` in open mode.
    fn authenticate(&self, request: &HttpRequest) -> ServerResult<Option<ClientId>> {
        let Some(validator) = &self.validator else {
            if self.context.config.open_access {
                return Ok(None);
            }
            return Err(ServerError::NotAuthorized(
                "authentication is not configured".into(),
            ));
        };
        let token = request
            .bearer_token()
            .ok_or_else(|| ServerError::NotAuthorized("missing bearer token".into()))?;
        validator
            .validate_token(token, self.context.clock.now_ms())
            .map(Some)
    }

    fn submission_response(submission: &Submission) -> ServerResult<HttpResponse> {
        match submission {
            Submission::Conflict { payload, .. } => Self::json(409, payload),
            other => Self::json(other.http_status(), other.operation()),
        }
    }

    fn body<T: DeserializeOwned>(request: &HttpRequest) -> ServerResult<T> {
        request
            .json()
            .map_err(|e| ServerError::InvalidRequest(format!("malformed body: {e}")))
    }

    fn json<T: Serialize>(status: u16, body: &T) -> ServerResult<HttpResponse> {
        HttpResponse::json(status, body).map_err(|e| ServerError::Internal(e.to_string()))
    }
}

impl std::fmt::Debug for SyncServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncServer")
            .field("context", &self.context)
            .field("auth", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}
