//! Error types for the sync server.

use offsync_protocol::{ErrorBody, HttpResponse, OperationId, ProtocolError};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServerError {
    /// Malformed body, missing field or invalid status value.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing, invalid or expired bearer token.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Unknown operation or route.
    #[error("not found: {0}")]
    NotFound(String),

    /// The conflict was settled with a different strategy.
    #[error("conflict for operation {0} is already resolved")]
    AlreadyResolved(OperationId),

    /// A status change the state machine forbids.
    #[error("illegal status transition {from} -> {to}")]
    InvalidTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Too many requests from one token.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until a token is available.
        retry_after_secs: u64,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::NotAuthorized(_) => 401,
            ServerError::NotFound(_) => 404,
            ServerError::AlreadyResolved(_) | ServerError::InvalidTransition { .. } => 409,
            ServerError::RateLimited { .. } => 429,
            ServerError::Internal(_) => 500,
        }
    }

    /// Short machine-readable kind used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::NotAuthorized(_) => "unauthorized",
            ServerError::NotFound(_) => "not_found",
            ServerError::AlreadyResolved(_) => "already_resolved",
            ServerError::InvalidTransition { .. } => "invalid_transition",
            ServerError::RateLimited { .. } => "rate_limited",
            ServerError::Internal(_) => "internal",
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Renders the error as a JSON response.
    pub fn to_response(&self) -> HttpResponse {
        let body = ErrorBody::new(self.kind(), self.to_string());
        let response = HttpResponse::json(self.status_code(), &body)
            .unwrap_or_else(|_| HttpResponse::empty(self.status_code()));
        match self {
            ServerError::RateLimited { retry_after_secs } => {
                response.with_header("retry-after", retry_after_secs.to_string())
            }
            ServerError::NotAuthorized(_) => response.with_header("www-authenticate", "Bearer"),
            _ => response,
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::InvalidTransition { from, to } => {
                ServerError::InvalidTransition { from, to }
            }
            ProtocolError::Codec(c) => ServerError::Internal(c.to_string()),
            other => ServerError::InvalidRequest(other.to_string()),
        }
    }
}
