//! axum front end.
//!
//! Every request is converted to an [`HttpRequest`] and handed to
//! [`SyncServer::handle`]; routing lives in the server so that the same
//! code serves loopback clients and real sockets.

use crate::error::ServerError;
use crate::server::SyncServer;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use offsync_protocol::{HttpMethod, HttpRequest, HttpResponse};
use serde::Serialize;
use std::sync::Arc;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Largest request body accepted.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Builds the HTTP router for `server`.
pub fn router(server: Arc<SyncServer>) -> Router {
    let timeout = server.config().request_timeout;
    Router::new()
        .route("/health", get(health_check))
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .with_state(server)
}

async fn dispatch(State(server): State<Arc<SyncServer>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let Ok(method) = parts.method.as_str().parse::<HttpMethod>() else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };
    let path = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let error = ServerError::InvalidRequest(format!("unreadable body: {e}"));
            return into_axum(error.to_response());
        }
    };

    let mut request = HttpRequest::new(method, path);
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            request = request.with_header(name.as_str(), value);
        }
    }
    request.body = body.to_vec();

    into_axum(server.handle(request))
}

fn into_axum(response: HttpResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use offsync_protocol::OperationId;
    use serde_json::json;

    async fn call(server: &Arc<SyncServer>, request: Request) -> (StatusCode, serde_json::Value) {
        let response = dispatch(State(Arc::clone(server)), request).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), MAX_BODY_BYTES)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn requests_round_trip_through_the_server() {
        let server = Arc::new(SyncServer::new(ServerConfig::default().with_open_access()));
        let body = json!({
            "id": OperationId::new(),
            "url": "/entities/1",
            "method": "PUT",
            "body": {"name": "a"},
        });
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/sync/operations")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let (status, json) = call(&server, request).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["status"], "completed");

        let list = axum::http::Request::builder()
            .uri("/sync/operations?status=completed")
            .body(Body::empty())
            .unwrap();
        let (status, json) = call(&server, list).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn unsupported_methods_are_rejected() {
        let server = Arc::new(SyncServer::new(ServerConfig::default().with_open_access()));
        let request = axum::http::Request::builder()
            .method("OPTIONS")
            .uri("/sync/operations")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&server, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn headers_survive_conversion() {
        let response = into_axum(HttpResponse::empty(429).with_header("retry-after", "3"));
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "3");
    }
}
