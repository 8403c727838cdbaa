//! # Offsync Sync Server
//!
//! Reference HTTP sync server for offline-first operation queues.
//!
//! This crate provides:
//! - `/sync/*` endpoints (submit, batch, list, status updates, resolve)
//! - Per-entity state with `POST`/`PUT`/`PATCH`/`DELETE` semantics
//! - Conflict detection across clients and resolution (LWW or manual merge)
//! - Authentication (HMAC-SHA256 bearer tokens)
//! - Token-bucket rate limiting of `GET /sync/status`
//!
//! # Architecture
//!
//! [`SyncServer`] routes protocol-level [`HttpRequest`]s, so the same
//! server backs a socket (via [`router`]) and in-process loopback clients
//! in tests. All state sits behind one lock in [`OperationStore`]: detection,
//! application and resolution of a request see a consistent view.
//!
//! # Authentication
//!
//! Every request needs a bearer token unless the config opts into open
//! access with `with_open_access()`:
//!
//! ```rust
//! use offsync_protocol::ClientId;
//! use offsync_server::{ServerConfig, SyncServer};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let server = SyncServer::new(ServerConfig::default().with_auth(secret));
//!
//! // Tokens are minted out of band and sent as `Authorization: Bearer`.
//! let token = server.mint_token(ClientId::new()).unwrap();
//! assert_eq!(token.len(), 112);
//! ```
//!
//! [`HttpRequest`]: offsync_protocol::HttpRequest

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod config;
mod conflict;
mod error;
mod handler;
mod http;
mod rate_limit;
mod resolver;
mod server;
mod store;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use conflict::ConflictDetector;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler, Submission};
pub use http::{router, MAX_BODY_BYTES};
pub use rate_limit::RateLimiter;
pub use resolver::ConflictResolver;
pub use server::SyncServer;
pub use store::{OperationStore, StoreState, Tombstone};
