//! # offsync protocol
//!
//! Data model shared by the client engine and the sync server.
//!
//! This crate provides:
//! - [`Operation`], the queued mutating request, and its status machine
//! - [`ConflictPayload`] and the resolution types
//! - Request/response bodies for the `/sync/*` HTTP surface
//! - [`CacheEntry`] and [`OfflineDataRecord`] for the read-side cache
//!
//! JSON is used on the wire (`camelCase` fields, lowercase statuses);
//! journals store the same types as CBOR via [`Operation::encode`].
//!
//! This is a pure protocol crate with no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod conflict;
mod entity;
mod error;
mod http;
mod messages;
mod operation;
mod status;

pub use cache::{CacheEntry, OfflineDataRecord};
pub use conflict::{
    ConflictPayload, ConflictSide, ResolutionStrategy, ResolveRequest, ResolvedOperation,
    StrategyName,
};
pub use entity::EntityKey;
pub use error::{ProtocolError, ProtocolResult};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use messages::{
    BatchRequest, BatchResponse, ErrorBody, ProcessSummary, PurgeResponse, StatusReport,
    StatusUpdate, SubmitOutcome,
};
pub use operation::{
    ClientId, Operation, OperationDraft, OperationId, OperationPatch, Timestamp,
};
pub use status::OperationStatus;
