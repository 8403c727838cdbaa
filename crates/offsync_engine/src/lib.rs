//! # offsync engine
//!
//! Client-side sync engine for offline-first applications.
//!
//! This crate provides:
//! - Durable enqueueing of mutating requests on top of the core queue
//! - A drain processor that replays operations in creation order,
//!   FIFO per entity, with exponential backoff and a retry budget
//! - Single-flight sync triggers (enqueue, reconnect, background tags,
//!   periodic registrations, manual)
//! - A debounced network monitor with a reachability check
//! - Client side of conflict resolution
//! - HTTP transport abstraction with a reqwest client, and a tokio
//!   background scheduler
//!
//! ## Status flow
//!
//! ```text
//! pending ──► processing ──► completed
//!    ▲            │  │  ├──► superseded (replay of a settled record)
//!    ▲            │  │  └──► conflict ──► superseded
//!    │            │  └─────► failed
//!    └── error ◄──┘
//! ```
//!
//! ## Key Invariants
//!
//! - Enqueueing never touches the network
//! - At most one drain runs at a time; triggers during a run coalesce
//!   into one more pass
//! - A later operation for an entity never overtakes an earlier one
//! - `conflict` operations are never retried automatically

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client;
mod config;
mod engine;
mod error;
mod events;
mod http;
mod network;
mod processor;
mod resolver;
mod scheduler;
mod transport;
mod trigger;

pub use client::ReqwestClient;
pub use config::{
    ConflictPolicy, NetworkConfig, RetryConfig, SyncConfig, TriggerConfig, MIN_PERIODIC_INTERVAL,
};
pub use engine::{DrainOutcome, SyncEngine, SyncStats};
pub use error::{ResolutionError, SyncError, SyncResult};
pub use events::SyncEvent;
pub use http::{HttpClient, HttpTransport, LoopbackClient, LoopbackServer, TransportFailure};
pub use network::{Connectivity, NetworkEvent, NetworkMonitor, ReachabilityCheck, TransportReachability};
pub use processor::{DrainReport, QueueProcessor};
pub use resolver::ConflictResolver;
pub use scheduler::{SchedulerError, SyncScheduler, DEFAULT_TICK};
pub use transport::{MockTransport, SyncTransport};
pub use trigger::{
    BackgroundSyncRegistry, RunGuard, SyncTrigger, TriggerDecision, TriggerReason, TriggerState,
    DEFAULT_SYNC_TAG,
};
