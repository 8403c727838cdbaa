//! # offsync core
//!
//! The client-side durable state of the offline sync engine.
//!
//! - [`OperationQueue`]: journaled queue of mutating requests with an
//!   atomic per-record status API
//! - [`KvCache`] and [`OfflineStore`]: TTL caches for offline reads,
//!   independent of the write path
//! - [`EventBus`]: publish/subscribe fan-out; dropping a subscription
//!   unsubscribes
//! - [`Clock`]: injectable time source
//!
//! Storage failures always surface as [`CoreError::StorageUnavailable`];
//! nothing here drops an operation silently.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod clock;
mod config;
mod error;
mod events;
pub mod log;
mod queue;

pub use cache::{CacheStats, KvCache, OfflineStore};
pub use clock::{duration_ms, Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, QueueConfig};
pub use error::{CoreError, CoreResult};
pub use events::{EventBus, Subscription};
pub use log::{LogScan, RecordLog};
pub use queue::{
    CompactionReport, OperationQueue, QueueEvent, QueueStats, JOURNAL_FILE, KIND_PUT, KIND_REMOVE,
};
