//! # Offsync Testkit
//!
//! Test utilities for offsync.
//!
//! This crate provides:
//! - Queue fixtures on a manual clock, in memory or in a temp directory
//! - A crash-injecting storage backend for durability tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use offsync_testkit::prelude::*;
//!
//! let (queue, ids) = scenarios::populated_queue(3);
//! assert_eq!(queue.drainable().len(), ids.len());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
