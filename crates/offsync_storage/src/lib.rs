//! # offsync storage
//!
//! Byte stores underneath the offline operation queue.
//!
//! A backend is an **append-only journal**: the queue appends checksummed
//! records and replays them on open. Backends never interpret what they
//! hold; framing lives in `offsync_codec`.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - Ephemeral journals and tests (clones share one buffer)
//! - [`FileBackend`] - Persistent journals on the local file system
//!
//! A [`DirLock`] guards a queue directory so only one process drains it.
//!
//! ## Example
//!
//! ```rust
//! use offsync_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut journal = InMemoryBackend::new();
//! let offset = journal.append(b"op-1").unwrap();
//! assert_eq!(journal.read_at(offset, 4).unwrap(), b"op-1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod lock;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use lock::DirLock;
pub use memory::InMemoryBackend;
