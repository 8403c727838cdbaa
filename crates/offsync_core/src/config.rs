//! Queue and cache configuration.

use std::time::Duration;

/// Configuration for [`crate::OperationQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long `completed` and `superseded` records are kept.
    pub retention: Duration,
    /// Sync the journal after every record.
    pub sync_on_write: bool,
    /// Minimum dead records before compaction is considered.
    pub compact_min_dead: u64,
    /// Dead-to-total ratio above which the journal is compacted.
    pub compact_ratio: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            sync_on_write: true,
            compact_min_dead: 256,
            compact_ratio: 0.5,
        }
    }
}

impl QueueConfig {
    /// Sets the retention window.
    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Enables or disables per-record sync.
    #[must_use]
    pub fn with_sync_on_write(mut self, sync: bool) -> Self {
        self.sync_on_write = sync;
        self
    }

    /// Sets the compaction trigger.
    #[must_use]
    pub fn with_compaction(mut self, min_dead: u64, ratio: f64) -> Self {
        self.compact_min_dead = min_dead;
        self.compact_ratio = ratio;
        self
    }
}

/// Configuration for the read-side caches.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when `put` is called without one. `None` means no expiry.
    pub default_ttl: Option<Duration>,
    /// Entry limit; the oldest write is evicted beyond it.
    pub max_entries: usize,
    /// Sync the journal after every record.
    pub sync_on_write: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Some(Duration::from_secs(60 * 60)),
            max_entries: 10_000,
            sync_on_write: false,
        }
    }
}

impl CacheConfig {
    /// Sets the default TTL.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the entry limit.
    #[must_use]
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }
}
