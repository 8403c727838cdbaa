//! Read-side caches for offline reads.
//!
//! Two stores share one TTL engine: [`KvCache`] for arbitrary keyed values
//! and [`OfflineStore`] for mirrored server records grouped by store name.
//! Neither is on the write path. Expired entries read as absent and are
//! removed on the read that finds them.

use crate::clock::{duration_ms, Clock};
use crate::config::CacheConfig;
use crate::error::CoreResult;
use crate::log::RecordLog;
use offsync_codec::{from_cbor, to_cbor};
use offsync_protocol::{CacheEntry, OfflineDataRecord, Timestamp};
use offsync_storage::{FileBackend, StorageBackend};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const KIND_PUT: u8 = 1;
const KIND_DELETE: u8 = 2;

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads that found a live entry.
    pub hits: u64,
    /// Reads that found nothing.
    pub misses: u64,
    /// Entries dropped because they had expired.
    pub expired: u64,
    /// Entries dropped to stay under the size limit.
    pub evictions: u64,
}

trait Expiring: Clone + Serialize + DeserializeOwned {
    fn key(&self) -> &str;
    fn written_at(&self) -> Timestamp;
    fn expired_at(&self, now: Timestamp) -> bool;
}

impl Expiring for CacheEntry {
    fn key(&self) -> &str {
        &self.key
    }
    fn written_at(&self) -> Timestamp {
        self.timestamp
    }
    fn expired_at(&self, now: Timestamp) -> bool {
        self.is_expired(now)
    }
}

impl Expiring for OfflineDataRecord {
    fn key(&self) -> &str {
        &self.id
    }
    fn written_at(&self) -> Timestamp {
        self.timestamp
    }
    fn expired_at(&self, now: Timestamp) -> bool {
        self.is_expired(now)
    }
}

struct TtlStore<R> {
    log: Option<RecordLog>,
    records: HashMap<String, R>,
    max_entries: usize,
    stats: CacheStats,
}

impl<R: Expiring> TtlStore<R> {
    fn ephemeral(max_entries: usize) -> Self {
        Self {
            log: None,
            records: HashMap::new(),
            max_entries,
            stats: CacheStats::default(),
        }
    }

    fn persistent(backend: Box<dyn StorageBackend>, config: &CacheConfig) -> CoreResult<Self> {
        let (log, frames) = RecordLog::open(backend, config.sync_on_write)?;
        let mut records = HashMap::new();
        for frame in frames {
            match frame.kind {
                KIND_PUT => {
                    let record: R = from_cbor(&frame.payload)?;
                    records.insert(record.key().to_string(), record);
                }
                KIND_DELETE => {
                    let key: String = from_cbor(&frame.payload)?;
                    records.remove(&key);
                }
                other => {
                    return Err(crate::CoreError::corrupted(format!(
                        "unknown cache record kind {other}"
                    )))
                }
            }
        }
        Ok(Self {
            log: Some(log),
            records,
            max_entries: config.max_entries,
            stats: CacheStats::default(),
        })
    }

    fn get(&mut self, key: &str, now: Timestamp) -> CoreResult<Option<R>> {
        let expired = match self.records.get(key) {
            None => {
                self.stats.misses += 1;
                return Ok(None);
            }
            Some(record) => record.expired_at(now),
        };
        if expired {
            self.remove(key)?;
            self.stats.expired += 1;
            self.stats.misses += 1;
            return Ok(None);
        }
        self.stats.hits += 1;
        Ok(self.records.get(key).cloned())
    }

    fn put(&mut self, record: R) -> CoreResult<()> {
        let key = record.key().to_string();
        if !self.records.contains_key(&key) && self.records.len() >= self.max_entries {
            let oldest = self
                .records
                .values()
                .min_by_key(|r| r.written_at())
                .map(|r| r.key().to_string());
            if let Some(oldest) = oldest {
                self.remove(&oldest)?;
                self.stats.evictions += 1;
            }
        }
        if let Some(log) = self.log.as_mut() {
            log.append(KIND_PUT, &to_cbor(&record)?)?;
        }
        self.records.insert(key, record);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> CoreResult<bool> {
        if !self.records.contains_key(key) {
            return Ok(false);
        }
        if let Some(log) = self.log.as_mut() {
            log.append(KIND_DELETE, &to_cbor(key)?)?;
        }
        self.records.remove(key);
        Ok(true)
    }

    fn remove_matching(&mut self, predicate: impl Fn(&R) -> bool) -> CoreResult<usize> {
        let keys: Vec<String> = self
            .records
            .values()
            .filter(|r| predicate(r))
            .map(|r| r.key().to_string())
            .collect();
        for key in &keys {
            self.remove(key)?;
        }
        Ok(keys.len())
    }

    fn sweep(&mut self, now: Timestamp) -> CoreResult<usize> {
        let swept = self.remove_matching(|r| r.expired_at(now))?;
        self.stats.expired += swept as u64;
        Ok(swept)
    }
}

fn expiry_for(now: Timestamp, ttl: Option<Duration>) -> Option<Timestamp> {
    ttl.map(|ttl| now.saturating_add(duration_ms(ttl)))
}

/// A TTL key-value cache.
///
/// # Example
///
/// ```rust
/// use offsync_core::{CacheConfig, KvCache, SystemClock};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let cache = KvCache::in_memory(CacheConfig::default(), Arc::new(SystemClock));
/// cache.put("profile", json!({"name": "Ada"}), None).unwrap();
/// assert_eq!(cache.get("profile").unwrap(), Some(json!({"name": "Ada"})));
/// ```
pub struct KvCache {
    store: Mutex<TtlStore<CacheEntry>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl KvCache {
    /// A cache that lives only in memory.
    #[must_use]
    pub fn in_memory(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(TtlStore::ephemeral(config.max_entries)),
            config,
            clock,
        }
    }

    /// A cache journaled to `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be replayed.
    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        Ok(Self {
            store: Mutex::new(TtlStore::persistent(backend, &config)?),
            config,
            clock,
        })
    }

    /// A cache journaled to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or replayed.
    pub fn open(path: &Path, config: CacheConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::with_backend(Box::new(backend), config, clock)
    }

    /// Live value for `key`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if sweeping an expired entry fails.
    pub fn get(&self, key: &str) -> CoreResult<Option<Value>> {
        Ok(self.get_entry(key)?.map(|entry| entry.value))
    }

    /// Live entry for `key`, with its timestamps.
    ///
    /// # Errors
    ///
    /// Returns a storage error if sweeping an expired entry fails.
    pub fn get_entry(&self, key: &str) -> CoreResult<Option<CacheEntry>> {
        let now = self.clock.now_ms();
        self.store.lock().get(key, now)
    }

    /// Stores `value`. `ttl` overrides the configured default.
    ///
    /// # Errors
    ///
    /// - [`crate::CoreError::Protocol`] for a zero TTL
    /// - a storage error if the journal rejects the write
    pub fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> CoreResult<()> {
        let now = self.clock.now_ms();
        let ttl = ttl.or(self.config.default_ttl);
        let entry = CacheEntry::new(key, value, now, expiry_for(now, ttl))?;
        self.store.lock().put(entry)
    }

    /// Removes `key`, returning whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the journal rejects the write.
    pub fn delete(&self, key: &str) -> CoreResult<bool> {
        self.store.lock().remove(key)
    }

    /// Drops every expired entry.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the journal rejects the write.
    pub fn sweep(&self) -> CoreResult<usize> {
        let now = self.clock.now_ms();
        let swept = self.store.lock().sweep(now)?;
        if swept > 0 {
            debug!(swept, "expired cache entries removed");
        }
        Ok(swept)
    }

    /// Entries currently held, expired ones included until swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.lock().records.len()
    }

    /// Whether the cache holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit and miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.store.lock().stats
    }
}

/// Mirrored server records for offline reads.
pub struct OfflineStore {
    store: Mutex<TtlStore<OfflineDataRecord>>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
}

impl OfflineStore {
    /// A store that lives only in memory.
    #[must_use]
    pub fn in_memory(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(TtlStore::ephemeral(config.max_entries)),
            config,
            clock,
        }
    }

    /// A store journaled to `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be replayed.
    pub fn with_backend(
        backend: Box<dyn StorageBackend>,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> CoreResult<Self> {
        Ok(Self {
            store: Mutex::new(TtlStore::persistent(backend, &config)?),
            config,
            clock,
        })
    }

    /// Mirrors `data` for `store_name`/`entity_id`.
    ///
    /// # Errors
    ///
    /// - [`crate::CoreError::Protocol`] for a zero TTL
    /// - a storage error if the journal rejects the write
    pub fn put(
        &self,
        store_name: &str,
        entity_id: &str,
        data: Value,
        ttl: Option<Duration>,
    ) -> CoreResult<OfflineDataRecord> {
        let now = self.clock.now_ms();
        let ttl = ttl.or(self.config.default_ttl);
        let record = OfflineDataRecord::new(store_name, entity_id, data, now, expiry_for(now, ttl))?;
        self.store.lock().put(record.clone())?;
        Ok(record)
    }

    /// Live record for `store_name`/`entity_id`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if sweeping an expired record fails.
    pub fn get(&self, store_name: &str, entity_id: &str) -> CoreResult<Option<OfflineDataRecord>> {
        let now = self.clock.now_ms();
        self.store
            .lock()
            .get(&OfflineDataRecord::record_id(store_name, entity_id), now)
    }

    /// Removes one record.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the journal rejects the write.
    pub fn delete(&self, store_name: &str, entity_id: &str) -> CoreResult<bool> {
        self.store
            .lock()
            .remove(&OfflineDataRecord::record_id(store_name, entity_id))
    }

    /// Live records of one store, oldest write first. Expired ones are swept.
    ///
    /// # Errors
    ///
    /// Returns a storage error if sweeping fails.
    pub fn list(&self, store_name: &str) -> CoreResult<Vec<OfflineDataRecord>> {
        let now = self.clock.now_ms();
        let mut store = self.store.lock();
        let swept = store.remove_matching(|r| r.store_name == store_name && r.is_expired(now))?;
        store.stats.expired += swept as u64;

        let mut records: Vec<OfflineDataRecord> = store
            .records
            .values()
            .filter(|r| r.store_name == store_name)
            .cloned()
            .collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Drops every record of one store.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the journal rejects the write.
    pub fn clear_store(&self, store_name: &str) -> CoreResult<usize> {
        self.store
            .lock()
            .remove_matching(|r| r.store_name == store_name)
    }

    /// Drops every expired record.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the journal rejects the write.
    pub fn sweep(&self) -> CoreResult<usize> {
        let now = self.clock.now_ms();
        self.store.lock().sweep(now)
    }

    /// Hit and miss counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.store.lock().stats
    }
}
