//! Read-side cache records.

use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A key-value cache entry.
///
/// When `expiry` is set it is strictly greater than `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Lookup key.
    pub key: String,
    /// Cached value.
    pub value: Value,
    /// Write time.
    pub timestamp: Timestamp,
    /// Expiry time, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<Timestamp>,
}

impl CacheEntry {
    /// Creates an entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidExpiry`] if `expiry <= timestamp`.
    pub fn new(
        key: impl Into<String>,
        value: Value,
        timestamp: Timestamp,
        expiry: Option<Timestamp>,
    ) -> ProtocolResult<Self> {
        check_expiry(timestamp, expiry)?;
        Ok(Self {
            key: key.into(),
            value,
            timestamp,
            expiry,
        })
    }

    /// Whether the entry reads as absent at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expiry.is_some_and(|expiry| now >= expiry)
    }
}

/// A mirrored server record kept for offline reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineDataRecord {
    /// `storeName:entityId`.
    pub id: String,
    /// Logical store, e.g. `entities`.
    pub store_name: String,
    /// Entity within the store.
    pub entity_id: String,
    /// Mirrored data.
    pub data: Value,
    /// Write time.
    pub timestamp: Timestamp,
    /// Expiry time, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
}

impl OfflineDataRecord {
    /// Creates a record.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidExpiry`] if `expires_at <= timestamp`.
    pub fn new(
        store_name: impl Into<String>,
        entity_id: impl Into<String>,
        data: Value,
        timestamp: Timestamp,
        expires_at: Option<Timestamp>,
    ) -> ProtocolResult<Self> {
        check_expiry(timestamp, expires_at)?;
        let store_name = store_name.into();
        let entity_id = entity_id.into();
        Ok(Self {
            id: Self::record_id(&store_name, &entity_id),
            store_name,
            entity_id,
            data,
            timestamp,
            expires_at,
        })
    }

    /// Composite id for a store and entity.
    #[must_use]
    pub fn record_id(store_name: &str, entity_id: &str) -> String {
        format!("{store_name}:{entity_id}")
    }

    /// Whether the record reads as absent at `now`.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expiry| now >= expiry)
    }
}

fn check_expiry(timestamp: Timestamp, expiry: Option<Timestamp>) -> ProtocolResult<()> {
    match expiry {
        Some(expiry) if expiry <= timestamp => Err(ProtocolError::InvalidExpiry { timestamp, expiry }),
        _ => Ok(()),
    }
}
