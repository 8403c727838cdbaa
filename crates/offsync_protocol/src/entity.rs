//! Entity identity derived from operation URLs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The (entityType, entityId) pair operations are grouped by.
///
/// This is the join key for conflict detection and per-entity ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityKey {
    /// Collection name, e.g. `entities`.
    pub entity_type: String,
    /// Identifier within the collection.
    pub entity_id: String,
}

impl EntityKey {
    /// Creates a key.
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }

    /// Derives `(type, id)` from the last two path segments of `url`.
    ///
    /// Scheme, host, query and fragment are ignored. A single segment gives
    /// the type with no id.
    ///
    /// ```
    /// use offsync_protocol::EntityKey;
    ///
    /// let (kind, id) = EntityKey::parts_from_url("https://api.example.com/entities/42?x=1");
    /// assert_eq!(kind.as_deref(), Some("entities"));
    /// assert_eq!(id.as_deref(), Some("42"));
    /// ```
    #[must_use]
    pub fn parts_from_url(url: &str) -> (Option<String>, Option<String>) {
        let without_fragment = url.split('#').next().unwrap_or_default();
        let without_query = without_fragment.split('?').next().unwrap_or_default();
        let path = match without_query.find("://") {
            Some(i) => {
                let rest = &without_query[i + 3..];
                rest.find('/').map_or("", |slash| &rest[slash..])
            }
            None => without_query,
        };

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => (None, None),
            [only] => (Some((*only).to_string()), None),
            [.., kind, id] => (Some((*kind).to_string()), Some((*id).to_string())),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path() {
        let (kind, id) = EntityKey::parts_from_url("/entities/42");
        assert_eq!(kind.as_deref(), Some("entities"));
        assert_eq!(id.as_deref(), Some("42"));
    }

    #[test]
    fn nested_path_uses_last_two_segments() {
        let (kind, id) = EntityKey::parts_from_url("/api/v1/projects/7/tasks/99/");
        assert_eq!(kind.as_deref(), Some("tasks"));
        assert_eq!(id.as_deref(), Some("99"));
    }

    #[test]
    fn collection_only() {
        let (kind, id) = EntityKey::parts_from_url("https://host/entities");
        assert_eq!(kind.as_deref(), Some("entities"));
        assert_eq!(id, None);
    }

    #[test]
    fn bare_host_has_no_entity() {
        assert_eq!(EntityKey::parts_from_url("https://host"), (None, None));
        assert_eq!(EntityKey::parts_from_url(""), (None, None));
    }
}
