//! Cache entry and metadata records

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::invalidation::{default_rules, InvalidationRule};

/// Cache format version stamped into every entry and the metadata record.
pub const CACHE_VERSION: &str = "1.0.0";

/// Reserved logical key for the per-manager metadata record. Never part of
/// entry enumeration, pattern matching, or sweeps.
pub const METADATA_KEY: &str = "metadata";

/// Entity kinds Othos caches data for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Collection,
    Dot,
    Snapshot,
    UserPreferences,
}

impl EntityType {
    /// Classify a logical key by substring, in fixed priority order.
    ///
    /// This mirrors the key-naming convention used by Othos callers
    /// ("user:{id}:collections:list", "user:{id}:dot:{id}", ...). It is a
    /// compatibility shim for that convention, not a contract; keys that
    /// match nothing are treated as collection data.
    pub fn infer(key: &str) -> Self {
        if key.contains("collections") {
            EntityType::Collection
        } else if key.contains("dot") {
            EntityType::Dot
        } else if key.contains("collection") {
            EntityType::Collection
        } else if key.contains("snapshot") {
            EntityType::Snapshot
        } else if key.contains("preferences") {
            EntityType::UserPreferences
        } else {
            EntityType::Collection
        }
    }

    /// Key-segment spelling of this entity type
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Collection => "collection",
            EntityType::Dot => "dot",
            EntityType::Snapshot => "snapshot",
            EntityType::UserPreferences => "user_preferences",
        }
    }
}

/// Extract an entity id from a logical key, if one is recognizable.
///
/// Keys embed ids as `:`-separated segments; a segment is taken to be an id
/// when it is longer than ten characters and either hyphenated (UUID-like)
/// or purely numeric.
pub fn infer_entity_id(key: &str) -> Option<String> {
    key.split(':')
        .find(|segment| {
            segment.len() > 10
                && (segment.contains('-') || segment.chars().all(|c| c.is_ascii_digit()))
        })
        .map(str::to_owned)
}

/// One stored value plus its expiry and provenance metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// Logical key, unprefixed
    pub key: String,
    /// The cached payload
    pub data: T,
    /// Write time, milliseconds since epoch
    pub timestamp: i64,
    /// Milliseconds until expiry
    pub ttl: u64,
    /// Cache format version at write time
    pub version: String,
    /// Owner at write time
    pub user_id: String,
    /// Entity kind inferred from the key
    pub entity_type: EntityType,
    /// Entity id inferred from the key, when recognizable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl<T> CacheEntry<T> {
    /// Build an entry stamped with the current time.
    pub fn new(key: &str, data: T, ttl_ms: u64, version: &str, user_id: &str) -> Self {
        Self {
            key: key.to_string(),
            data,
            timestamp: Utc::now().timestamp_millis(),
            ttl: ttl_ms,
            version: version.to_string(),
            user_id: user_id.to_string(),
            entity_type: EntityType::infer(key),
            entity_id: infer_entity_id(key),
        }
    }

    /// An entry is expired iff `now > timestamp + ttl`.
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp_millis() > self.expires_at()
    }

    /// Expiry instant, milliseconds since epoch
    pub fn expires_at(&self) -> i64 {
        self.timestamp.saturating_add(self.ttl as i64)
    }
}

/// Per-manager cache metadata. Exactly one record exists at a time, stored
/// under [`METADATA_KEY`] and owned exclusively by the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub version: String,
    /// Last identity rebind or sync, milliseconds since epoch
    pub last_sync: i64,
    pub user_id: String,
    pub session_id: String,
    pub invalidation_rules: Vec<InvalidationRule>,
}

impl CacheMetadata {
    pub fn new(user_id: &str, session_id: &str) -> Self {
        Self {
            version: CACHE_VERSION.to_string(),
            last_sync: Utc::now().timestamp_millis(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            invalidation_rules: default_rules(),
        }
    }

    /// Shallow-merge a partial update into this record.
    pub fn apply(&mut self, update: CacheMetadataUpdate) {
        if let Some(version) = update.version {
            self.version = version;
        }
        if let Some(last_sync) = update.last_sync {
            self.last_sync = last_sync;
        }
        if let Some(user_id) = update.user_id {
            self.user_id = user_id;
        }
        if let Some(session_id) = update.session_id {
            self.session_id = session_id;
        }
    }
}

impl Default for CacheMetadata {
    fn default() -> Self {
        Self::new("", "")
    }
}

/// Partial update for [`CacheMetadata`]; unset fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct CacheMetadataUpdate {
    pub version: Option<String>,
    pub last_sync: Option<i64>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_priority_order() {
        assert_eq!(
            EntityType::infer("user:u1:collections:list"),
            EntityType::Collection
        );
        assert_eq!(EntityType::infer("user:u1:dots:d1"), EntityType::Dot);
        assert_eq!(EntityType::infer("user:u1:dot:d1"), EntityType::Dot);
        assert_eq!(
            EntityType::infer("user:u1:collection:c1"),
            EntityType::Collection
        );
        assert_eq!(
            EntityType::infer("user:u1:snapshot:s1"),
            EntityType::Snapshot
        );
        assert_eq!(
            EntityType::infer("user:u1:preferences"),
            EntityType::UserPreferences
        );
        // "collections" wins over a later "dot" segment
        assert_eq!(
            EntityType::infer("user:u1:collections:dot-counts"),
            EntityType::Collection
        );
        // unknown keys default to collection
        assert_eq!(EntityType::infer("user:u1:misc"), EntityType::Collection);
    }

    #[test]
    fn test_entity_id_inference() {
        assert_eq!(
            infer_entity_id("user:u1:dot:3f8a2c14-9b7e-4d2a"),
            Some("3f8a2c14-9b7e-4d2a".to_string())
        );
        assert_eq!(
            infer_entity_id("user:u1:dot:12345678901"),
            Some("12345678901".to_string())
        );
        // short or plain segments are not ids
        assert_eq!(infer_entity_id("user:u1:collections:list"), None);
        assert_eq!(infer_entity_id("user:u1:dot:abcdefghijk"), None);
    }

    #[test]
    fn test_entry_expiry() {
        let mut entry = CacheEntry::new("user:u1:collections:list", 1, 1_000, CACHE_VERSION, "u1");
        assert!(!entry.is_expired());

        entry.timestamp -= 2_000;
        assert!(entry.is_expired());
    }

    #[test]
    fn test_entry_with_remaining_ttl_not_expired() {
        let mut entry = CacheEntry::new("k", (), 0, CACHE_VERSION, "u1");
        entry.timestamp = Utc::now().timestamp_millis() + 60_000;
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_metadata_partial_update() {
        let mut meta = CacheMetadata::new("u1", "s1");
        let before_sync = meta.last_sync;

        meta.apply(CacheMetadataUpdate {
            user_id: Some("u2".to_string()),
            ..Default::default()
        });

        assert_eq!(meta.user_id, "u2");
        assert_eq!(meta.session_id, "s1");
        assert_eq!(meta.last_sync, before_sync);
    }

    #[test]
    fn test_entry_round_trips_through_json() {
        let entry = CacheEntry::new(
            "user:u1:collection:c1",
            vec!["a".to_string(), "b".to_string()],
            5_000,
            CACHE_VERSION,
            "u1",
        );
        let raw = serde_json::to_string(&entry).unwrap();
        let back: CacheEntry<Vec<String>> = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.data, entry.data);
        assert_eq!(back.entity_type, EntityType::Collection);
    }
}
