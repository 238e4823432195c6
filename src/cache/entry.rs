//! Cache Entry Types
//!
//! Defines cache keys, stored entries, and compression identifiers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// =============================================================================
// Cache Key
// =============================================================================

/// Structured cache key
///
/// Renders as `namespace:id`, or just `id` when the namespace is empty.
/// Parsing splits at the first `:`, so ids may themselves contain colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Namespace (e.g., "tickets", "search", "view_fragments")
    pub namespace: String,
    /// Identifier within the namespace
    pub id: String,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            id: id.into(),
        }
    }

    /// Get a string representation for storage
    pub fn to_storage_key(&self) -> String {
        if self.namespace.is_empty() {
            self.id.clone()
        } else {
            format!("{}:{}", self.namespace, self.id)
        }
    }

    /// Parse from storage key string
    pub fn from_storage_key(key: &str) -> Self {
        match key.split_once(':') {
            Some((namespace, id)) => Self::new(namespace, id),
            None => Self::new("", key),
        }
    }

    /// Metrics category derived from the key
    pub fn category(&self) -> &str {
        if self.namespace.is_empty() {
            "default"
        } else {
            &self.namespace
        }
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::from_storage_key(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self::from_storage_key(&key)
    }
}

impl From<&String> for CacheKey {
    fn from(key: &String) -> Self {
        Self::from_storage_key(key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.id)
        } else {
            write!(f, "{}:{}", self.namespace, self.id)
        }
    }
}

// =============================================================================
// Compression Algorithm
// =============================================================================

/// Compression algorithm identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Lz4,
    Zstd,
    Snappy,
}

impl CompressionAlgorithm {
    /// Parse an algorithm name as written in stored records
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "none" => Some(CompressionAlgorithm::None),
            "lz4" => Some(CompressionAlgorithm::Lz4),
            "zstd" => Some(CompressionAlgorithm::Zstd),
            "snappy" => Some(CompressionAlgorithm::Snappy),
            _ => None,
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionAlgorithm::None => write!(f, "none"),
            CompressionAlgorithm::Lz4 => write!(f, "lz4"),
            CompressionAlgorithm::Zstd => write!(f, "zstd"),
            CompressionAlgorithm::Snappy => write!(f, "snappy"),
        }
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A record held by a cache backend
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Storage key
    pub key: String,
    /// Opaque payload
    pub value: Bytes,
    /// Time-to-live fixed at write time
    pub ttl_seconds: u64,
    /// Time when the entry was written
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create a new cache entry
    pub fn new(key: impl Into<String>, value: Bytes, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            ttl_seconds: ttl.as_secs(),
            created_at: Utc::now(),
        }
    }

    /// Time when the entry stops being served
    ///
    /// TTLs reaching past the representable range never expire.
    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at()
    }

    /// Get age in seconds since creation
    pub fn age_seconds(&self) -> u64 {
        let age = Utc::now().signed_duration_since(self.created_at);
        age.num_seconds().max(0) as u64
    }

    /// Size of the payload in bytes
    pub fn size_bytes(&self) -> u64 {
        self.value.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_creation() {
        let key = CacheKey::new("tickets", "detail:42");
        assert_eq!(key.namespace, "tickets");
        assert_eq!(key.id, "detail:42");
        assert_eq!(key.to_storage_key(), "tickets:detail:42");
        assert_eq!(key.category(), "tickets");
    }

    #[test]
    fn test_cache_key_parsing_splits_at_first_colon() {
        let key = CacheKey::from_storage_key("tickets:availability:7");
        assert_eq!(key.namespace, "tickets");
        assert_eq!(key.id, "availability:7");
        assert_eq!(key.to_storage_key(), "tickets:availability:7");
    }

    #[test]
    fn test_cache_key_without_namespace() {
        let key = CacheKey::from("standalone");
        assert_eq!(key.namespace, "");
        assert_eq!(key.to_storage_key(), "standalone");
        assert_eq!(key.category(), "default");
        assert_eq!(key.to_string(), "standalone");
    }

    #[test]
    fn test_compression_algorithm_names() {
        for algo in [
            CompressionAlgorithm::None,
            CompressionAlgorithm::Lz4,
            CompressionAlgorithm::Zstd,
            CompressionAlgorithm::Snappy,
        ] {
            assert_eq!(CompressionAlgorithm::parse(&algo.to_string()), Some(algo));
        }
        assert_eq!(CompressionAlgorithm::parse("brotli"), None);
    }

    #[test]
    fn test_cache_entry_expiry() {
        let entry = CacheEntry::new("k", Bytes::from("data"), Duration::from_secs(3600));
        assert!(!entry.is_expired());
        assert_eq!(entry.size_bytes(), 4);
        assert_eq!(entry.ttl_seconds, 3600);

        let mut stale = CacheEntry::new("k", Bytes::from("data"), Duration::from_secs(10));
        stale.created_at = Utc::now() - chrono::Duration::seconds(11);
        assert!(stale.is_expired());
        assert!(stale.age_seconds() >= 11);
    }

    #[test]
    fn test_unrepresentable_ttl_never_expires() {
        let entry = CacheEntry::new("k", Bytes::from("data"), Duration::MAX);
        assert_eq!(entry.expires_at(), DateTime::<Utc>::MAX_UTC);
        assert!(!entry.is_expired());
    }
}
