//! Slow Tier Backend
//!
//! Authoritative tier holding the full requested TTL. Payloads are
//! compressed above a size threshold and stored under a key prefix. The
//! table can be saved to and restored from a JSON snapshot so that entries
//! survive a restart of the daemon.

use crate::cache::backend::{compile_pattern, BackendInfo, CacheBackend};
use crate::cache::compression::{Codec, CompressionConfig};
use crate::cache::entry::CompressionAlgorithm;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Persistent Backend Configuration
// =============================================================================

/// Configuration for the persistent backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentBackendConfig {
    /// Maximum stored bytes (after compression)
    pub capacity_bytes: u64,
    /// Prefix for all stored keys
    pub key_prefix: String,
    /// Payload compression
    pub compression: CompressionConfig,
}

impl Default for PersistentBackendConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 2 * 1024 * 1024 * 1024, // 2 GB
            key_prefix: "hdtickets:".to_string(),
            compression: CompressionConfig::default(),
        }
    }
}

// =============================================================================
// Stored Record
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    data: Vec<u8>,
    original_size: u64,
    compression: CompressionAlgorithm,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl StoredRecord {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    saved_at: DateTime<Utc>,
    records: HashMap<String, StoredRecord>,
}

// =============================================================================
// Persistent Backend
// =============================================================================

/// Slow tier with compression and key prefixing
pub struct PersistentBackend {
    name: String,
    store: RwLock<HashMap<String, StoredRecord>>,
    size_bytes: AtomicU64,
    capacity_bytes: u64,
    key_prefix: String,
    codec: Codec,
    hits: AtomicU64,
    misses: AtomicU64,
    available: AtomicBool,
}

impl PersistentBackend {
    /// Create a persistent backend with default config
    pub fn new() -> Self {
        Self::with_config(PersistentBackendConfig::default())
    }

    /// Create a persistent backend with config
    pub fn with_config(config: PersistentBackendConfig) -> Self {
        Self {
            name: "persistent".to_string(),
            store: RwLock::new(HashMap::new()),
            size_bytes: AtomicU64::new(0),
            capacity_bytes: config.capacity_bytes,
            key_prefix: config.key_prefix,
            codec: Codec::new(config.compression),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
    }

    /// Get the key prefix
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn strip<'a>(&self, stored_key: &'a str) -> Option<&'a str> {
        stored_key.strip_prefix(self.key_prefix.as_str())
    }

    /// Set availability (for fault injection)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Check if available
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::unavailable(&self.name))
        }
    }

    /// Write live entries to a JSON snapshot file
    pub fn save_snapshot(&self, path: &Path) -> Result<usize> {
        let now = Utc::now();
        let records: HashMap<String, StoredRecord> = self
            .store
            .read()
            .iter()
            .filter(|(_, r)| r.is_live(now))
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect();
        let count = records.len();

        let snapshot = Snapshot {
            saved_at: now,
            records,
        };
        let encoded = serde_json::to_vec(&snapshot)?;
        std::fs::write(path, encoded)?;

        info!(path = %path.display(), entries = count, "Saved slow tier snapshot");
        Ok(count)
    }

    /// Load live entries from a JSON snapshot file, replacing current content
    pub fn load_snapshot(&self, path: &Path) -> Result<usize> {
        let raw = std::fs::read(path)?;
        let snapshot: Snapshot = serde_json::from_slice(&raw)?;

        let now = Utc::now();
        let live: HashMap<String, StoredRecord> = snapshot
            .records
            .into_iter()
            .filter(|(_, r)| r.is_live(now))
            .collect();
        let size: u64 = live.values().map(|r| r.data.len() as u64).sum();
        let count = live.len();

        *self.store.write() = live;
        self.size_bytes.store(size, Ordering::Relaxed);

        info!(
            path = %path.display(),
            entries = count,
            saved_at = %snapshot.saved_at,
            "Restored slow tier snapshot"
        );
        Ok(count)
    }
}

impl Default for PersistentBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for PersistentBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.ensure_available()?;

        let now = Utc::now();
        let record = self
            .store
            .read()
            .get(&self.prefixed(key))
            .filter(|r| r.is_live(now))
            .cloned();

        let Some(record) = record else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        self.hits.fetch_add(1, Ordering::Relaxed);
        let value = self.codec.decode(&record.data, record.compression)?;
        if value.len() as u64 != record.original_size {
            return Err(Error::Serialization(format!(
                "stored payload for {} has {} bytes, expected {}",
                key,
                value.len(),
                record.original_size
            )));
        }
        Ok(Some(value))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.ensure_available()?;

        let (data, compression) = self.codec.encode(&value);
        if compression != CompressionAlgorithm::None {
            debug!(
                key = %key,
                original = value.len(),
                stored = data.len(),
                algorithm = %compression,
                "Compressed slow tier payload"
            );
        }

        let now = Utc::now();
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| Error::BackendOperationFailed {
                backend: self.name.clone(),
                operation: "set".to_string(),
                reason: format!("ttl of {}s out of range", ttl.as_secs()),
            })?;
        let record = StoredRecord {
            data: data.to_vec(),
            original_size: value.len() as u64,
            compression,
            created_at: now,
            expires_at,
        };
        let new_size = record.data.len() as u64;

        let mut store = self.store.write();
        let prefixed = self.prefixed(key);
        let old_size = store.get(&prefixed).map(|r| r.data.len() as u64).unwrap_or(0);
        let current = self.size_bytes.load(Ordering::Relaxed);
        if current.saturating_sub(old_size) + new_size > self.capacity_bytes {
            return Err(Error::BackendOperationFailed {
                backend: self.name.clone(),
                operation: "set".to_string(),
                reason: format!("capacity of {} bytes exceeded", self.capacity_bytes),
            });
        }

        store.insert(prefixed, record);
        self.size_bytes.fetch_add(new_size, Ordering::Relaxed);
        self.size_bytes.fetch_sub(old_size, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_available()?;

        let removed = self.store.write().remove(&self.prefixed(key));
        Ok(match removed {
            Some(record) => {
                self.size_bytes
                    .fetch_sub(record.data.len() as u64, Ordering::Relaxed);
                true
            }
            None => false,
        })
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        self.ensure_available()?;
        let now = Utc::now();
        Ok(self
            .store
            .read()
            .get(&self.prefixed(key))
            .map(|r| r.is_live(now))
            .unwrap_or(false))
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        self.ensure_available()?;
        let now = Utc::now();
        Ok(self
            .store
            .read()
            .get(&self.prefixed(key))
            .filter(|r| r.is_live(now))
            .and_then(|r| (r.expires_at - now).to_std().ok()))
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        self.ensure_available()?;
        let pattern = compile_pattern(pattern)?;
        let now = Utc::now();
        Ok(self
            .store
            .read()
            .iter()
            .filter(|(_, r)| r.is_live(now))
            .filter_map(|(k, _)| self.strip(k))
            .filter(|k| pattern.matches(k))
            .map(str::to_string)
            .collect())
    }

    async fn info(&self) -> Result<BackendInfo> {
        Ok(BackendInfo {
            name: self.name.clone(),
            memory_used_bytes: self.size_bytes.load(Ordering::Relaxed),
            capacity_bytes: self.capacity_bytes,
            key_count: self.store.read().len() as u64,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            available: self.is_available(),
        })
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_available()?;
        self.store.write().clear();
        self.size_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        self.ensure_available()?;

        let now = Utc::now();
        let mut store = self.store.write();
        let before = store.len();
        let mut freed = 0u64;
        store.retain(|_, r| {
            let live = r.is_live(now);
            if !live {
                freed += r.data.len() as u64;
            }
            live
        });
        let removed = (before - store.len()) as u64;
        drop(store);

        self.size_bytes.fetch_sub(freed, Ordering::Relaxed);
        if removed > 0 {
            debug!(removed, freed_bytes = freed, "Purged expired slow tier entries");
        }
        Ok(removed)
    }

    async fn health_check(&self) -> Result<bool> {
        if !self.is_available() {
            warn!(backend = %self.name, "Slow tier is unavailable");
        }
        Ok(self.is_available())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const TTL: Duration = Duration::from_secs(600);

    #[tokio::test]
    async fn test_basic_operations() {
        let backend = PersistentBackend::new();

        backend.set("tickets:detail:1", Bytes::from("hello world"), TTL).await.unwrap();
        assert_eq!(
            backend.get("tickets:detail:1").await.unwrap().unwrap().as_ref(),
            b"hello world"
        );
        assert!(backend.contains("tickets:detail:1").await.unwrap());

        let info = backend.info().await.unwrap();
        assert_eq!(info.key_count, 1);
        assert_eq!(info.memory_used_bytes, 11);

        assert!(backend.delete("tickets:detail:1").await.unwrap());
        assert!(backend.get("tickets:detail:1").await.unwrap().is_none());
        assert_eq!(backend.info().await.unwrap().memory_used_bytes, 0);
    }

    #[tokio::test]
    async fn test_prefix_is_hidden_from_callers() {
        let backend = PersistentBackend::with_config(PersistentBackendConfig {
            key_prefix: "app:".to_string(),
            ..Default::default()
        });
        backend.set("search:abc", Bytes::from("x"), TTL).await.unwrap();

        assert_eq!(backend.keys_matching("*").await.unwrap(), vec!["search:abc"]);
        assert!(backend.keys_matching("app:*").await.unwrap().is_empty());
        assert_eq!(backend.key_prefix(), "app:");
    }

    #[tokio::test]
    async fn test_large_payload_is_compressed() {
        let backend = PersistentBackend::new();
        let payload = Bytes::from("{\"price\":100,\"section\":\"A\"}".repeat(200));

        backend.set("tickets:query:big", payload.clone(), TTL).await.unwrap();
        let info = backend.info().await.unwrap();
        assert!(info.memory_used_bytes < payload.len() as u64);
        assert_eq!(backend.get("tickets:query:big").await.unwrap().unwrap(), payload);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_expired() {
        let backend = PersistentBackend::new();
        backend.set("k", Bytes::from("v"), Duration::ZERO).await.unwrap();

        assert!(backend.get("k").await.unwrap().is_none());
        assert!(backend.keys_matching("*").await.unwrap().is_empty());
        assert_eq!(backend.purge_expired().await.unwrap(), 1);
        assert_eq!(backend.info().await.unwrap().memory_used_bytes, 0);
    }

    #[tokio::test]
    async fn test_ttl_remaining() {
        let backend = PersistentBackend::new();
        backend.set("k", Bytes::from("v"), TTL).await.unwrap();

        let remaining = backend.ttl_remaining("k").await.unwrap().unwrap();
        assert!(remaining <= TTL);
        assert!(remaining > TTL - Duration::from_secs(5));
        assert!(backend.ttl_remaining("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_rejected() {
        let backend = PersistentBackend::new();
        for ttl in [Duration::from_secs(9_000_000_000_000), Duration::MAX] {
            assert_matches!(
                backend.set("k", Bytes::from("v"), ttl).await,
                Err(Error::BackendOperationFailed { .. })
            );
        }
        assert!(backend.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let backend = PersistentBackend::new();
        backend.set_available(false);

        assert_matches!(backend.get("k").await, Err(Error::BackendUnavailable { .. }));
        assert_matches!(
            backend.set("k", Bytes::from("v"), TTL).await,
            Err(Error::BackendUnavailable { .. })
        );
        assert!(!backend.health_check().await.unwrap());
    }

    #[tokio::test]
    async fn test_snapshot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow-tier.json");

        let backend = PersistentBackend::new();
        backend.set("platforms:stats:stubhub", Bytes::from("{\"listings\":12}"), TTL).await.unwrap();
        backend.set("expired", Bytes::from("gone"), Duration::ZERO).await.unwrap();
        assert_eq!(backend.save_snapshot(&path).unwrap(), 1);

        let restored = PersistentBackend::new();
        assert_eq!(restored.load_snapshot(&path).unwrap(), 1);
        assert_eq!(
            restored.get("platforms:stats:stubhub").await.unwrap().unwrap().as_ref(),
            b"{\"listings\":12}"
        );
        assert!(restored.get("expired").await.unwrap().is_none());
    }
}
