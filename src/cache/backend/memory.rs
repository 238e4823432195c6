//! Fast Tier Backend
//!
//! In-memory store on DashMap with per-entry deadlines.

use crate::cache::backend::{compile_pattern, BackendInfo, CacheBackend};
use crate::cache::entry::CacheEntry;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// Memory Backend Configuration
// =============================================================================

/// Configuration for the memory backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryBackendConfig {
    /// Maximum payload bytes held
    pub capacity_bytes: u64,
    /// Number of shards for DashMap (0 = auto)
    pub shard_count: usize,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: 256 * 1024 * 1024, // 256 MB
            shard_count: 0,
        }
    }
}

// =============================================================================
// Memory Backend
// =============================================================================

struct Slot {
    entry: CacheEntry,
    deadline: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        now < self.deadline
    }
}

/// Fast tier backed by DashMap
pub struct MemoryBackend {
    name: String,
    entries: DashMap<String, Slot>,
    size_bytes: AtomicU64,
    capacity_bytes: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    available: AtomicBool,
}

impl MemoryBackend {
    /// Create a memory backend with default config
    pub fn new() -> Self {
        Self::with_config(MemoryBackendConfig::default())
    }

    /// Create a memory backend with full config
    pub fn with_config(config: MemoryBackendConfig) -> Self {
        let entries = if config.shard_count > 0 {
            DashMap::with_shard_amount(config.shard_count)
        } else {
            DashMap::new()
        };

        Self {
            name: "memory".to_string(),
            entries,
            size_bytes: AtomicU64::new(0),
            capacity_bytes: config.capacity_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            available: AtomicBool::new(true),
        }
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

    fn remove_slot(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, slot)) => {
                self.size_bytes
                    .fetch_sub(slot.entry.size_bytes(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    fn purge_now(&self) -> u64 {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|r| !r.value().is_live(now))
            .map(|r| r.key().clone())
            .collect();

        let mut removed = 0;
        for key in expired {
            // Re-check under the shard lock; the key may have been rewritten
            if let Some((_, slot)) = self.entries.remove_if(&key, |_, slot| !slot.is_live(now)) {
                self.size_bytes
                    .fetch_sub(slot.entry.size_bytes(), Ordering::Relaxed);
                removed += 1;
            }
        }
        removed
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.ensure_available()?;

        let now = Instant::now();
        let found = match self.entries.get(key) {
            Some(slot) if slot.is_live(now) => Some(slot.entry.value.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        match found {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(value))
            }
            None => {
                // Lazily drop the expired slot
                if let Some((_, slot)) = self.entries.remove_if(key, |_, s| !s.is_live(now)) {
                    self.size_bytes
                        .fetch_sub(slot.entry.size_bytes(), Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
        self.ensure_available()?;

        let new_size = value.len() as u64;
        let old_size = self
            .entries
            .get(key)
            .map(|s| s.entry.size_bytes())
            .unwrap_or(0);

        let projected = self.size_bytes.load(Ordering::Relaxed).saturating_sub(old_size) + new_size;
        if projected > self.capacity_bytes {
            self.purge_now();
            let current = self.size_bytes.load(Ordering::Relaxed);
            if current.saturating_sub(old_size) + new_size > self.capacity_bytes {
                return Err(Error::BackendOperationFailed {
                    backend: self.name.clone(),
                    operation: "set".to_string(),
                    reason: format!(
                        "capacity exceeded ({} + {} > {} bytes)",
                        current, new_size, self.capacity_bytes
                    ),
                });
            }
        }

        let deadline = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| Error::BackendOperationFailed {
                backend: self.name.clone(),
                operation: "set".to_string(),
                reason: format!("ttl of {}s out of range", ttl.as_secs()),
            })?;
        let slot = Slot {
            entry: CacheEntry::new(key, value, ttl),
            deadline,
        };

        let replaced = self.entries.insert(key.to_string(), slot);
        self.size_bytes.fetch_add(new_size, Ordering::Relaxed);
        if let Some(old) = replaced {
            self.size_bytes
                .fetch_sub(old.entry.size_bytes(), Ordering::Relaxed);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.remove_slot(key))
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        self.ensure_available()?;
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .map(|s| s.is_live(now))
            .unwrap_or(false))
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
        self.ensure_available()?;
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|s| s.is_live(now))
            .map(|s| s.deadline - now))
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        self.ensure_available()?;
        let pattern = compile_pattern(pattern)?;
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|r| r.value().is_live(now) && pattern.matches(r.key()))
            .map(|r| r.key().clone())
            .collect())
    }

    async fn info(&self) -> Result<BackendInfo> {
        Ok(BackendInfo {
            name: self.name.clone(),
            memory_used_bytes: self.size_bytes.load(Ordering::Relaxed),
            capacity_bytes: self.capacity_bytes,
            key_count: self.entries.len() as u64,
            hit_count: self.hits.load(Ordering::Relaxed),
            miss_count: self.misses.load(Ordering::Relaxed),
            available: self.is_available(),
        })
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_available()?;
        self.entries.clear();
        self.size_bytes.store(0, Ordering::Relaxed);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        self.ensure_available()?;
        Ok(self.purge_now())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.is_available())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_basic_operations() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(60);

        backend.set("tickets:detail:1", Bytes::from("hello world"), ttl).await.unwrap();

        let info = backend.info().await.unwrap();
        assert_eq!(info.key_count, 1);
        assert_eq!(info.memory_used_bytes, 11);

        let value = backend.get("tickets:detail:1").await.unwrap().unwrap();
        assert_eq!(value.as_ref(), b"hello world");
        assert!(backend.contains("tickets:detail:1").await.unwrap());
        assert!(!backend.contains("tickets:detail:2").await.unwrap());

        assert!(backend.delete("tickets:detail:1").await.unwrap());
        assert!(!backend.delete("tickets:detail:1").await.unwrap());
        assert_eq!(backend.info().await.unwrap().memory_used_bytes, 0);
    }

    #[tokio::test]
    async fn test_replacing_adjusts_size() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(60);

        backend.set("k", Bytes::from("short"), ttl).await.unwrap();
        backend.set("k", Bytes::from("much longer data here"), ttl).await.unwrap();

        let info = backend.info().await.unwrap();
        assert_eq!(info.memory_used_bytes, 21);
        assert_eq!(info.key_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let backend = MemoryBackend::new();
        backend.set("k", Bytes::from("v"), Duration::from_secs(30)).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(backend.ttl_remaining("k").await.unwrap(), Some(Duration::from_secs(20)));
        assert!(backend.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(21)).await;
        assert!(backend.get("k").await.unwrap().is_none());
        assert_eq!(backend.info().await.unwrap().key_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let backend = MemoryBackend::new();
        backend.set("a", Bytes::from("1"), Duration::from_secs(5)).await.unwrap();
        backend.set("b", Bytes::from("2"), Duration::from_secs(5)).await.unwrap();
        backend.set("c", Bytes::from("3"), Duration::from_secs(500)).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(backend.purge_expired().await.unwrap(), 2);

        let info = backend.info().await.unwrap();
        assert_eq!(info.key_count, 1);
        assert_eq!(info.memory_used_bytes, 1);
    }

    #[tokio::test]
    async fn test_keys_matching() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(60);
        for key in ["tickets:1", "tickets:2", "search:abc"] {
            backend.set(key, Bytes::from("x"), ttl).await.unwrap();
        }

        let mut keys = backend.keys_matching("tickets:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["tickets:1", "tickets:2"]);
        assert_matches!(
            backend.keys_matching("tickets:[").await,
            Err(Error::InvalidPattern { .. })
        );
    }

    #[tokio::test]
    async fn test_capacity_rejects_oversized_write() {
        let backend = MemoryBackend::with_config(MemoryBackendConfig {
            capacity_bytes: 10,
            shard_count: 0,
        });
        let ttl = Duration::from_secs(60);

        backend.set("a", Bytes::from("0123456789"), ttl).await.unwrap();
        assert_matches!(
            backend.set("b", Bytes::from("x"), ttl).await,
            Err(Error::BackendOperationFailed { .. })
        );
        // Replacing an existing key within capacity is allowed
        backend.set("a", Bytes::from("abc"), ttl).await.unwrap();
        assert_eq!(backend.info().await.unwrap().memory_used_bytes, 3);
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_rejected() {
        let backend = MemoryBackend::new();
        assert_matches!(
            backend.set("k", Bytes::from("v"), Duration::MAX).await,
            Err(Error::BackendOperationFailed { .. })
        );
        assert!(!backend.contains("k").await.unwrap());
        assert_eq!(backend.info().await.unwrap().memory_used_bytes, 0);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let backend = MemoryBackend::new();
        backend.set_available(false);

        assert_matches!(backend.get("k").await, Err(Error::BackendUnavailable { .. }));
        assert!(!backend.health_check().await.unwrap());

        backend.set_available(true);
        assert!(backend.get("k").await.unwrap().is_none());
        let info = backend.info().await.unwrap();
        assert_eq!(info.miss_count, 1);
        assert!(info.available);
    }
}
