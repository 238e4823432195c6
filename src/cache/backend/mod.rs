//! Cache Backends
//!
//! Key-value stores behind each tier. Every backend supports TTL writes and
//! glob-style key enumeration so bulk invalidation can resolve patterns.

mod memory;
mod persistent;

pub use memory::{MemoryBackend, MemoryBackendConfig};
pub use persistent::{PersistentBackend, PersistentBackendConfig};

use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Backend Info
// =============================================================================

/// Introspection data reported by a backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendInfo {
    /// Backend name
    pub name: String,
    /// Bytes held by live entries
    pub memory_used_bytes: u64,
    /// Configured capacity in bytes
    pub capacity_bytes: u64,
    /// Number of stored keys (may include expired, not yet purged)
    pub key_count: u64,
    /// Successful lookups
    pub hit_count: u64,
    /// Lookups that found nothing
    pub miss_count: u64,
    /// Whether the backend currently accepts requests
    pub available: bool,
}

// =============================================================================
// CacheBackend Trait
// =============================================================================

/// Key-value store with TTL and pattern enumeration
///
/// Implementations own the bytes and enforce expiry; an expired key must
/// never be returned by `get`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend name for logs and metrics
    fn name(&self) -> &str;

    /// Get the payload stored under `key`
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a payload for `ttl`
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Delete a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check if a live entry exists
    async fn contains(&self, key: &str) -> Result<bool>;

    /// Remaining lifetime of a live entry
    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>>;

    /// Enumerate live keys matching a glob pattern (`*`, `?`, `[...]`)
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>>;

    /// Report usage figures
    async fn info(&self) -> Result<BackendInfo>;

    /// Remove all entries
    async fn clear(&self) -> Result<()>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<u64>;

    /// Check if the backend is reachable
    async fn health_check(&self) -> Result<bool>;
}

/// Shared backend handle
pub type CacheBackendRef = Arc<dyn CacheBackend>;

/// Compile a key pattern
pub fn compile_pattern(pattern: &str) -> Result<glob::Pattern> {
    glob::Pattern::new(pattern).map_err(|e| Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.msg.to_string(),
    })
}
