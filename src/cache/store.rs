//! Tiered Cache Store
//!
//! Read-through cache over a fast and a slow backend.
//!
//! Reads walk [`CacheTier::lookup_order`]; a slow tier hit is copied into the
//! fast tier with a capped TTL. Misses run the caller's producer and write
//! the result in [`CacheTier::write_order`]. Nothing that goes wrong inside
//! the cache (unreachable tiers, corrupted payloads, values that cannot be
//! encoded) is surfaced to the caller; only producer failures are.

use crate::cache::backend::{compile_pattern, BackendInfo, CacheBackendRef};
use crate::cache::entry::CacheKey;
use crate::cache::events::{CacheEvent, EvictionReason};
use crate::cache::index::TagIndex;
use crate::cache::metrics::CacheMetrics;
use crate::cache::tier::{CacheTier, DEFAULT_FAST_TTL_CEILING};
use crate::config::CacheConfig;
use crate::error::{Error, FailureAction, Result};
use bytes::Bytes;
use dashmap::DashMap;
use indexmap::IndexSet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Runtime settings of the store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Upper bound on fast tier TTLs
    pub fast_ttl_ceiling: Duration,
    /// Coalesce concurrent misses on the same key
    pub single_flight: bool,
    /// Abort producers that run longer than this
    pub producer_timeout: Option<Duration>,
    /// Event channel capacity
    pub event_channel_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            fast_ttl_ceiling: DEFAULT_FAST_TTL_CEILING,
            single_flight: true,
            producer_timeout: None,
            event_channel_capacity: 1024,
        }
    }
}

impl From<&CacheConfig> for StoreConfig {
    fn from(config: &CacheConfig) -> Self {
        Self {
            fast_ttl_ceiling: config.fast_ttl_ceiling(),
            single_flight: config.single_flight,
            producer_timeout: config.producer_timeout(),
            event_channel_capacity: config.event_channel_capacity,
        }
    }
}

// =============================================================================
// Cache Request
// =============================================================================

/// What to cache and how
#[derive(Debug, Clone)]
pub struct CacheRequest {
    /// Storage key
    pub key: String,
    /// Requested (slow tier) TTL; zero disables caching
    pub ttl: Duration,
    /// Tags for group invalidation
    pub tags: Vec<String>,
    /// Metrics category; defaults to the key namespace
    pub category: Option<String>,
}

impl CacheRequest {
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            ttl,
            tags: Vec::new(),
            category: None,
        }
    }

    /// Add a tag
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Add several tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Override the metrics category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Effective metrics category
    pub fn category(&self) -> String {
        match &self.category {
            Some(category) => category.clone(),
            None => CacheKey::from_storage_key(&self.key).category().to_string(),
        }
    }
}

/// Reachability of both tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierHealth {
    pub fast: bool,
    pub slow: bool,
}

impl TierHealth {
    pub fn all_healthy(&self) -> bool {
        self.fast && self.slow
    }
}

// =============================================================================
// Single-Flight Guard
// =============================================================================

/// Per-key computation slot, released from the map when the last holder
/// leaves
struct Flight<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
    lock: Arc<Mutex<()>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        // One reference in the map plus ours means nobody else is waiting
        self.map
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

// =============================================================================
// Tiered Cache Store
// =============================================================================

/// Two-tier read-through cache
pub struct TieredCacheStore {
    fast: CacheBackendRef,
    slow: CacheBackendRef,
    index: TagIndex,
    metrics: CacheMetrics,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    config: StoreConfig,
    event_tx: broadcast::Sender<CacheEvent>,
}

impl TieredCacheStore {
    /// Create a store with default settings
    pub fn new(fast: CacheBackendRef, slow: CacheBackendRef) -> Self {
        Self::with_config(fast, slow, StoreConfig::default())
    }

    /// Create a store with custom settings
    pub fn with_config(fast: CacheBackendRef, slow: CacheBackendRef, config: StoreConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity.max(1));
        info!(
            fast = fast.name(),
            slow = slow.name(),
            fast_ttl_ceiling_secs = config.fast_ttl_ceiling.as_secs(),
            single_flight = config.single_flight,
            "Tiered cache store initialized"
        );
        Self {
            fast,
            slow,
            index: TagIndex::new(),
            metrics: CacheMetrics::new(),
            in_flight: DashMap::new(),
            config,
            event_tx,
        }
    }

    /// Subscribe to cache events
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit_event(&self, event: CacheEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Store metrics
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Tag index
    pub fn index(&self) -> &TagIndex {
        &self.index
    }

    /// Store settings
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Backend serving a tier
    pub fn backend(&self, tier: CacheTier) -> &CacheBackendRef {
        match tier {
            CacheTier::Fast => &self.fast,
            CacheTier::Slow => &self.slow,
        }
    }

    // =========================================================================
    // Read-Through
    // =========================================================================

    /// Return the cached value for `key`, computing and caching it on a miss
    pub async fn get_or_compute<V, F, Fut>(&self, key: &str, ttl: Duration, producer: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        self.get_or_compute_with(CacheRequest::new(key, ttl), producer)
            .await
    }

    /// Like [`TieredCacheStore::get_or_compute`], with tags and a category
    pub async fn get_or_compute_with<V, F, Fut>(&self, request: CacheRequest, producer: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let category = request.category();

        if request.ttl.is_zero() {
            debug!(key = %request.key, "Zero TTL, bypassing cache");
            self.metrics.record_miss(&category);
            return self.run_producer(&request.key, producer).await;
        }

        if let Some(value) = self.lookup::<V>(&request.key, Some(request.ttl), true).await {
            self.metrics.record_hit(&category);
            return Ok(value);
        }

        if !self.config.single_flight {
            return self.compute(&request, &category, producer).await;
        }

        let flight = self.flight(&request.key);
        let _permit = flight.lock.lock().await;

        // Another caller may have filled the entry while we waited. Tier
        // misses were already counted by the first lookup.
        if let Some(value) = self.lookup::<V>(&request.key, Some(request.ttl), false).await {
            self.metrics.record_hit(&category);
            self.metrics.record_coalesced();
            debug!(key = %request.key, "Served by in-flight computation");
            return Ok(value);
        }

        self.compute(&request, &category, producer).await
    }

    fn flight<'a>(&'a self, key: &'a str) -> Flight<'a> {
        let lock = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Flight {
            map: &self.in_flight,
            key,
            lock,
        }
    }

    /// Number of keys with a computation in progress
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    async fn compute<V, F, Fut>(&self, request: &CacheRequest, category: &str, producer: F) -> Result<V>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        self.metrics.record_miss(category);
        self.emit_event(CacheEvent::miss(&request.key));

        let value = self.run_producer(&request.key, producer).await?;

        match serde_json::to_vec(&value) {
            Ok(encoded) => {
                self.write_tiers(&request.key, Bytes::from(encoded), request.ttl, &request.tags)
                    .await;
            }
            Err(e) => {
                warn!(key = %request.key, error = %e, "Value cannot be encoded, returning it uncached");
            }
        }

        Ok(value)
    }

    async fn run_producer<V, F, Fut>(&self, key: &str, producer: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        self.metrics.record_producer_call();

        let outcome = match self.config.producer_timeout {
            Some(limit) => match tokio::time::timeout(limit, producer()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.metrics.record_producer_failure();
                    warn!(key = %key, timeout_ms = limit.as_millis() as u64, "Producer timed out");
                    self.emit_event(CacheEvent::ProducerFailed {
                        key: key.to_string(),
                        error: "timeout".to_string(),
                    });
                    return Err(Error::ProducerTimeout {
                        key: key.to_string(),
                        timeout: limit,
                    });
                }
            },
            None => producer().await,
        };

        outcome.map_err(|e| {
            self.metrics.record_producer_failure();
            warn!(key = %key, error = %e, "Producer failed");
            self.emit_event(CacheEvent::ProducerFailed {
                key: key.to_string(),
                error: e.to_string(),
            });
            Error::producer(key, e)
        })
    }

    /// Walk the tiers and decode the first usable payload
    ///
    /// `ttl` bounds the fast tier backfill; without it the remaining slow
    /// tier lifetime is used. `count_misses` is false when repeating a lookup
    /// for the same request.
    async fn lookup<V: DeserializeOwned>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        count_misses: bool,
    ) -> Option<V> {
        for &tier in CacheTier::lookup_order() {
            let Some(bytes) = self.read_tier(tier, key, count_misses).await else {
                continue;
            };

            match serde_json::from_slice::<V>(&bytes) {
                Ok(value) => {
                    self.emit_event(CacheEvent::hit(key, tier));
                    debug!(key = %key, tier = %tier, "Cache hit");
                    if tier == CacheTier::Slow {
                        self.backfill(key, bytes, ttl).await;
                    }
                    return Some(value);
                }
                Err(e) => {
                    warn!(key = %key, tier = %tier, error = %e, "Corrupted cache entry, evicting");
                    self.emit_event(CacheEvent::CorruptedEntry {
                        key: key.to_string(),
                        tier,
                        error: e.to_string(),
                    });
                    self.emit_event(CacheEvent::evict(key, EvictionReason::Corrupted));
                    let _ = self.backend(tier).delete(key).await;
                }
            }
        }
        None
    }

    async fn read_tier(&self, tier: CacheTier, key: &str, count_misses: bool) -> Option<Bytes> {
        let metrics = self.metrics.tier(tier);
        match self.backend(tier).get(key).await {
            Ok(Some(bytes)) => {
                metrics.record_hit();
                Some(bytes)
            }
            Ok(None) => {
                if count_misses {
                    metrics.record_miss();
                }
                None
            }
            Err(e) if e.action() == FailureAction::TreatAsMiss => {
                if count_misses {
                    metrics.record_miss();
                }
                warn!(key = %key, tier = %tier, error = %e, "Unreadable cache entry, evicting");
                self.emit_event(CacheEvent::CorruptedEntry {
                    key: key.to_string(),
                    tier,
                    error: e.to_string(),
                });
                let _ = self.backend(tier).delete(key).await;
                None
            }
            Err(e) => {
                metrics.record_error();
                self.report_tier_failure(tier, key, "get", &e);
                None
            }
        }
    }

    fn report_tier_failure(&self, tier: CacheTier, key: &str, operation: &str, e: &Error) {
        if tier.is_best_effort() {
            warn!(key = %key, tier = %tier, operation, error = %e, "Fast tier unavailable, degrading");
        } else {
            error!(key = %key, tier = %tier, operation, error = %e, "Slow tier failure, bypassing cache");
        }
        self.emit_event(CacheEvent::TierUnavailable {
            tier,
            reason: e.to_string(),
        });
    }

    async fn backfill(&self, key: &str, bytes: Bytes, ttl: Option<Duration>) {
        let remaining = self.slow.ttl_remaining(key).await.ok().flatten();
        let mut fast_ttl = self.config.fast_ttl_ceiling;
        if let Some(ttl) = ttl {
            fast_ttl = fast_ttl.min(ttl);
        }
        if let Some(remaining) = remaining {
            fast_ttl = fast_ttl.min(remaining);
        }
        if fast_ttl.is_zero() {
            return;
        }

        match self.fast.set(key, bytes, fast_ttl).await {
            Ok(()) => {
                self.metrics.tier(CacheTier::Fast).record_write();
                self.emit_event(CacheEvent::Backfill {
                    key: key.to_string(),
                    ttl_secs: fast_ttl.as_secs(),
                });
                debug!(key = %key, ttl_secs = fast_ttl.as_secs(), "Backfilled fast tier");
            }
            Err(e) => {
                self.metrics.tier(CacheTier::Fast).record_error();
                self.report_tier_failure(CacheTier::Fast, key, "backfill", &e);
            }
        }
    }

    /// Write a payload to every tier, returning whether any write landed
    async fn write_tiers(&self, key: &str, bytes: Bytes, ttl: Duration, tags: &[String]) -> bool {
        let mut stored = false;
        for &tier in CacheTier::write_order() {
            let tier_ttl = tier.effective_ttl(ttl, self.config.fast_ttl_ceiling);
            let size = bytes.len() as u64;
            match self.backend(tier).set(key, bytes.clone(), tier_ttl).await {
                Ok(()) => {
                    stored = true;
                    self.metrics.tier(tier).record_write();
                    self.emit_event(CacheEvent::put(key, tier, size, tier_ttl.as_secs()));
                    debug!(key = %key, tier = %tier, ttl_secs = tier_ttl.as_secs(), "Stored cache entry");
                }
                Err(e) => {
                    self.metrics.tier(tier).record_error();
                    self.report_tier_failure(tier, key, "set", &e);
                }
            }
        }

        if stored {
            self.index.detach(key);
            self.index.attach(key, tags);
        }
        stored
    }

    // =========================================================================
    // Direct Access
    // =========================================================================

    /// Look up a value without computing it
    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        let value = self.lookup::<V>(key, None, true).await;
        let category = CacheKey::from_storage_key(key);
        match value {
            Some(_) => self.metrics.record_hit(category.category()),
            None => self.metrics.record_miss(category.category()),
        }
        value
    }

    /// Store a value in both tiers
    pub async fn put<V: Serialize + ?Sized>(&self, request: &CacheRequest, value: &V) -> Result<bool> {
        if request.ttl.is_zero() {
            return Ok(false);
        }
        let encoded = serde_json::to_vec(value)
            .map_err(|e| Error::Serialization(format!("cannot encode value for {}: {e}", request.key)))?;
        Ok(self
            .write_tiers(&request.key, Bytes::from(encoded), request.ttl, &request.tags)
            .await)
    }

    /// Check if either tier holds `key`
    pub async fn contains(&self, key: &str) -> bool {
        for &tier in CacheTier::lookup_order() {
            match self.backend(tier).contains(key).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => self.report_tier_failure(tier, key, "contains", &e),
            }
        }
        false
    }

    /// Delete `key` from both tiers and the tag index
    ///
    /// Returns whether any tier held the key. Fails only when no tier could
    /// be reached. The key keeps its tags until every tier has dropped it,
    /// so a later tag invalidation can retry.
    pub async fn remove(&self, key: &str, reason: EvictionReason) -> Result<bool> {
        let mut existed = false;
        let mut last_error = None;
        let mut reached = 0;
        for &tier in CacheTier::write_order() {
            match self.backend(tier).delete(key).await {
                Ok(deleted) => {
                    reached += 1;
                    existed |= deleted;
                }
                Err(e) => {
                    self.metrics.tier(tier).record_error();
                    self.report_tier_failure(tier, key, "delete", &e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            None => self.index.detach(key),
            Some(e) if reached == 0 => return Err(e),
            Some(_) => {}
        }
        if existed {
            self.emit_event(CacheEvent::evict(key, reason));
        }
        Ok(existed)
    }

    /// Live keys in either tier matching a glob pattern
    pub async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        compile_pattern(pattern)?;

        let mut keys = IndexSet::new();
        let mut last_error = None;
        let mut reached = 0;
        for &tier in CacheTier::lookup_order() {
            match self.backend(tier).keys_matching(pattern).await {
                Ok(found) => {
                    reached += 1;
                    keys.extend(found);
                }
                Err(e) => {
                    self.metrics.tier(tier).record_error();
                    self.report_tier_failure(tier, pattern, "keys", &e);
                    last_error = Some(e);
                }
            }
        }

        match (reached, last_error) {
            (0, Some(e)) => Err(e),
            _ => Ok(keys.into_iter().collect()),
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Drop expired entries from both tiers
    pub async fn purge_expired(&self) -> u64 {
        let mut removed = 0;
        for &tier in CacheTier::lookup_order() {
            match self.backend(tier).purge_expired().await {
                Ok(n) => removed += n,
                Err(e) => {
                    warn!(tier = %tier, error = %e, "Expired entry purge failed");
                }
            }
        }
        removed
    }

    /// Drop index members whose entries no longer exist in any tier
    ///
    /// Keys are kept when a tier cannot be asked.
    pub async fn prune_index(&self) -> usize {
        let mut pruned = 0;
        for key in self.index.keys() {
            let mut live = false;
            for &tier in CacheTier::lookup_order() {
                match self.backend(tier).contains(&key).await {
                    Ok(true) | Err(_) => {
                        live = true;
                        break;
                    }
                    Ok(false) => {}
                }
            }
            if !live {
                self.index.detach(&key);
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(pruned, "Pruned stale tag index members");
        }
        pruned
    }

    /// Empty both tiers and the tag index
    pub async fn flush_all(&self) -> Result<()> {
        warn!("Flushing all cache tiers");

        let mut failure = None;
        for &tier in CacheTier::write_order() {
            if let Err(e) = self.backend(tier).clear().await {
                self.metrics.tier(tier).record_error();
                error!(tier = %tier, error = %e, "Failed to clear tier");
                failure = Some(e);
            }
        }
        self.index.clear();
        self.emit_event(CacheEvent::Flushed);

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reachability of both tiers
    pub async fn health_check(&self) -> TierHealth {
        TierHealth {
            fast: self.fast.health_check().await.unwrap_or(false),
            slow: self.slow.health_check().await.unwrap_or(false),
        }
    }

    /// Usage figures of both backends
    pub async fn backend_info(&self) -> Vec<BackendInfo> {
        let mut infos = Vec::with_capacity(2);
        for &tier in CacheTier::lookup_order() {
            let backend = self.backend(tier);
            let info = backend.info().await.unwrap_or_else(|e| {
                warn!(tier = %tier, error = %e, "Backend info unavailable");
                BackendInfo {
                    name: backend.name().to_string(),
                    available: false,
                    ..Default::default()
                }
            });
            infos.push(info);
        }
        infos
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::backend::{CacheBackend, MemoryBackend, PersistentBackend};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Ticket {
        pub id: u64,
        pub price: u64,
    }

    pub struct Harness {
        pub store: Arc<TieredCacheStore>,
        pub fast: Arc<MemoryBackend>,
        pub slow: Arc<PersistentBackend>,
    }

    pub fn harness_with(config: StoreConfig) -> Harness {
        let fast = Arc::new(MemoryBackend::new());
        let slow = Arc::new(PersistentBackend::new());
        let store = Arc::new(TieredCacheStore::with_config(
            fast.clone(),
            slow.clone(),
            config,
        ));
        Harness { store, fast, slow }
    }

    pub fn harness() -> Harness {
        harness_with(StoreConfig::default())
    }

    const TTL: Duration = Duration::from_secs(600);

    #[tokio::test]
    async fn test_read_through_calls_producer_once() {
        let h = harness();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Ticket = h
                .store
                .get_or_compute("ticket:42", TTL, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Ticket { id: 42, price: 100 })
                })
                .await
                .unwrap();
            assert_eq!(value, Ticket { id: 42, price: 100 });
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.metrics().hit_rate(Some("ticket")), 2.0 / 3.0);
    }

    #[tokio::test]
    async fn test_miss_writes_both_tiers_with_capped_fast_ttl() {
        let h = harness();
        let ttl = Duration::from_secs(3600);

        let _: Ticket = h
            .store
            .get_or_compute("tickets:detail:1", ttl, || async { Ok(Ticket { id: 1, price: 5 }) })
            .await
            .unwrap();

        let fast_ttl = h.fast.ttl_remaining("tickets:detail:1").await.unwrap().unwrap();
        let slow_ttl = h.slow.ttl_remaining("tickets:detail:1").await.unwrap().unwrap();
        assert!(fast_ttl <= DEFAULT_FAST_TTL_CEILING);
        assert!(slow_ttl > DEFAULT_FAST_TTL_CEILING);
    }

    #[tokio::test]
    async fn test_slow_hit_backfills_fast_tier() {
        let h = harness();
        let payload = serde_json::to_vec(&Ticket { id: 7, price: 70 }).unwrap();
        h.slow
            .set("tickets:detail:7", Bytes::from(payload), Duration::from_secs(3600))
            .await
            .unwrap();

        let value: Ticket = h
            .store
            .get_or_compute("tickets:detail:7", Duration::from_secs(3600), || async {
                anyhow::bail!("producer must not run on a slow tier hit")
            })
            .await
            .unwrap();
        assert_eq!(value.id, 7);

        let backfilled = h.fast.ttl_remaining("tickets:detail:7").await.unwrap().unwrap();
        assert!(backfilled <= DEFAULT_FAST_TTL_CEILING);
        assert_eq!(h.store.metrics().snapshot().slow.hits, 1);
    }

    #[tokio::test]
    async fn test_fast_tier_failure_degrades() {
        let h = harness();
        h.fast.set_available(false);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Ticket = h
                .store
                .get_or_compute("ticket:9", TTL, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Ticket { id: 9, price: 90 })
                })
                .await
                .unwrap();
            assert_eq!(value.price, 90);
        }

        // Second call was served by the slow tier
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(h.store.metrics().snapshot().fast.errors > 0);
    }

    #[tokio::test]
    async fn test_slow_tier_failure_falls_through_to_producer() {
        let h = harness();
        h.fast.set_available(false);
        h.slow.set_available(false);
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Ticket = h
                .store
                .get_or_compute("ticket:3", TTL, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Ticket { id: 3, price: 30 })
                })
                .await
                .unwrap();
            assert_eq!(value.id, 3);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!h.store.health_check().await.all_healthy());
    }

    #[tokio::test]
    async fn test_producer_error_propagates_and_is_not_cached() {
        let h = harness();

        let result: Result<Ticket> = h
            .store
            .get_or_compute("ticket:1", TTL, || async { anyhow::bail!("database offline") })
            .await;
        assert_matches!(result, Err(Error::Producer { ref key, .. }) if key == "ticket:1");
        assert!(!h.store.contains("ticket:1").await);
        assert_eq!(h.store.metrics().snapshot().producer_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_producer_timeout() {
        let h = harness_with(StoreConfig {
            producer_timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        });

        let result: Result<Ticket> = h
            .store
            .get_or_compute("ticket:slow", TTL, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Ticket { id: 0, price: 0 })
            })
            .await;
        assert_matches!(result, Err(Error::ProducerTimeout { .. }));
    }

    #[tokio::test]
    async fn test_corrupted_entry_is_recomputed() {
        let h = harness();
        h.fast
            .set("ticket:5", Bytes::from_static(b"not json"), TTL)
            .await
            .unwrap();

        let value: Ticket = h
            .store
            .get_or_compute("ticket:5", TTL, || async { Ok(Ticket { id: 5, price: 50 }) })
            .await
            .unwrap();
        assert_eq!(value.id, 5);

        let stored = h.fast.get("ticket:5").await.unwrap().unwrap();
        assert_eq!(serde_json::from_slice::<Ticket>(&stored).unwrap(), value);
    }

    #[tokio::test]
    async fn test_zero_ttl_is_not_cached() {
        let h = harness();
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let _: u32 = h
                .store
                .get_or_compute("ticket:live", Duration::ZERO, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!h.store.contains("ticket:live").await);
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_degrades() {
        let h = harness();
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let value: Ticket = h
                .store
                .get_or_compute("tickets:x", Duration::from_secs(9_000_000_000_000), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Ticket { id: 1, price: 10 })
                })
                .await
                .unwrap();
            assert_eq!(value.id, 1);
        }

        // Slow tier refuses the write, the fast tier keeps it under the ceiling
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!h.slow.contains("tickets:x").await.unwrap());
        assert!(h.fast.contains("tickets:x").await.unwrap());
        assert!(h.store.metrics().snapshot().slow.errors > 0);
    }

    #[tokio::test]
    async fn test_single_flight_miss_counts_each_tier_once() {
        let h = harness();
        let _: u32 = h
            .store
            .get_or_compute("tickets:count", TTL, || async { Ok(1) })
            .await
            .unwrap();

        let snapshot = h.store.metrics().snapshot();
        assert_eq!(snapshot.fast.misses, 1);
        assert_eq!(snapshot.slow.misses, 1);
    }

    #[derive(Debug, PartialEq, Deserialize)]
    struct Opaque(u8);

    impl Serialize for Opaque {
        fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("opaque handle"))
        }
    }

    #[tokio::test]
    async fn test_unencodable_value_is_returned_uncached() {
        let h = harness();
        let value = h
            .store
            .get_or_compute("handle:1", TTL, || async { Ok(Opaque(1)) })
            .await
            .unwrap();
        assert_eq!(value, Opaque(1));
        assert!(!h.store.contains("handle:1").await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_coalesces_concurrent_misses() {
        let h = harness();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let store = h.store.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .get_or_compute::<Ticket, _, _>("tickets:high_demand", TTL, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Ticket { id: 1, price: 1 })
                    })
                    .await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().id, 1);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn test_tags_are_indexed_and_replaced() {
        let h = harness();
        let first = CacheRequest::new("search:abc", TTL).with_tags(["search", "platform:stubhub"]);
        h.store.put(&first, &vec![1, 2]).await.unwrap();
        assert_eq!(h.store.index().keys_for(&["platform:stubhub"]), vec!["search:abc"]);

        let second = CacheRequest::new("search:abc", TTL).tag("search");
        h.store.put(&second, &vec![3]).await.unwrap();
        assert!(h.store.index().keys_for(&["platform:stubhub"]).is_empty());
        assert_eq!(h.store.get::<Vec<u32>>("search:abc").await, Some(vec![3]));
    }

    #[tokio::test]
    async fn test_remove_and_keys_matching() {
        let h = harness();
        for id in 1..=3 {
            h.store
                .put(&CacheRequest::new(format!("tickets:detail:{id}"), TTL), &id)
                .await
                .unwrap();
        }

        let mut keys = h.store.keys_matching("tickets:detail:*").await.unwrap();
        keys.sort();
        assert_eq!(keys.len(), 3);

        assert!(h.store.remove("tickets:detail:1", EvictionReason::Manual).await.unwrap());
        assert!(!h.store.remove("tickets:detail:1", EvictionReason::Manual).await.unwrap());
        assert_eq!(h.store.keys_matching("tickets:detail:*").await.unwrap().len(), 2);
        assert_matches!(
            h.store.keys_matching("tickets:[").await,
            Err(Error::InvalidPattern { .. })
        );
    }

    #[tokio::test]
    async fn test_remove_keeps_tags_until_every_tier_drops_the_key() {
        let h = harness();
        h.store
            .put(&CacheRequest::new("tickets:1", TTL).tag("tickets"), &1)
            .await
            .unwrap();

        h.fast.set_available(false);
        assert!(h.store.remove("tickets:1", EvictionReason::Tag).await.unwrap());
        assert_eq!(h.store.index().keys_for(&["tickets"]), vec!["tickets:1"]);

        h.fast.set_available(true);
        assert!(h.store.remove("tickets:1", EvictionReason::Tag).await.unwrap());
        assert!(h.store.index().keys_for(&["tickets"]).is_empty());
        assert!(!h.store.contains("tickets:1").await);
    }

    #[tokio::test]
    async fn test_prune_index_drops_vanished_keys() {
        let h = harness();
        let request = CacheRequest::new("users:tickets:1", TTL).tag("users");
        h.store.put(&request, &"data").await.unwrap();

        // Entry disappears behind the store's back
        h.fast.delete("users:tickets:1").await.unwrap();
        h.slow.delete("users:tickets:1").await.unwrap();

        assert_eq!(h.store.prune_index().await, 1);
        assert!(h.store.index().keys_for(&["users"]).is_empty());
    }

    #[tokio::test]
    async fn test_flush_all() {
        let h = harness();
        h.store
            .put(&CacheRequest::new("a:1", TTL).tag("a"), &1)
            .await
            .unwrap();
        let mut events = h.store.subscribe();

        h.store.flush_all().await.unwrap();
        assert!(!h.store.contains("a:1").await);
        assert_eq!(h.store.index().key_count(), 0);
        assert_eq!(events.recv().await.unwrap(), CacheEvent::Flushed);
    }

    // -------------------------------------------------------------------------
    // Tier ordering
    // -------------------------------------------------------------------------

    struct RecordingBackend {
        label: &'static str,
        inner: MemoryBackend,
        log: Arc<SyncMutex<Vec<String>>>,
    }

    #[async_trait]
    impl CacheBackend for RecordingBackend {
        fn name(&self) -> &str {
            self.label
        }
        async fn get(&self, key: &str) -> Result<Option<Bytes>> {
            self.log.lock().push(format!("{}:get", self.label));
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()> {
            self.log.lock().push(format!("{}:set", self.label));
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<bool> {
            self.inner.delete(key).await
        }
        async fn contains(&self, key: &str) -> Result<bool> {
            self.inner.contains(key).await
        }
        async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>> {
            self.inner.ttl_remaining(key).await
        }
        async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
            self.inner.keys_matching(pattern).await
        }
        async fn info(&self) -> Result<BackendInfo> {
            self.inner.info().await
        }
        async fn clear(&self) -> Result<()> {
            self.inner.clear().await
        }
        async fn purge_expired(&self) -> Result<u64> {
            self.inner.purge_expired().await
        }
        async fn health_check(&self) -> Result<bool> {
            self.inner.health_check().await
        }
    }

    #[tokio::test]
    async fn test_tier_order_is_fast_then_slow() {
        let log = Arc::new(SyncMutex::new(Vec::new()));
        let fast = Arc::new(RecordingBackend {
            label: "fast",
            inner: MemoryBackend::new(),
            log: log.clone(),
        });
        let slow = Arc::new(RecordingBackend {
            label: "slow",
            inner: MemoryBackend::new(),
            log: log.clone(),
        });
        let store = TieredCacheStore::new(fast, slow);

        let _: u32 = store
            .get_or_compute("k", TTL, || async { Ok(1) })
            .await
            .unwrap();

        // Lookup, single-flight re-check, then writes
        assert_eq!(
            *log.lock(),
            vec!["fast:get", "slow:get", "fast:get", "slow:get", "fast:set", "slow:set"]
        );
    }
}
