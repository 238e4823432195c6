//! Cache Metrics
//!
//! Lock-free hit/miss accounting per tier and per category, with JSON and
//! Prometheus exposition. Recording never fails and never blocks a caller.

use crate::cache::backend::BackendInfo;
use crate::cache::tier::CacheTier;
use crate::error::{Error, Result};
use chrono::Utc;
use dashmap::DashMap;
use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size for alignment (64 bytes on most modern CPUs)
pub const CACHE_LINE_SIZE: usize = 64;

// =============================================================================
// Per-Tier Metrics (Cache-Line Aligned)
// =============================================================================

/// Counters for a single tier, aligned to prevent false sharing
#[repr(C, align(64))]
#[derive(Debug)]
pub struct TierMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub writes: AtomicU64,
    pub errors: AtomicU64,
    /// Last update timestamp (Unix millis)
    pub last_update_ms: AtomicU64,
    _padding: [u8; 24],
}

const _: () = assert!(std::mem::size_of::<TierMetrics>() <= CACHE_LINE_SIZE);

impl Default for TierMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TierMetrics {
    /// Create new zeroed metrics
    pub fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_update_ms: AtomicU64::new(0),
            _padding: [0; 24],
        }
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    #[inline]
    fn touch(&self) {
        self.last_update_ms
            .store(Utc::now().timestamp_millis() as u64, Ordering::Release);
    }

    /// Create a snapshot of current metrics
    pub fn snapshot(&self) -> TierMetricsSnapshot {
        TierMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of tier metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

impl TierMetricsSnapshot {
    /// Operations attempted against the tier
    pub fn operations(&self) -> u64 {
        self.hits + self.misses + self.writes
    }

    /// Share of operations that failed (0.0 to 1.0)
    pub fn error_rate(&self) -> f64 {
        let total = self.operations() + self.errors;
        if total == 0 {
            0.0
        } else {
            self.errors as f64 / total as f64
        }
    }
}

// =============================================================================
// Per-Category Counters
// =============================================================================

#[derive(Debug, Default)]
struct CategoryCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Hit/miss totals for one category
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategorySnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

// =============================================================================
// Cache Metrics
// =============================================================================

/// Metrics collected by the store
#[derive(Debug, Default)]
pub struct CacheMetrics {
    fast: TierMetrics,
    slow: TierMetrics,
    categories: DashMap<String, CategoryCounters>,
    producer_calls: AtomicU64,
    producer_failures: AtomicU64,
    coalesced: AtomicU64,
    invalidated_keys: AtomicU64,
}

impl CacheMetrics {
    /// Create new metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Get metrics for a specific tier
    pub fn tier(&self, tier: CacheTier) -> &TierMetrics {
        match tier {
            CacheTier::Fast => &self.fast,
            CacheTier::Slow => &self.slow,
        }
    }

    /// Record a served request for a category
    pub fn record_hit(&self, category: &str) {
        self.counters(category, |c| c.hits.fetch_add(1, Ordering::Relaxed));
    }

    /// Record a request that needed the producer
    pub fn record_miss(&self, category: &str) {
        self.counters(category, |c| c.misses.fetch_add(1, Ordering::Relaxed));
    }

    fn counters(&self, category: &str, f: impl FnOnce(&CategoryCounters) -> u64) {
        if let Some(counters) = self.categories.get(category) {
            f(&counters);
            return;
        }
        let counters = self.categories.entry(category.to_string()).or_default();
        f(&counters);
    }

    /// Hit rate in [0, 1] for one category, or across all when `None`
    pub fn hit_rate(&self, category: Option<&str>) -> f64 {
        match category {
            Some(name) => self
                .categories
                .get(name)
                .map(|c| ratio(c.hits.load(Ordering::Relaxed), c.misses.load(Ordering::Relaxed)))
                .unwrap_or(0.0),
            None => {
                let (hits, misses) = self.categories.iter().fold((0, 0), |(h, m), c| {
                    (
                        h + c.hits.load(Ordering::Relaxed),
                        m + c.misses.load(Ordering::Relaxed),
                    )
                });
                ratio(hits, misses)
            }
        }
    }

    pub fn record_producer_call(&self) {
        self.producer_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_producer_failure(&self) {
        self.producer_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a caller served by another caller's in-flight computation
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidated(&self, keys: u64) {
        self.invalidated_keys.fetch_add(keys, Ordering::Relaxed);
    }

    /// Number of producer invocations so far
    pub fn producer_calls(&self) -> u64 {
        self.producer_calls.load(Ordering::Relaxed)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let categories: BTreeMap<String, CategorySnapshot> = self
            .categories
            .iter()
            .map(|c| {
                let hits = c.hits.load(Ordering::Relaxed);
                let misses = c.misses.load(Ordering::Relaxed);
                (
                    c.key().clone(),
                    CategorySnapshot {
                        hits,
                        misses,
                        hit_rate: ratio(hits, misses),
                    },
                )
            })
            .collect();

        let (hits, misses) = categories
            .values()
            .fold((0, 0), |(h, m), c| (h + c.hits, m + c.misses));

        MetricsSnapshot {
            fast: self.fast.snapshot(),
            slow: self.slow.snapshot(),
            categories,
            total_hits: hits,
            total_misses: misses,
            hit_rate: ratio(hits, misses),
            producer_calls: self.producer_calls.load(Ordering::Relaxed),
            producer_failures: self.producer_failures.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            invalidated_keys: self.invalidated_keys.load(Ordering::Relaxed),
            taken_at: Utc::now().to_rfc3339(),
        }
    }
}

// =============================================================================
// Snapshot and Export
// =============================================================================

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub fast: TierMetricsSnapshot,
    pub slow: TierMetricsSnapshot,
    pub categories: BTreeMap<String, CategorySnapshot>,
    pub total_hits: u64,
    pub total_misses: u64,
    pub hit_rate: f64,
    pub producer_calls: u64,
    pub producer_failures: u64,
    pub coalesced: u64,
    pub invalidated_keys: u64,
    pub taken_at: String,
}

impl MetricsSnapshot {
    /// JSON summary
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Backend error rate across both tiers
    pub fn backend_error_rate(&self) -> f64 {
        let errors = self.fast.errors + self.slow.errors;
        let total = self.fast.operations() + self.slow.operations() + errors;
        if total == 0 {
            0.0
        } else {
            errors as f64 / total as f64
        }
    }
}

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics export failed: {e}"))
}

/// Render metrics in the Prometheus text exposition format
pub fn render_prometheus(snapshot: &MetricsSnapshot, backends: &[BackendInfo]) -> Result<String> {
    let registry = Registry::new();

    let requests = IntCounterVec::new(
        Opts::new("ticket_cache_requests_total", "Cache requests by category and result"),
        &["category", "result"],
    )
    .map_err(prom_err)?;
    let hit_ratio = GaugeVec::new(
        Opts::new("ticket_cache_hit_ratio", "Hit ratio by category"),
        &["category"],
    )
    .map_err(prom_err)?;
    let tier_ops = IntCounterVec::new(
        Opts::new("ticket_cache_tier_operations_total", "Tier operations by outcome"),
        &["tier", "outcome"],
    )
    .map_err(prom_err)?;
    let producer = IntCounterVec::new(
        Opts::new("ticket_cache_producer_total", "Producer invocations by outcome"),
        &["outcome"],
    )
    .map_err(prom_err)?;
    let memory = IntGaugeVec::new(
        Opts::new("ticket_cache_backend_memory_bytes", "Bytes held by each backend"),
        &["backend"],
    )
    .map_err(prom_err)?;
    let keys = IntGaugeVec::new(
        Opts::new("ticket_cache_backend_keys", "Keys held by each backend"),
        &["backend"],
    )
    .map_err(prom_err)?;

    for collector in [
        Box::new(requests.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(hit_ratio.clone()),
        Box::new(tier_ops.clone()),
        Box::new(producer.clone()),
        Box::new(memory.clone()),
        Box::new(keys.clone()),
    ] {
        registry.register(collector).map_err(prom_err)?;
    }

    for (category, counts) in &snapshot.categories {
        let category = category.as_str();
        requests.with_label_values(&[category, "hit"]).inc_by(counts.hits);
        requests.with_label_values(&[category, "miss"]).inc_by(counts.misses);
        hit_ratio.with_label_values(&[category]).set(counts.hit_rate);
    }
    hit_ratio.with_label_values(&["all"]).set(snapshot.hit_rate);

    for (tier, stats) in [(CacheTier::Fast, &snapshot.fast), (CacheTier::Slow, &snapshot.slow)] {
        let tier = tier.as_str();
        tier_ops.with_label_values(&[tier, "hit"]).inc_by(stats.hits);
        tier_ops.with_label_values(&[tier, "miss"]).inc_by(stats.misses);
        tier_ops.with_label_values(&[tier, "write"]).inc_by(stats.writes);
        tier_ops.with_label_values(&[tier, "error"]).inc_by(stats.errors);
    }

    producer.with_label_values(&["call"]).inc_by(snapshot.producer_calls);
    producer.with_label_values(&["failure"]).inc_by(snapshot.producer_failures);
    producer.with_label_values(&["coalesced"]).inc_by(snapshot.coalesced);

    for info in backends {
        memory
            .with_label_values(&[info.name.as_str()])
            .set(info.memory_used_bytes as i64);
        keys.with_label_values(&[info.name.as_str()]).set(info.key_count as i64);
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(prom_err)?;
    String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics export failed: {e}")))
}
