//! Diagnostics
//!
//! Aggregates metrics and backend introspection into stats, a health
//! assessment and a Prometheus export.

use crate::cache::backend::BackendInfo;
use crate::cache::entry::CacheKey;
use crate::cache::metrics::{render_prometheus, MetricsSnapshot};
use crate::cache::store::{TieredCacheStore, TierHealth};
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

// =============================================================================
// Thresholds
// =============================================================================

const GIB: u64 = 1024 * 1024 * 1024;

/// Limits used by the health assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    /// Warn below this hit ratio
    pub min_hit_ratio: f64,
    /// Warn above this many bytes across both tiers
    pub max_memory_bytes: u64,
    /// Fail above this backend error rate
    pub max_error_rate: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_hit_ratio: 0.70,
            max_memory_bytes: GIB,
            max_error_rate: 0.05,
        }
    }
}

impl HealthThresholds {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_hit_ratio) {
            return Err(Error::Configuration(format!(
                "health.min_hit_ratio must be within [0, 1], got {}",
                self.min_hit_ratio
            )));
        }
        if !(0.0..=1.0).contains(&self.max_error_rate) {
            return Err(Error::Configuration(format!(
                "health.max_error_rate must be within [0, 1], got {}",
                self.max_error_rate
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Health Report
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    pub severity: HealthStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Worst severity among the issues
    pub status: HealthStatus,
    pub issues: Vec<HealthIssue>,
    pub hit_rate: f64,
    pub memory_used_bytes: u64,
    pub error_rate: f64,
    pub tiers: TierHealth,
    pub checked_at: String,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Assess cache health from a metrics snapshot and backend figures
pub fn assess(
    snapshot: &MetricsSnapshot,
    backends: &[BackendInfo],
    tiers: TierHealth,
    thresholds: &HealthThresholds,
) -> HealthReport {
    let mut issues = Vec::new();
    let mut issue = |severity, message: String| issues.push(HealthIssue { severity, message });

    // No lookups yet means no meaningful ratio
    let lookups = snapshot.total_hits + snapshot.total_misses;
    if lookups > 0 && snapshot.hit_rate < thresholds.min_hit_ratio {
        issue(
            HealthStatus::Warning,
            format!(
                "hit ratio {:.1}% below {:.1}%",
                snapshot.hit_rate * 100.0,
                thresholds.min_hit_ratio * 100.0
            ),
        );
    }

    let memory_used_bytes: u64 = backends.iter().map(|b| b.memory_used_bytes).sum();
    if memory_used_bytes > thresholds.max_memory_bytes {
        issue(
            HealthStatus::Warning,
            format!(
                "memory usage {memory_used_bytes} bytes above {} bytes",
                thresholds.max_memory_bytes
            ),
        );
    }

    let error_rate = snapshot.backend_error_rate();
    if error_rate > thresholds.max_error_rate {
        issue(
            HealthStatus::Error,
            format!(
                "backend error rate {:.1}% above {:.1}%",
                error_rate * 100.0,
                thresholds.max_error_rate * 100.0
            ),
        );
    }

    if !tiers.fast {
        issue(HealthStatus::Error, "fast tier unreachable".to_string());
    }
    if !tiers.slow {
        issue(HealthStatus::Error, "slow tier unreachable".to_string());
    }

    let status = issues
        .iter()
        .map(|i| i.severity)
        .max()
        .unwrap_or(HealthStatus::Healthy);

    HealthReport {
        status,
        issues,
        hit_rate: snapshot.hit_rate,
        memory_used_bytes,
        error_rate,
        tiers,
        checked_at: Utc::now().to_rfc3339(),
    }
}

// =============================================================================
// Cache Stats
// =============================================================================

/// Full statistics document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub metrics: MetricsSnapshot,
    pub backends: Vec<BackendInfo>,
    pub keys_per_prefix: BTreeMap<String, usize>,
    pub tag_count: usize,
    pub indexed_keys: usize,
    pub in_flight: usize,
}

/// Diagnostics over a store
pub struct Diagnostics {
    store: Arc<TieredCacheStore>,
    thresholds: HealthThresholds,
}

impl Diagnostics {
    pub fn new(store: Arc<TieredCacheStore>, thresholds: HealthThresholds) -> Self {
        Self { store, thresholds }
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    /// Live key count per namespace across both tiers
    pub async fn keys_per_prefix(&self) -> BTreeMap<String, usize> {
        let keys = match self.store.keys_matching("*").await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Key enumeration failed");
                return BTreeMap::new();
            }
        };

        let mut counts = BTreeMap::new();
        for key in keys {
            let category = CacheKey::from_storage_key(&key).category().to_string();
            *counts.entry(category).or_insert(0) += 1;
        }
        counts
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            metrics: self.store.metrics().snapshot(),
            backends: self.store.backend_info().await,
            keys_per_prefix: self.keys_per_prefix().await,
            tag_count: self.store.index().tag_count(),
            indexed_keys: self.store.index().key_count(),
            in_flight: self.store.in_flight_count(),
        }
    }

    pub async fn health(&self) -> HealthReport {
        let snapshot = self.store.metrics().snapshot();
        let backends = self.store.backend_info().await;
        let tiers = self.store.health_check().await;
        let report = assess(&snapshot, &backends, tiers, &self.thresholds);
        if !report.is_healthy() {
            warn!(
                status = report.status.as_str(),
                issues = report.issues.len(),
                "Cache health degraded"
            );
        }
        report
    }

    /// Prometheus text exposition
    pub async fn prometheus(&self) -> Result<String> {
        let snapshot = self.store.metrics().snapshot();
        let backends = self.store.backend_info().await;
        render_prometheus(&snapshot, &backends)
    }
}
