//! Warm-Up Scheduler
//!
//! Populates high-value entries before they are requested. Targets that are
//! already cached are skipped rather than recomputed, and a failing producer
//! only marks its own target as failed.

use crate::cache::events::CacheEvent;
use crate::cache::store::{CacheRequest, TieredCacheStore};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Warm-Up Target
// =============================================================================

type Producer = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<serde_json::Value>> + Send>;

/// An entry to populate and the producer that computes it
pub struct WarmUpTarget {
    pub request: CacheRequest,
    producer: Producer,
}

impl WarmUpTarget {
    pub fn new<V, F, Fut>(request: CacheRequest, producer: F) -> Self
    where
        V: Serialize,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let producer: Producer = Box::new(move || {
            async move {
                let value = producer().await?;
                Ok(serde_json::to_value(value)?)
            }
            .boxed()
        });
        Self { request, producer }
    }

    pub fn key(&self) -> &str {
        &self.request.key
    }
}

impl std::fmt::Debug for WarmUpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmUpTarget")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Warm-Up Report
// =============================================================================

/// What happened to one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WarmUpOutcome {
    Computed,
    /// Already cached
    Skipped,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmUpEntry {
    pub key: String,
    #[serde(flatten)]
    pub outcome: WarmUpOutcome,
    pub duration_ms: u64,
}

/// Result of a warm-up batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarmUpReport {
    pub entries: Vec<WarmUpEntry>,
    pub computed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
}

impl WarmUpReport {
    /// Whether no target failed
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Keys that were computed in this batch
    pub fn computed_keys(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.outcome == WarmUpOutcome::Computed)
            .map(|e| e.key.as_str())
            .collect()
    }

    fn push(&mut self, entry: WarmUpEntry) {
        match entry.outcome {
            WarmUpOutcome::Computed => self.computed += 1,
            WarmUpOutcome::Skipped => self.skipped += 1,
            WarmUpOutcome::Failed { .. } => self.failed += 1,
        }
        self.entries.push(entry);
    }
}

// =============================================================================
// Warm-Up Scheduler
// =============================================================================

/// Default number of targets computed at once
pub const DEFAULT_WARMUP_CONCURRENCY: usize = 4;

/// Runs warm-up batches against a store
pub struct WarmUpScheduler {
    store: Arc<TieredCacheStore>,
    concurrency: usize,
}

impl WarmUpScheduler {
    pub fn new(store: Arc<TieredCacheStore>) -> Self {
        Self::with_concurrency(store, DEFAULT_WARMUP_CONCURRENCY)
    }

    pub fn with_concurrency(store: Arc<TieredCacheStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Populate every target that is not already cached
    ///
    /// Report entries keep the order of `targets`.
    pub async fn warm_up(&self, targets: Vec<WarmUpTarget>) -> WarmUpReport {
        let started = Instant::now();
        let count = targets.len();

        let entries: Vec<WarmUpEntry> = stream::iter(targets)
            .map(|target| self.warm_one(target))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = WarmUpReport::default();
        for entry in entries {
            report.push(entry);
        }
        report.total_duration_ms = started.elapsed().as_millis() as u64;

        info!(
            targets = count,
            computed = report.computed,
            skipped = report.skipped,
            failed = report.failed,
            duration_ms = report.total_duration_ms,
            "Cache warm-up complete"
        );
        self.store.emit_event(CacheEvent::WarmUpComplete {
            computed: report.computed,
            skipped: report.skipped,
            failed: report.failed,
            duration_ms: report.total_duration_ms,
        });
        report
    }

    async fn warm_one(&self, target: WarmUpTarget) -> WarmUpEntry {
        let started = Instant::now();
        let key = target.request.key.clone();

        let outcome = if self.store.contains(&key).await {
            debug!(key = %key, "Already cached, skipping warm-up");
            WarmUpOutcome::Skipped
        } else {
            let producer = target.producer;
            match self
                .store
                .get_or_compute_with::<serde_json::Value, _, _>(target.request, producer)
                .await
            {
                Ok(_) => WarmUpOutcome::Computed,
                Err(e) => {
                    warn!(key = %key, error = %e, "Warm-up target failed");
                    WarmUpOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            }
        };

        WarmUpEntry {
            key,
            outcome,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Run a warm-up batch every `interval` until `cancel` fires
    ///
    /// `targets` is called once per batch. Returns the number of batches run.
    pub async fn run_periodic<F>(&self, interval: Duration, targets: F, cancel: CancellationToken) -> u64
    where
        F: Fn() -> Vec<WarmUpTarget>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut runs = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.warm_up(targets()).await;
                    runs += 1;
                }
            }
        }

        info!(runs, "Periodic warm-up stopped");
        runs
    }
}
