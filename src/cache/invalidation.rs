//! Invalidation
//!
//! Evicts entries by tag, key, glob pattern or layer. Every operation is
//! best effort: individual deletions that fail are logged and reported, and
//! the remaining work continues. Invalidating something that is already
//! gone is a no-op.

use crate::cache::events::{CacheEvent, EvictionReason};
use crate::cache::layer::CacheLayer;
use crate::cache::store::TieredCacheStore;
use crate::error::Result;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How tag invalidation resolves member keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationMode {
    /// Only keys recorded under the tag in the index
    #[default]
    Exact,
    /// Indexed keys plus every key containing the tag text
    Approximate,
}

/// A target that could not be fully invalidated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationFailure {
    /// Key, pattern or tag that failed
    pub target: String,
    pub reason: String,
}

/// Outcome of an invalidation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidationReport {
    /// Entries removed from at least one tier
    pub deleted: u64,
    pub failures: Vec<InvalidationFailure>,
}

impl InvalidationReport {
    /// Whether every target was processed without error
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: InvalidationReport) {
        self.deleted += other.deleted;
        self.failures.extend(other.failures);
    }

    fn fail(&mut self, target: &str, reason: impl ToString) {
        self.failures.push(InvalidationFailure {
            target: target.to_string(),
            reason: reason.to_string(),
        });
    }
}

/// Invalidation front end over a [`TieredCacheStore`]
pub struct Invalidator {
    store: Arc<TieredCacheStore>,
    mode: InvalidationMode,
}

impl Invalidator {
    pub fn new(store: Arc<TieredCacheStore>, mode: InvalidationMode) -> Self {
        Self { store, mode }
    }

    pub fn mode(&self) -> InvalidationMode {
        self.mode
    }

    pub fn store(&self) -> &Arc<TieredCacheStore> {
        &self.store
    }

    /// Remove every entry carrying any of `tags`
    pub async fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        if tags.is_empty() {
            return report;
        }

        let tags: Vec<String> = tags.iter().map(|t| t.as_ref().to_string()).collect();
        let mut keys: IndexSet<String> = self.store.index().keys_for(&tags).into_iter().collect();

        if self.mode == InvalidationMode::Approximate {
            for tag in &tags {
                let pattern = format!("*{}*", glob::Pattern::escape(tag));
                match self.store.keys_matching(&pattern).await {
                    Ok(found) => keys.extend(found),
                    Err(e) => {
                        warn!(tag = %tag, error = %e, "Tag pattern lookup failed");
                        report.fail(tag, &e);
                    }
                }
            }
            warn!(
                tags = ?tags,
                candidates = keys.len(),
                "Approximate tag invalidation may remove untagged entries"
            );
        }

        self.remove_keys(keys, EvictionReason::Tag, &mut report).await;

        info!(tags = ?tags, deleted = report.deleted, failures = report.failures.len(), "Invalidated tags");
        self.store.emit_event(CacheEvent::TagsInvalidated {
            tags,
            keys_removed: report.deleted,
        });
        self.store.metrics().record_invalidated(report.deleted);
        report
    }

    /// Remove one entry from both tiers
    pub async fn invalidate_key(&self, key: &str) -> bool {
        match self.store.remove(key, EvictionReason::Manual).await {
            Ok(existed) => {
                if existed {
                    self.store.metrics().record_invalidated(1);
                }
                debug!(key = %key, existed, "Invalidated key");
                existed
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Key invalidation failed");
                false
            }
        }
    }

    /// Remove every entry matching any of `patterns`
    ///
    /// Keys matched by more than one pattern are counted once.
    pub async fn bulk_invalidate<S: AsRef<str>>(&self, patterns: &[S]) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            match self.store.keys_matching(pattern).await {
                Ok(keys) => {
                    let before = report.deleted;
                    self.remove_keys(keys, EvictionReason::Pattern, &mut report).await;
                    debug!(pattern, deleted = report.deleted - before, "Invalidated pattern");
                }
                Err(e) => {
                    error!(pattern, error = %e, "Pattern invalidation failed, continuing");
                    report.fail(pattern, &e);
                }
            }
        }

        info!(
            patterns = patterns.len(),
            deleted = report.deleted,
            failures = report.failures.len(),
            "Bulk invalidation finished"
        );
        self.store.emit_event(CacheEvent::PatternsInvalidated {
            patterns: patterns.iter().map(|p| p.as_ref().to_string()).collect(),
            keys_removed: report.deleted,
            failures: report.failures.len(),
        });
        self.store.metrics().record_invalidated(report.deleted);
        report
    }

    /// Remove a layer's entries, and with `cascade` those of its dependents
    pub async fn invalidate_layer(&self, layer: CacheLayer, cascade: bool) -> InvalidationReport {
        let mut layers = vec![layer];
        if cascade {
            layers.extend(layer.dependents().iter().copied());
        }

        let mut report = InvalidationReport::default();
        for target in &layers {
            let mut keys: IndexSet<String> =
                self.store.index().keys_for(target.tags()).into_iter().collect();
            let pattern = target.pattern();
            match self.store.keys_matching(&pattern).await {
                Ok(found) => keys.extend(found),
                Err(e) => {
                    warn!(layer = %target, error = %e, "Layer key lookup failed");
                    report.fail(&pattern, &e);
                }
            }
            self.remove_keys(keys, EvictionReason::Pattern, &mut report).await;
        }

        info!(
            layer = %layer,
            cascade,
            layers = ?layers.iter().map(CacheLayer::as_str).collect::<Vec<_>>(),
            deleted = report.deleted,
            "Invalidated layer"
        );
        self.store.metrics().record_invalidated(report.deleted);
        report
    }

    /// Empty the whole cache
    ///
    /// Administrative action only; routine mutations should invalidate by
    /// tag or key.
    pub async fn flush_all(&self) -> Result<()> {
        self.store.flush_all().await
    }

    async fn remove_keys<I>(&self, keys: I, reason: EvictionReason, report: &mut InvalidationReport)
    where
        I: IntoIterator<Item = String>,
    {
        for key in keys {
            match self.store.remove(&key, reason).await {
                Ok(true) => report.deleted += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping key that could not be deleted");
                    report.fail(&key, &e);
                }
            }
        }
    }
}
