//! Fragment Cache
//!
//! Caches rendered output keyed by fragment id and the context it was
//! rendered for. The context (role, user and the data behind the fragment)
//! is fingerprinted so that two different inputs never share a rendering.

use crate::cache::fingerprint::QueryFingerprint;
use crate::cache::invalidation::{InvalidationMode, InvalidationReport, Invalidator};
use crate::cache::layer::CacheLayer;
use crate::cache::store::{CacheRequest, TieredCacheStore};
use crate::cache::ttl::FragmentKind;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Tag carried by every cached fragment
pub const FRAGMENT_TAG: &str = "fragments";

/// Who a fragment is rendered for and from what
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentContext {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl FragmentContext {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            ..Default::default()
        }
    }

    /// Render for a single user
    pub fn for_user(mut self, user_id: u64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Data the rendering depends on
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    fn fingerprint(&self) -> Result<QueryFingerprint> {
        QueryFingerprint::of(self)
    }
}

/// Rendered-output cache on top of the tiered store
pub struct FragmentCache {
    store: Arc<TieredCacheStore>,
    invalidator: Invalidator,
}

impl FragmentCache {
    pub fn new(store: Arc<TieredCacheStore>, mode: InvalidationMode) -> Self {
        let invalidator = Invalidator::new(store.clone(), mode);
        Self { store, invalidator }
    }

    /// Storage key of a fragment rendering
    pub fn key(&self, fragment_id: &str, context: &FragmentContext) -> Result<String> {
        let fingerprint = context.fingerprint()?;
        Ok(CacheLayer::Fragments.key(&format!(
            "{}:{}:{}",
            fragment_id, context.role, fingerprint
        )))
    }

    /// Return the cached rendering, rendering and caching it on a miss
    ///
    /// The fragment is tagged with [`FRAGMENT_TAG`] in addition to `tags`.
    pub async fn render<F, Fut>(
        &self,
        fragment_id: &str,
        context: &FragmentContext,
        kind: FragmentKind,
        tags: &[&str],
        renderer: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        let key = match self.key(fragment_id, context) {
            Ok(key) => key,
            Err(e) => {
                warn!(fragment = fragment_id, error = %e, "Fragment context cannot be fingerprinted, rendering uncached");
                return renderer().await.map_err(|e| Error::producer(fragment_id, e));
            }
        };

        let request = CacheRequest::new(key, kind.ttl())
            .tag(FRAGMENT_TAG)
            .with_tags(tags.iter().copied())
            .with_category(CacheLayer::Fragments.as_str());

        let id = fragment_id.to_string();
        self.store
            .get_or_compute_with(request, || async move {
                let started = Instant::now();
                match renderer().await {
                    Ok(html) => {
                        debug!(
                            fragment = %id,
                            render_ms = started.elapsed().as_millis() as u64,
                            bytes = html.len(),
                            "Fragment rendered"
                        );
                        Ok(html)
                    }
                    Err(e) => {
                        error!(fragment = %id, error = %e, "Fragment rendering failed");
                        Err(e)
                    }
                }
            })
            .await
    }

    /// Drop one rendering
    pub async fn invalidate_fragment(&self, fragment_id: &str, context: &FragmentContext) -> bool {
        match self.key(fragment_id, context) {
            Ok(key) => self.invalidator.invalidate_key(&key).await,
            Err(_) => false,
        }
    }

    /// Drop every rendering of a fragment, across all contexts
    pub async fn invalidate_fragment_id(&self, fragment_id: &str) -> InvalidationReport {
        let pattern = CacheLayer::Fragments.key(&format!("{}:*", glob::Pattern::escape(fragment_id)));
        self.invalidator.bulk_invalidate(&[pattern]).await
    }

    /// Drop fragments carrying any of `tags`
    pub async fn invalidate_by_tags<S: AsRef<str>>(&self, tags: &[S]) -> InvalidationReport {
        self.invalidator.invalidate_by_tags(tags).await
    }

    /// Drop every cached fragment
    pub async fn flush_fragments(&self) -> InvalidationReport {
        warn!("Flushing all cached fragments");
        self.invalidator
            .bulk_invalidate(&[CacheLayer::Fragments.pattern()])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::tests::harness;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> (FragmentCache, Arc<TieredCacheStore>) {
        let h = harness();
        (FragmentCache::new(h.store.clone(), InvalidationMode::Exact), h.store)
    }

    #[tokio::test]
    async fn test_context_isolates_renderings() {
        let (fragments, _) = cache();
        let calls = AtomicUsize::new(0);
        let render = |label: &'static str| {
            let calls = &calls;
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(format!("<nav>{label}</nav>"))
            }
        };

        let admin = FragmentContext::new("admin");
        let customer = FragmentContext::new("customer");

        let a = fragments
            .render("navigation", &admin, FragmentKind::SemiStatic, &["navigation"], render("admin"))
            .await
            .unwrap();
        let c = fragments
            .render("navigation", &customer, FragmentKind::SemiStatic, &["navigation"], render("customer"))
            .await
            .unwrap();
        let again = fragments
            .render("navigation", &admin, FragmentKind::SemiStatic, &["navigation"], render("stale"))
            .await
            .unwrap();

        assert_eq!(a, "<nav>admin</nav>");
        assert_eq!(c, "<nav>customer</nav>");
        assert_eq!(again, a);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_data_changes_the_key() {
        let (fragments, _) = cache();
        let base = FragmentContext::new("customer").with_data(json!({"sport": "football", "page": 1}));
        let reordered = FragmentContext::new("customer").with_data(json!({"page": 1, "sport": "football"}));
        let other = FragmentContext::new("customer").with_data(json!({"sport": "tennis", "page": 1}));

        let key = fragments.key("tickets.table", &base).unwrap();
        assert!(key.starts_with("view_fragments:tickets.table:customer:"));
        assert_eq!(key, fragments.key("tickets.table", &reordered).unwrap());
        assert_ne!(key, fragments.key("tickets.table", &other).unwrap());
        assert_ne!(key, fragments.key("tickets.table", &base.clone().for_user(7)).unwrap());
    }

    #[tokio::test]
    async fn test_tag_invalidation_and_flush() {
        let (fragments, store) = cache();
        let ctx = FragmentContext::new("admin");

        for (id, tag) in [("dashboard.stats", "dashboard"), ("footer", "layout"), ("alerts", "dashboard")] {
            fragments
                .render(id, &ctx, FragmentKind::Dynamic, &[tag], || async move { Ok(id.to_string()) })
                .await
                .unwrap();
        }
        store
            .put(&CacheRequest::new("tickets:1", FragmentKind::Static.ttl()), &1)
            .await
            .unwrap();

        let report = fragments.invalidate_by_tags(&["dashboard"]).await;
        assert_eq!(report.deleted, 2);
        assert!(store.contains(&fragments.key("footer", &ctx).unwrap()).await);

        let report = fragments.flush_fragments().await;
        assert_eq!(report.deleted, 1);
        assert!(store.contains("tickets:1").await);
    }

    #[tokio::test]
    async fn test_invalidate_single_rendering_and_all_contexts() {
        let (fragments, store) = cache();
        let admin = FragmentContext::new("admin");
        let customer = FragmentContext::new("customer");
        for ctx in [&admin, &customer] {
            fragments
                .render("navigation", ctx, FragmentKind::Static, &[], || async { Ok("nav".to_string()) })
                .await
                .unwrap();
        }
        fragments
            .render("footer", &admin, FragmentKind::Static, &[], || async { Ok("footer".to_string()) })
            .await
            .unwrap();

        assert!(fragments.invalidate_fragment("navigation", &admin).await);
        assert!(!fragments.invalidate_fragment("navigation", &admin).await);
        assert!(store.contains(&fragments.key("navigation", &customer).unwrap()).await);

        let report = fragments.invalidate_fragment_id("navigation").await;
        assert_eq!(report.deleted, 1);
        assert!(store.contains(&fragments.key("footer", &admin).unwrap()).await);
    }

    #[tokio::test]
    async fn test_renderer_error_propagates() {
        let (fragments, _) = cache();
        let result = fragments
            .render("chart", &FragmentContext::new("admin"), FragmentKind::RealTime, &[], || async {
                Err(anyhow::anyhow!("template missing"))
            })
            .await;
        assert!(matches!(result, Err(Error::Producer { .. })));
    }
}
