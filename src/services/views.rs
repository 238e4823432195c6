//! View Fragments
//!
//! Named page fragments rendered through the [`ViewRenderer`] port and cached
//! with [`FragmentCache`]. Each fragment picks a [`FragmentKind`] matching how
//! quickly its content goes stale and tags that let data changes drop it.
//!
//! [`ViewRenderer`]: crate::domain::ports::ViewRenderer

use crate::cache::fragment::{FragmentCache, FragmentContext};
use crate::cache::invalidation::InvalidationReport;
use crate::cache::ttl::FragmentKind;
use crate::domain::ports::{UserRole, ViewRendererRef};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Role recorded for fragments that render the same for everyone
const ANY_ROLE: &str = "any";

/// Outcome of a fragment warm-up
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FragmentWarmUp {
    pub warmed: Vec<String>,
    pub failed: Vec<String>,
    pub duration_ms: u64,
}

impl FragmentWarmUp {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Cached page fragments
pub struct ViewFragments {
    cache: Arc<FragmentCache>,
    renderer: ViewRendererRef,
}

impl ViewFragments {
    pub fn new(cache: Arc<FragmentCache>, renderer: ViewRendererRef) -> Self {
        Self { cache, renderer }
    }

    pub fn cache(&self) -> &Arc<FragmentCache> {
        &self.cache
    }

    async fn fragment(
        &self,
        id: &str,
        template: &str,
        context: FragmentContext,
        kind: FragmentKind,
        tags: &[&str],
    ) -> Result<String> {
        self.cache
            .render(id, &context, kind, tags, || self.renderer.render(template, &context.data))
            .await
    }

    // =========================================================================
    // Layout
    // =========================================================================

    pub async fn navigation(&self, role: UserRole, current_route: &str) -> Result<String> {
        let context = FragmentContext::new(role.as_str()).with_data(json!({
            "user_role": role,
            "current_route": current_route,
        }));
        let role_tag = format!("user_role:{role}");
        self.fragment(
            "navigation",
            "layouts.navigation",
            context,
            FragmentKind::SemiStatic,
            &["navigation", role_tag.as_str()],
        )
        .await
    }

    pub async fn mobile_navigation(&self, role: UserRole, current_route: &str) -> Result<String> {
        let context = FragmentContext::new(role.as_str()).with_data(json!({
            "user_role": role,
            "current_route": current_route,
        }));
        self.fragment(
            "mobile_nav",
            "components.mobile.bottom-navigation",
            context,
            FragmentKind::SemiStatic,
            &["mobile", "navigation"],
        )
        .await
    }

    pub async fn footer(&self, version: &str, year: i32) -> Result<String> {
        let context = FragmentContext::new(ANY_ROLE).with_data(json!({
            "version": version,
            "year": year,
        }));
        self.fragment("footer", "components.footer", context, FragmentKind::Static, &["footer", "static"])
            .await
    }

    pub async fn breadcrumb(&self, crumbs: &[(String, String)]) -> Result<String> {
        let crumbs: Vec<Value> = crumbs
            .iter()
            .map(|(label, url)| json!({ "label": label, "url": url }))
            .collect();
        let context = FragmentContext::new(ANY_ROLE).with_data(json!({ "breadcrumbs": crumbs }));
        self.fragment(
            "breadcrumb",
            "components.breadcrumb",
            context,
            FragmentKind::SemiStatic,
            &["breadcrumb"],
        )
        .await
    }

    // =========================================================================
    // Dashboard
    // =========================================================================

    pub async fn dashboard_stats(&self, stats: Value, role: UserRole) -> Result<String> {
        let context = FragmentContext::new(role.as_str()).with_data(json!({ "stats": stats }));
        self.fragment(
            "dashboard.stats",
            "components.dashboard.stat-card",
            context,
            FragmentKind::Dynamic,
            &["dashboard", "stats"],
        )
        .await
    }

    pub async fn platform_status(&self, platforms: Value) -> Result<String> {
        let context = FragmentContext::new(ANY_ROLE).with_data(json!({ "platforms": platforms }));
        self.fragment(
            "dashboard.platform_status",
            "components.dashboard.platform-status",
            context,
            FragmentKind::Dynamic,
            &["platform", "status"],
        )
        .await
    }

    pub async fn event_spotlight(&self, events: Value) -> Result<String> {
        let context = FragmentContext::new(ANY_ROLE).with_data(json!({ "events": events }));
        self.fragment(
            "events.spotlight",
            "components.dashboard.event-spotlight",
            context,
            FragmentKind::Dynamic,
            &["events", "spotlight"],
        )
        .await
    }

    pub async fn live_ticker(&self, updates: Value) -> Result<String> {
        let context = FragmentContext::new(ANY_ROLE).with_data(json!({ "updates": updates }));
        self.fragment(
            "live.ticker",
            "components.dashboard.live-ticker",
            context,
            FragmentKind::RealTime,
            &["live", "ticker"],
        )
        .await
    }

    /// Chart of `chart_type`, rendered from `components.charts.{chart_type}`
    pub async fn chart(&self, chart_type: &str, data: Value, options: Value) -> Result<String> {
        let context = FragmentContext::new(ANY_ROLE).with_data(json!({
            "data": data,
            "options": options,
        }));
        let template = format!("components.charts.{chart_type}");
        self.fragment(
            &format!("charts.{chart_type}"),
            &template,
            context,
            FragmentKind::Dynamic,
            &["charts", chart_type],
        )
        .await
    }

    // =========================================================================
    // Tickets
    // =========================================================================

    pub async fn ticket_table(&self, tickets: Value, filters: Value, role: UserRole) -> Result<String> {
        let context = FragmentContext::new(role.as_str()).with_data(json!({
            "tickets": tickets,
            "filters": filters,
        }));
        self.fragment(
            "tickets.table",
            "components.enhanced-table",
            context,
            FragmentKind::RealTime,
            &["tickets", "table"],
        )
        .await
    }

    pub async fn alert_panel(&self, alerts: Value, role: UserRole) -> Result<String> {
        let context = FragmentContext::new(role.as_str()).with_data(json!({ "alerts": alerts }));
        self.fragment(
            "alerts.panel",
            "components.alert-panel",
            context,
            FragmentKind::RealTime,
            &["alerts", "notifications"],
        )
        .await
    }

    pub async fn search_filters(&self, filters: Value, options: Value) -> Result<String> {
        let context = FragmentContext::new(ANY_ROLE).with_data(json!({
            "filters": filters,
            "options": options,
        }));
        self.fragment(
            "search.filters",
            "components.search-filters",
            context,
            FragmentKind::SemiStatic,
            &["search", "filters"],
        )
        .await
    }

    /// Profile sidebar of one user
    pub async fn user_profile(&self, role: UserRole, user_id: u64, profile: Value) -> Result<String> {
        let context = FragmentContext::new(role.as_str())
            .for_user(user_id)
            .with_data(profile);
        let user_tag = format!("user:{user_id}");
        self.fragment(
            "user.profile",
            "components.user-profile-sidebar",
            context,
            FragmentKind::SemiStatic,
            &["user", "profile", user_tag.as_str()],
        )
        .await
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Drop fragments showing ticket data after a listing change
    pub async fn on_tickets_changed(&self) -> InvalidationReport {
        self.cache
            .invalidate_by_tags(&["tickets", "platform", "charts", "availability"])
            .await
    }

    /// Render the fragments most pages need
    ///
    /// The footer, navigation for every role in `roles`, and the empty
    /// dashboard widgets. A failing fragment is logged and skipped.
    pub async fn warmup_fragments(&self, roles: &[UserRole], version: &str, year: i32) -> FragmentWarmUp {
        let started = Instant::now();
        let mut report = FragmentWarmUp::default();
        let mut record = |name: String, outcome: Result<String>| match outcome {
            Ok(_) => report.warmed.push(name),
            Err(e) => {
                warn!(fragment = %name, error = %e, "Fragment warm-up failed");
                report.failed.push(name);
            }
        };

        record("footer".to_string(), self.footer(version, year).await);
        for &role in roles {
            record(format!("nav_{role}"), self.navigation(role, "dashboard").await);
            record(format!("mobile_nav_{role}"), self.mobile_navigation(role, "dashboard").await);
        }
        record("platform_status".to_string(), self.platform_status(json!([])).await);
        record("event_spotlight".to_string(), self.event_spotlight(json!([])).await);

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            warmed = report.warmed.len(),
            failed = report.failed.len(),
            duration_ms = report.duration_ms,
            "View fragment warm-up completed"
        );
        report
    }
}
