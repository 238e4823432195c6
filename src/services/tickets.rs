//! Ticket Cache
//!
//! Cached reads of ticket data: filtered listings, search, high-demand
//! tickets, ticket detail and availability, platform statistics, event
//! aggregations, analytics and per-user data. Keys are derived from the
//! query criteria with [`QueryFingerprint`], so identical criteria share an
//! entry regardless of how the caller assembled them.

use crate::cache::fingerprint::QueryFingerprint;
use crate::cache::invalidation::{InvalidationReport, Invalidator};
use crate::cache::layer::CacheLayer;
use crate::cache::store::{CacheRequest, TieredCacheStore};
use crate::cache::ttl::{TtlCategory, TtlPolicy};
use crate::cache::warmup::{WarmUpReport, WarmUpScheduler, WarmUpTarget};
use crate::domain::ports::{
    AnalyticsKind, Availability, EventTickets, PlatformStats, TicketQuery, TicketRecord, TicketSourceRef,
};
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Ticket facade settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketCacheConfig {
    /// Platforms whose statistics are warmed
    pub platforms: Vec<String>,
    /// Search terms warmed with empty filters
    pub trending_searches: Vec<String>,
    pub high_demand_limit: u32,
    pub search_limit: u32,
    /// Result limit used when warming trending searches
    pub trending_search_limit: u32,
}

impl Default for TicketCacheConfig {
    fn default() -> Self {
        Self {
            platforms: ["ticketmaster", "stubhub", "viagogo", "tickpick"]
                .into_iter()
                .map(String::from)
                .collect(),
            trending_searches: ["Premier League", "Champions League", "NBA Finals", "World Cup", "Wimbledon"]
                .into_iter()
                .map(String::from)
                .collect(),
            high_demand_limit: 20,
            search_limit: 50,
            trending_search_limit: 20,
        }
    }
}

// =============================================================================
// Keys and Tags
// =============================================================================

fn platform_tag(platform: &str) -> String {
    format!("platform:{platform}")
}

fn ticket_tag(id: u64) -> String {
    format!("ticket:{id}")
}

fn detail_key(id: u64) -> String {
    CacheLayer::Tickets.key(&format!("detail:{id}"))
}

fn availability_key(id: u64) -> String {
    CacheLayer::Tickets.key(&format!("availability:{id}"))
}

// =============================================================================
// Ticket Cache
// =============================================================================

/// Cached access to ticket data
pub struct TicketCache {
    store: Arc<TieredCacheStore>,
    invalidator: Arc<Invalidator>,
    source: TicketSourceRef,
    policy: TtlPolicy,
    config: TicketCacheConfig,
}

impl TicketCache {
    pub fn new(
        store: Arc<TieredCacheStore>,
        invalidator: Arc<Invalidator>,
        source: TicketSourceRef,
        policy: TtlPolicy,
        config: TicketCacheConfig,
    ) -> Self {
        Self {
            store,
            invalidator,
            source,
            policy,
            config,
        }
    }

    pub fn config(&self) -> &TicketCacheConfig {
        &self.config
    }

    /// Layer request with a category other than the layer default
    fn request(&self, layer: CacheLayer, id: &str, ttl: TtlCategory) -> CacheRequest {
        layer.request_with_ttl(id, self.policy.resolve(ttl))
    }

    // =========================================================================
    // Listings
    // =========================================================================

    fn query_request(&self, query: &TicketQuery) -> Result<CacheRequest> {
        let fingerprint = QueryFingerprint::of(query)?;
        let mut request = CacheLayer::Tickets.request(&format!("query:{fingerprint}"), &self.policy);
        if let Some(platform) = &query.platform {
            request = request.tag(platform_tag(platform));
        }
        Ok(request)
    }

    /// Listings matching `query`
    pub async fn tickets(&self, query: &TicketQuery) -> Result<Vec<TicketRecord>> {
        let request = self.query_request(query)?;
        self.store
            .get_or_compute_with(request, || self.source.query_tickets(query))
            .await
    }

    fn search_request(&self, text: &str, query: &TicketQuery, limit: u32) -> Result<CacheRequest> {
        let fingerprint = QueryFingerprint::of(&(text, query, limit))?;
        Ok(CacheLayer::Search.request(fingerprint.as_str(), &self.policy))
    }

    /// Search results for `text` within `query`
    pub async fn search(&self, text: &str, query: &TicketQuery, limit: Option<u32>) -> Result<Vec<TicketRecord>> {
        let limit = limit.unwrap_or(self.config.search_limit);
        let request = self.search_request(text, query, limit)?;
        self.store
            .get_or_compute_with(request, || self.source.search(text, query, limit))
            .await
    }

    fn high_demand_request(&self) -> CacheRequest {
        self.request(CacheLayer::Tickets, "high_demand", TtlCategory::UltraShort)
            .tag("high_demand")
    }

    /// Available high-demand listings
    ///
    /// Computing the list also caches each listing's detail and availability.
    pub async fn high_demand(&self) -> Result<Vec<TicketRecord>> {
        let limit = self.config.high_demand_limit;
        self.store
            .get_or_compute_with(self.high_demand_request(), || async move {
                let tickets = self.source.high_demand(limit).await?;
                for ticket in &tickets {
                    store_ticket(&self.store, &self.policy, ticket).await;
                }
                Ok(tickets)
            })
            .await
    }

    // =========================================================================
    // Ticket Detail
    // =========================================================================

    /// Cache a listing's detail and availability
    ///
    /// The detail TTL is derived from the event date at the time of the
    /// call; call this again after the listing changes to refresh it.
    pub async fn touch_ticket(&self, ticket: &TicketRecord) -> bool {
        store_ticket(&self.store, &self.policy, ticket).await
    }

    /// Detail of one listing
    pub async fn ticket(&self, id: u64) -> Result<Option<TicketRecord>> {
        let key = detail_key(id);
        if let Some(ticket) = self.store.get::<TicketRecord>(&key).await {
            return Ok(Some(ticket));
        }

        let ticket = self.source.ticket(id).await.map_err(|e| Error::producer(&key, e))?;
        if let Some(ticket) = &ticket {
            store_ticket(&self.store, &self.policy, ticket).await;
        }
        Ok(ticket)
    }

    /// Availability of one listing
    pub async fn availability(&self, id: u64) -> Result<Option<Availability>> {
        if let Some(availability) = self.store.get::<Availability>(&availability_key(id)).await {
            return Ok(Some(availability));
        }
        Ok(self.ticket(id).await?.as_ref().map(Availability::from))
    }

    /// Re-read availability of `ids` and cache it with a very short TTL
    ///
    /// Returns the number of listings refreshed.
    pub async fn refresh_availability(&self, ids: &[u64]) -> Result<usize> {
        let batch_key = format!("availability_batch:{}", QueryFingerprint::of(ids)?);
        let tickets = self
            .source
            .tickets_by_ids(ids)
            .await
            .map_err(|e| Error::producer(&batch_key, e))?;

        let updates: Vec<Availability> = tickets.iter().map(Availability::from).collect();
        let batch = self.request(CacheLayer::Tickets, &batch_key, TtlCategory::UltraShort);
        if let Err(e) = self.store.put(&batch, &updates).await {
            warn!(key = %batch.key, error = %e, "Availability batch not cached");
        }

        for update in &updates {
            let request = self
                .request(
                    CacheLayer::Tickets,
                    &format!("availability:{}", update.ticket_id),
                    TtlCategory::UltraShort,
                )
                .tag(ticket_tag(update.ticket_id));
            if let Err(e) = self.store.put(&request, update).await {
                warn!(key = %request.key, error = %e, "Availability not cached");
            }
        }

        debug!(requested = ids.len(), refreshed = updates.len(), "Refreshed availability");
        Ok(updates.len())
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    fn platform_request(&self, platform: &str) -> CacheRequest {
        CacheLayer::Platforms
            .request(&format!("stats:{platform}"), &self.policy)
            .tag(platform_tag(platform))
    }

    pub async fn platform_stats(&self, platform: &str) -> Result<PlatformStats> {
        self.store
            .get_or_compute_with(self.platform_request(platform), || self.source.platform_stats(platform))
            .await
    }

    /// Listings of one event with per-platform breakdown
    pub async fn event_tickets(&self, title: &str, venue: &str) -> Result<EventTickets> {
        let fingerprint = QueryFingerprint::of(&(title, venue))?;
        let request = self
            .request(CacheLayer::Events, fingerprint.as_str(), TtlCategory::Long)
            .tag("tickets");
        self.store
            .get_or_compute_with(request, || async move {
                let tickets = self.source.event_tickets(title, venue).await?;
                Ok(EventTickets::aggregate(tickets))
            })
            .await
    }

    fn analytics_request(&self, kind: AnalyticsKind, params: &serde_json::Value) -> Result<CacheRequest> {
        let fingerprint = QueryFingerprint::of(params)?;
        Ok(self.request(
            CacheLayer::Analytics,
            &format!("{}:{}", kind.as_str(), fingerprint),
            TtlCategory::Long,
        ))
    }

    pub async fn analytics(&self, kind: AnalyticsKind, params: &serde_json::Value) -> Result<serde_json::Value> {
        let request = self.analytics_request(kind, params)?;
        self.store
            .get_or_compute_with(request, || self.source.analytics(kind, params))
            .await
    }

    /// Alerts, preferences and recommendations of a user
    pub async fn user_tickets(&self, user_id: u64) -> Result<serde_json::Value> {
        let request = self
            .request(CacheLayer::Users, &format!("tickets:{user_id}"), TtlCategory::Medium)
            .tag(format!("user:{user_id}"));
        self.store
            .get_or_compute_with(request, || self.source.user_tickets(user_id))
            .await
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Drop everything derived from a listing, then re-cache its detail
    pub async fn on_ticket_mutated(&self, ticket: &TicketRecord) -> InvalidationReport {
        let tags = [
            "tickets".to_string(),
            "search".to_string(),
            "events".to_string(),
            platform_tag(&ticket.platform),
            ticket_tag(ticket.id),
        ];
        let report = self.invalidator.invalidate_by_tags(&tags).await;
        self.touch_ticket(ticket).await;
        info!(ticket_id = ticket.id, deleted = report.deleted, "Ticket mutation invalidated");
        report
    }

    /// Invalidate a full key, or every key containing `target`
    pub async fn invalidate(&self, target: &str) -> InvalidationReport {
        if target.contains(':') {
            let deleted = u64::from(self.invalidator.invalidate_key(target).await);
            InvalidationReport {
                deleted,
                ..Default::default()
            }
        } else {
            let pattern = format!("*{}*", glob::Pattern::escape(target));
            self.invalidator.bulk_invalidate(&[pattern]).await
        }
    }

    // =========================================================================
    // Warm-Up
    // =========================================================================

    /// Warm-up targets for the most requested data
    ///
    /// High-demand listings, statistics of every configured platform,
    /// trending searches and the ticket trends overview.
    pub fn critical_targets(&self) -> Result<Vec<WarmUpTarget>> {
        let mut targets = Vec::new();

        let source = self.source.clone();
        let limit = self.config.high_demand_limit;
        targets.push(WarmUpTarget::new(self.high_demand_request(), move || async move {
            source.high_demand(limit).await
        }));

        for platform in &self.config.platforms {
            let source = self.source.clone();
            let name = platform.clone();
            targets.push(WarmUpTarget::new(self.platform_request(platform), move || async move {
                source.platform_stats(&name).await
            }));
        }

        let empty = TicketQuery::default();
        let limit = self.config.trending_search_limit;
        for term in &self.config.trending_searches {
            let source = self.source.clone();
            let text = term.clone();
            let request = self.search_request(term, &empty, limit)?;
            targets.push(WarmUpTarget::new(request, move || async move {
                source.search(&text, &TicketQuery::default(), limit).await
            }));
        }

        let params = serde_json::Value::Object(Default::default());
        let request = self.analytics_request(AnalyticsKind::TicketTrends, &params)?;
        let source = self.source.clone();
        targets.push(WarmUpTarget::new(request, move || async move {
            source.analytics(AnalyticsKind::TicketTrends, &params).await
        }));

        Ok(targets)
    }

    /// Warm the most requested data, skipping entries already cached
    pub async fn warm_critical(&self, scheduler: &WarmUpScheduler) -> Result<WarmUpReport> {
        let targets = self.critical_targets()?;
        Ok(scheduler.warm_up(targets).await)
    }
}

/// Cache a listing's detail with an event-driven TTL and its availability
async fn store_ticket(store: &TieredCacheStore, policy: &TtlPolicy, ticket: &TicketRecord) -> bool {
    let ttl = policy.resolve_for_event(ticket.event_date.as_deref(), Utc::now());
    let tags = [ticket_tag(ticket.id), platform_tag(&ticket.platform)];

    let detail = CacheLayer::Tickets
        .request_with_ttl(&format!("detail:{}", ticket.id), ttl)
        .with_tags(tags.iter().cloned());
    let availability = CacheLayer::Tickets
        .request_with_ttl(
            &format!("availability:{}", ticket.id),
            policy.resolve(TtlCategory::Short),
        )
        .with_tags(tags);

    let mut stored = false;
    match store.put(&detail, ticket).await {
        Ok(ok) => stored = ok,
        Err(e) => warn!(key = %detail.key, error = %e, "Ticket detail not cached"),
    }
    if let Err(e) = store.put(&availability, &Availability::from(ticket)).await {
        warn!(key = %availability.key, error = %e, "Ticket availability not cached");
    }
    stored
}

// =============================================================================
// Tests
// =============================================================================
