//! Domain Ports - Data the cache sits in front of
//!
//! The relational store and the view engine are external collaborators. The
//! cache only needs the queries below; adapters implement these traits.
//! Port failures are data-source failures, so they use `anyhow` and surface
//! to callers as producer errors.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// User Roles
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Agent,
    Customer,
    Scraper,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Agent => "agent",
            UserRole::Customer => "customer",
            UserRole::Scraper => "scraper",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Ticket Data
// =============================================================================

/// Filter criteria for ticket listings
///
/// Unset fields are omitted from the serialized form so they do not affect
/// the query fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_high_demand: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    /// Earliest event date (`YYYY-MM-DD`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl TicketQuery {
    pub fn for_platform(platform: impl Into<String>) -> Self {
        Self {
            platform: Some(platform.into()),
            ..Default::default()
        }
    }
}

/// A scraped ticket listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    pub id: u64,
    pub title: String,
    pub venue: String,
    /// Event date as stored upstream
    pub event_date: Option<String>,
    pub platform: String,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub is_available: bool,
    pub is_high_demand: bool,
    pub updated_at: Option<String>,
}

/// Availability snapshot of one ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Availability {
    pub ticket_id: u64,
    pub is_available: bool,
    pub last_checked: Option<String>,
    pub price_range: (Option<f64>, Option<f64>),
}

impl From<&TicketRecord> for Availability {
    fn from(ticket: &TicketRecord) -> Self {
        Self {
            ticket_id: ticket.id,
            is_available: ticket.is_available,
            last_checked: ticket.updated_at.clone(),
            price_range: (ticket.min_price, ticket.max_price),
        }
    }
}

/// Aggregate figures for one platform
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformStats {
    pub platform: String,
    pub total_tickets: u64,
    pub available_tickets: u64,
    pub high_demand_tickets: u64,
    pub avg_price: Option<f64>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

/// Analytics datasets served to dashboards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsKind {
    TicketTrends,
    PlatformPerformance,
    PriceAnalysis,
    UserEngagement,
}

impl AnalyticsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticsKind::TicketTrends => "ticket_trends",
            AnalyticsKind::PlatformPerformance => "platform_performance",
            AnalyticsKind::PriceAnalysis => "price_analysis",
            AnalyticsKind::UserEngagement => "user_engagement",
        }
    }
}

/// Per-platform figures within an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformBreakdown {
    pub count: u64,
    pub available_count: u64,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

/// Tickets of one event with price analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTickets {
    pub tickets: Vec<TicketRecord>,
    pub platform_breakdown: BTreeMap<String, PlatformBreakdown>,
    pub cheapest: Option<TicketRecord>,
    pub most_expensive: Option<TicketRecord>,
    pub average_price: Option<f64>,
}

fn min_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn max_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

impl EventTickets {
    /// Aggregate the listings of one event
    pub fn aggregate(mut tickets: Vec<TicketRecord>) -> Self {
        tickets.sort_by(|a, b| {
            a.min_price
                .unwrap_or(f64::INFINITY)
                .total_cmp(&b.min_price.unwrap_or(f64::INFINITY))
        });

        let mut platform_breakdown: BTreeMap<String, PlatformBreakdown> = BTreeMap::new();
        for ticket in &tickets {
            let entry = platform_breakdown.entry(ticket.platform.clone()).or_default();
            entry.count += 1;
            if ticket.is_available {
                entry.available_count += 1;
            }
            entry.min_price = min_opt(entry.min_price, ticket.min_price);
            entry.max_price = max_opt(entry.max_price, ticket.max_price);
        }

        let cheapest = tickets.iter().find(|t| t.min_price.is_some()).cloned();
        let most_expensive = tickets
            .iter()
            .filter(|t| t.max_price.is_some())
            .max_by(|a, b| a.max_price.unwrap_or_default().total_cmp(&b.max_price.unwrap_or_default()))
            .cloned();

        let prices: Vec<f64> = tickets.iter().filter_map(|t| t.min_price).collect();
        let average_price = if prices.is_empty() {
            None
        } else {
            Some(prices.iter().sum::<f64>() / prices.len() as f64)
        };

        Self {
            tickets,
            platform_breakdown,
            cheapest,
            most_expensive,
            average_price,
        }
    }
}

// =============================================================================
// Ports
// =============================================================================

/// Read side of the ticket data store
#[async_trait]
pub trait TicketSource: Send + Sync {
    /// Listings matching the filter criteria
    async fn query_tickets(&self, query: &TicketQuery) -> anyhow::Result<Vec<TicketRecord>>;

    /// Full-text search within the filter criteria
    async fn search(&self, text: &str, query: &TicketQuery, limit: u32) -> anyhow::Result<Vec<TicketRecord>>;

    /// Available high-demand listings, most urgent first
    async fn high_demand(&self, limit: u32) -> anyhow::Result<Vec<TicketRecord>>;

    async fn ticket(&self, id: u64) -> anyhow::Result<Option<TicketRecord>>;

    async fn tickets_by_ids(&self, ids: &[u64]) -> anyhow::Result<Vec<TicketRecord>>;

    async fn platform_stats(&self, platform: &str) -> anyhow::Result<PlatformStats>;

    /// Every listing of an event at a venue
    async fn event_tickets(&self, title: &str, venue: &str) -> anyhow::Result<Vec<TicketRecord>>;

    async fn analytics(&self, kind: AnalyticsKind, params: &serde_json::Value) -> anyhow::Result<serde_json::Value>;

    /// Alerts, preferences and recommendations of a user
    async fn user_tickets(&self, user_id: u64) -> anyhow::Result<serde_json::Value>;
}

/// Template rendering engine
#[async_trait]
pub trait ViewRenderer: Send + Sync {
    async fn render(&self, template: &str, data: &serde_json::Value) -> anyhow::Result<String>;
}

pub type TicketSourceRef = Arc<dyn TicketSource>;
pub type ViewRendererRef = Arc<dyn ViewRenderer>;

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn listing(id: u64, platform: &str, min: Option<f64>, max: Option<f64>) -> TicketRecord {
        TicketRecord {
            id,
            title: "Arsenal vs Chelsea".to_string(),
            venue: "Emirates Stadium".to_string(),
            event_date: None,
            platform: platform.to_string(),
            min_price: min,
            max_price: max,
            is_available: id % 2 == 0,
            is_high_demand: false,
            updated_at: None,
        }
    }

    #[test]
    fn test_event_aggregation() {
        let event = EventTickets::aggregate(vec![
            listing(1, "stubhub", Some(80.0), Some(120.0)),
            listing(2, "stubhub", Some(60.0), Some(300.0)),
            listing(3, "viagogo", None, None),
            listing(4, "viagogo", Some(100.0), Some(150.0)),
        ]);

        assert_eq!(event.tickets.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2, 1, 4, 3]);
        assert_eq!(event.cheapest.as_ref().map(|t| t.id), Some(2));
        assert_eq!(event.most_expensive.as_ref().map(|t| t.id), Some(2));
        assert_eq!(event.average_price, Some(80.0));

        let stubhub = &event.platform_breakdown["stubhub"];
        assert_eq!(stubhub.count, 2);
        assert_eq!(stubhub.available_count, 1);
        assert_eq!(stubhub.min_price, Some(60.0));
        assert_eq!(stubhub.max_price, Some(300.0));
        assert_eq!(event.platform_breakdown["viagogo"].min_price, Some(100.0));
    }

    #[test]
    fn test_empty_event() {
        let event = EventTickets::aggregate(Vec::new());
        assert!(event.cheapest.is_none());
        assert_eq!(event.average_price, None);
    }

    #[test]
    fn test_unset_filters_are_omitted() {
        let query = TicketQuery::for_platform("stubhub");
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json, serde_json::json!({"platform": "stubhub"}));
    }
}
