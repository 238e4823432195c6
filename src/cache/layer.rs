//! Cache Layers
//!
//! Named key spaces sharing a default TTL and tag set. Layers that derive
//! their data from another layer list it as a dependent so invalidating the
//! source can cascade.

use crate::cache::store::CacheRequest;
use crate::cache::ttl::{TtlCategory, TtlPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Logical cache layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLayer {
    Tickets,
    Events,
    Platforms,
    Search,
    Users,
    Analytics,
    Monitoring,
    System,
    Fragments,
}

impl CacheLayer {
    /// Every layer
    pub fn all() -> &'static [CacheLayer] {
        &[
            CacheLayer::Tickets,
            CacheLayer::Events,
            CacheLayer::Platforms,
            CacheLayer::Search,
            CacheLayer::Users,
            CacheLayer::Analytics,
            CacheLayer::Monitoring,
            CacheLayer::System,
            CacheLayer::Fragments,
        ]
    }

    /// Parse a layer name
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        Self::all().iter().copied().find(|layer| layer.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheLayer::Tickets => "tickets",
            CacheLayer::Events => "events",
            CacheLayer::Platforms => "platforms",
            CacheLayer::Search => "search",
            CacheLayer::Users => "users",
            CacheLayer::Analytics => "analytics",
            CacheLayer::Monitoring => "monitoring",
            CacheLayer::System => "system",
            CacheLayer::Fragments => "fragments",
        }
    }

    /// Key namespace
    pub fn prefix(&self) -> &'static str {
        match self {
            CacheLayer::Fragments => "view_fragments",
            other => other.as_str(),
        }
    }

    /// TTL category used when a caller does not pick one
    pub fn default_ttl(&self) -> TtlCategory {
        match self {
            CacheLayer::Tickets => TtlCategory::Medium,
            CacheLayer::Events => TtlCategory::Extended,
            CacheLayer::Platforms => TtlCategory::Long,
            CacheLayer::Search => TtlCategory::Short,
            CacheLayer::Users => TtlCategory::Extended,
            CacheLayer::Analytics => TtlCategory::Extended,
            CacheLayer::Monitoring => TtlCategory::UltraShort,
            CacheLayer::System => TtlCategory::Daily,
            CacheLayer::Fragments => TtlCategory::Medium,
        }
    }

    /// Tags attached to every entry of the layer
    pub fn tags(&self) -> &'static [&'static str] {
        match self {
            CacheLayer::Tickets => &["tickets", "pricing"],
            CacheLayer::Events => &["events", "sports"],
            CacheLayer::Platforms => &["platforms"],
            CacheLayer::Search => &["search"],
            CacheLayer::Users => &["users", "profiles"],
            CacheLayer::Analytics => &["analytics", "metrics"],
            CacheLayer::Monitoring => &["monitoring", "scraping"],
            CacheLayer::System => &["system", "config"],
            CacheLayer::Fragments => &["fragments"],
        }
    }

    /// Layers whose entries are stale once this layer changes
    pub fn dependents(&self) -> &'static [CacheLayer] {
        match self {
            CacheLayer::Events => &[CacheLayer::Tickets, CacheLayer::Monitoring],
            CacheLayer::Tickets => &[CacheLayer::Events],
            CacheLayer::Monitoring => &[CacheLayer::Tickets, CacheLayer::Events],
            CacheLayer::Analytics => &[CacheLayer::Events, CacheLayer::Tickets],
            _ => &[],
        }
    }

    /// Storage key of `id` within the layer
    pub fn key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix(), id)
    }

    /// Glob matching every key of the layer
    pub fn pattern(&self) -> String {
        format!("{}:*", self.prefix())
    }

    /// Request for `id` using the layer defaults
    pub fn request(&self, id: &str, policy: &TtlPolicy) -> CacheRequest {
        self.request_with_ttl(id, policy.resolve(self.default_ttl()))
    }

    /// Request for `id` carrying the layer tags, with an explicit TTL
    pub fn request_with_ttl(&self, id: &str, ttl: Duration) -> CacheRequest {
        CacheRequest::new(self.key(id), ttl)
            .with_tags(self.tags().iter().copied())
            .with_category(self.as_str())
    }
}

impl fmt::Display for CacheLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ttl::TtlTable;

    #[test]
    fn test_parse_round_trips_names() {
        for layer in CacheLayer::all() {
            assert_eq!(CacheLayer::parse(layer.as_str()), Some(*layer));
        }
        assert_eq!(CacheLayer::parse(" Tickets "), Some(CacheLayer::Tickets));
        assert_eq!(CacheLayer::parse("purchases"), None);
    }

    #[test]
    fn test_dependents_never_include_self() {
        for layer in CacheLayer::all() {
            assert!(!layer.dependents().contains(layer));
        }
        assert_eq!(
            CacheLayer::Events.dependents(),
            &[CacheLayer::Tickets, CacheLayer::Monitoring]
        );
        assert!(CacheLayer::Users.dependents().is_empty());
    }

    #[test]
    fn test_request_uses_layer_defaults() {
        let policy = TtlPolicy::new(TtlTable::default());
        let request = CacheLayer::Platforms.request("stats:stubhub", &policy);

        assert_eq!(request.key, "platforms:stats:stubhub");
        assert_eq!(request.ttl, Duration::from_secs(900));
        assert_eq!(request.tags, vec!["platforms"]);
        assert_eq!(request.category(), "platforms");

        let request = CacheLayer::Users.request_with_ttl("tickets:7", Duration::from_secs(60));
        assert_eq!(request.key, "users:tickets:7");
        assert_eq!(request.ttl, Duration::from_secs(60));
        assert_eq!(request.tags, vec!["users", "profiles"]);

        assert_eq!(CacheLayer::Fragments.key("nav"), "view_fragments:nav");
        assert_eq!(CacheLayer::Fragments.pattern(), "view_fragments:*");
    }
}
