//! Cache Events
//!
//! Events emitted by the store for monitoring and observability.

use crate::cache::tier::CacheTier;
use serde::{Deserialize, Serialize};

/// Events emitted by the cache system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheEvent {
    /// Value served from a tier
    Hit { key: String, tier: CacheTier },

    /// Value found in no tier
    Miss { key: String },

    /// Value written to a tier
    Put {
        key: String,
        tier: CacheTier,
        size_bytes: u64,
        ttl_secs: u64,
    },

    /// Slow tier hit copied into the fast tier
    Backfill { key: String, ttl_secs: u64 },

    /// Entry removed by an invalidation
    Evict { key: String, reason: EvictionReason },

    /// Tag invalidation finished
    TagsInvalidated { tags: Vec<String>, keys_removed: u64 },

    /// Pattern invalidation finished
    PatternsInvalidated {
        patterns: Vec<String>,
        keys_removed: u64,
        failures: usize,
    },

    /// Both tiers were emptied by an administrative flush
    Flushed,

    /// Tier operation failed
    TierUnavailable { tier: CacheTier, reason: String },

    /// Stored payload could not be decoded
    CorruptedEntry {
        key: String,
        tier: CacheTier,
        error: String,
    },

    /// Producer returned an error
    ProducerFailed { key: String, error: String },

    /// Warm-up batch completed
    WarmUpComplete {
        computed: usize,
        skipped: usize,
        failed: usize,
        duration_ms: u64,
    },
}

/// Reason for removing an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    /// Explicit key invalidation
    Manual,
    /// Member of an invalidated tag
    Tag,
    /// Matched an invalidation pattern
    Pattern,
    /// Stored bytes could not be decoded
    Corrupted,
}

impl std::fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionReason::Manual => write!(f, "manual"),
            EvictionReason::Tag => write!(f, "tag"),
            EvictionReason::Pattern => write!(f, "pattern"),
            EvictionReason::Corrupted => write!(f, "corrupted"),
        }
    }
}

impl CacheEvent {
    /// Create a Hit event
    pub fn hit(key: &str, tier: CacheTier) -> Self {
        CacheEvent::Hit {
            key: key.to_string(),
            tier,
        }
    }

    /// Create a Miss event
    pub fn miss(key: &str) -> Self {
        CacheEvent::Miss {
            key: key.to_string(),
        }
    }

    /// Create a Put event
    pub fn put(key: &str, tier: CacheTier, size_bytes: u64, ttl_secs: u64) -> Self {
        CacheEvent::Put {
            key: key.to_string(),
            tier,
            size_bytes,
            ttl_secs,
        }
    }

    /// Create an Evict event
    pub fn evict(key: &str, reason: EvictionReason) -> Self {
        CacheEvent::Evict {
            key: key.to_string(),
            reason,
        }
    }

    /// Get the key associated with this event (if any)
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheEvent::Hit { key, .. }
            | CacheEvent::Miss { key }
            | CacheEvent::Put { key, .. }
            | CacheEvent::Backfill { key, .. }
            | CacheEvent::Evict { key, .. }
            | CacheEvent::CorruptedEntry { key, .. }
            | CacheEvent::ProducerFailed { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Get the tier associated with this event (if any)
    pub fn tier(&self) -> Option<CacheTier> {
        match self {
            CacheEvent::Hit { tier, .. }
            | CacheEvent::Put { tier, .. }
            | CacheEvent::TierUnavailable { tier, .. }
            | CacheEvent::CorruptedEntry { tier, .. } => Some(*tier),
            CacheEvent::Backfill { .. } => Some(CacheTier::Fast),
            _ => None,
        }
    }

    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CacheEvent::TierUnavailable { .. }
                | CacheEvent::CorruptedEntry { .. }
                | CacheEvent::ProducerFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let hit = CacheEvent::hit("tickets:detail:42", CacheTier::Slow);
        assert_eq!(hit.key(), Some("tickets:detail:42"));
        assert_eq!(hit.tier(), Some(CacheTier::Slow));
        assert!(!hit.is_error());

        let unavailable = CacheEvent::TierUnavailable {
            tier: CacheTier::Fast,
            reason: "connection refused".to_string(),
        };
        assert!(unavailable.is_error());
        assert_eq!(unavailable.key(), None);
    }

    #[test]
    fn test_serialized_form_is_tagged() {
        let event = CacheEvent::evict("search:abc", EvictionReason::Tag);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "evict");
        assert_eq!(json["reason"], "tag");
        assert_eq!(EvictionReason::Pattern.to_string(), "pattern");
    }
}
