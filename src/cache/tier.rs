//! Cache Tier Definitions
//!
//! Defines the two-tier hierarchy and the fixed order in which tiers are
//! read and written.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// =============================================================================
// TTL Ceiling
// =============================================================================

/// Default ceiling for entries written to the fast tier: 5 minutes
pub const DEFAULT_FAST_TTL_CEILING: Duration = Duration::from_secs(300);

// =============================================================================
// Cache Tier
// =============================================================================

/// Cache tier representing the storage hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Low-latency volatile tier with a capped TTL
    #[default]
    Fast,
    /// Authoritative tier holding the full requested TTL
    Slow,
}

impl CacheTier {
    /// Tiers in lookup order (fast -> slow)
    pub fn lookup_order() -> &'static [CacheTier] {
        &[CacheTier::Fast, CacheTier::Slow]
    }

    /// Tiers in write order (fast -> slow)
    pub fn write_order() -> &'static [CacheTier] {
        &[CacheTier::Fast, CacheTier::Slow]
    }

    /// Whether a failure in this tier is only worth a warning
    pub fn is_best_effort(&self) -> bool {
        matches!(self, CacheTier::Fast)
    }

    /// Get the TTL to use when writing an entry with `ttl` into this tier
    pub fn effective_ttl(&self, ttl: Duration, fast_ceiling: Duration) -> Duration {
        match self {
            CacheTier::Fast => ttl.min(fast_ceiling),
            CacheTier::Slow => ttl,
        }
    }

    /// Short label used in metrics and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::Fast => "fast",
            CacheTier::Slow => "slow",
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_order_is_fast_then_slow() {
        assert_eq!(CacheTier::lookup_order(), &[CacheTier::Fast, CacheTier::Slow]);
        assert_eq!(CacheTier::write_order(), &[CacheTier::Fast, CacheTier::Slow]);
    }

    #[test]
    fn test_effective_ttl() {
        let ceiling = DEFAULT_FAST_TTL_CEILING;
        let long = Duration::from_secs(3600);
        let short = Duration::from_secs(30);

        assert_eq!(CacheTier::Fast.effective_ttl(long, ceiling), ceiling);
        assert_eq!(CacheTier::Fast.effective_ttl(short, ceiling), short);
        assert_eq!(CacheTier::Slow.effective_ttl(long, ceiling), long);
    }

    #[test]
    fn test_display() {
        assert_eq!(CacheTier::Fast.to_string(), "fast");
        assert_eq!(CacheTier::Slow.to_string(), "slow");
        assert!(CacheTier::Fast.is_best_effort());
        assert!(!CacheTier::Slow.is_best_effort());
    }
}
