//! TTL Policy Engine
//!
//! Maps the semantic category of an entry to a concrete expiration. Ticket
//! entries derive their TTL from the time remaining until the event.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

// =============================================================================
// TTL Category
// =============================================================================

/// Semantic TTL category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlCategory {
    /// Real-time data (30s)
    UltraShort,
    /// Frequently changing data (2m)
    Short,
    /// Moderately stable data (5m)
    Medium,
    /// Less frequent data (15m)
    Long,
    /// Stable data (1h)
    Extended,
    /// Daily statistics (24h)
    Daily,
    /// Explicit duration
    Custom(Duration),
}

/// Longest TTL the cache accepts
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

// =============================================================================
// TTL Table
// =============================================================================

/// Durations for each category, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlTable {
    pub ultra_short_secs: u64,
    pub short_secs: u64,
    pub medium_secs: u64,
    pub long_secs: u64,
    pub extended_secs: u64,
    pub daily_secs: u64,
}

impl TtlTable {
    /// Reject durations above [`MAX_TTL`]
    pub fn validate(&self) -> Result<()> {
        let entries = [
            ("ultra_short_secs", self.ultra_short_secs),
            ("short_secs", self.short_secs),
            ("medium_secs", self.medium_secs),
            ("long_secs", self.long_secs),
            ("extended_secs", self.extended_secs),
            ("daily_secs", self.daily_secs),
        ];
        for (name, secs) in entries {
            if secs > MAX_TTL.as_secs() {
                return Err(Error::Configuration(format!(
                    "ttl.{name} must be at most {}, got {secs}",
                    MAX_TTL.as_secs()
                )));
            }
        }
        Ok(())
    }
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            ultra_short_secs: 30,
            short_secs: 120,
            medium_secs: 300,
            long_secs: 900,
            extended_secs: 3600,
            daily_secs: 86400,
        }
    }
}

// =============================================================================
// Fragment Kind
// =============================================================================

/// Volatility class of a rendered fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    /// Rarely changes (navigation, footer)
    Static,
    /// Changes a few times an hour
    SemiStatic,
    /// Driven by live data
    Dynamic,
    /// Refreshed every minute
    RealTime,
}

impl FragmentKind {
    /// TTL for fragments of this kind
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(match self {
            FragmentKind::Static => 3600,
            FragmentKind::SemiStatic => 1800,
            FragmentKind::Dynamic => 300,
            FragmentKind::RealTime => 60,
        })
    }
}

// =============================================================================
// TTL Policy
// =============================================================================

/// Resolves TTL categories and event dates to durations
#[derive(Debug, Clone, Default)]
pub struct TtlPolicy {
    table: TtlTable,
}

impl TtlPolicy {
    /// Create a policy from a TTL table
    pub fn new(table: TtlTable) -> Self {
        Self { table }
    }

    /// Get the underlying table
    pub fn table(&self) -> &TtlTable {
        &self.table
    }

    /// Resolve a category to a duration
    pub fn resolve(&self, category: TtlCategory) -> Duration {
        let secs = match category {
            TtlCategory::UltraShort => self.table.ultra_short_secs,
            TtlCategory::Short => self.table.short_secs,
            TtlCategory::Medium => self.table.medium_secs,
            TtlCategory::Long => self.table.long_secs,
            TtlCategory::Extended => self.table.extended_secs,
            TtlCategory::Daily => self.table.daily_secs,
            TtlCategory::Custom(d) => return d.min(MAX_TTL),
        };
        Duration::from_secs(secs)
    }

    /// Resolve the TTL of a ticket entry from its event date
    ///
    /// Events at most one day away (including past events) use the long
    /// category, events within a week use extended, anything further out
    /// uses daily. A missing or unparseable date falls back to extended.
    pub fn resolve_for_event(&self, event_date: Option<&str>, now: DateTime<Utc>) -> Duration {
        let Some(raw) = event_date else {
            warn!("Ticket has no event date, using default TTL");
            return self.resolve(TtlCategory::Extended);
        };

        let Some(event_at) = parse_event_date(raw) else {
            warn!(event_date = %raw, "Unparseable event date, using default TTL");
            return self.resolve(TtlCategory::Extended);
        };

        let days_until = (event_at - now).num_seconds() as f64 / 86_400.0;
        self.resolve(category_for_days(days_until))
    }
}

fn category_for_days(days_until: f64) -> TtlCategory {
    if days_until <= 1.0 {
        TtlCategory::Long
    } else if days_until <= 7.0 {
        TtlCategory::Extended
    } else {
        TtlCategory::Daily
    }
}

/// Parse an event date in RFC 3339, `%Y-%m-%d %H:%M:%S` or `%Y-%m-%d` form
pub fn parse_event_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
