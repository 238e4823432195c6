//! Cache Configuration
//!
//! All settings have defaults; a YAML file only needs the values it changes.

use crate::cache::backend::{MemoryBackendConfig, PersistentBackendConfig};
use crate::cache::diagnostics::HealthThresholds;
use crate::cache::invalidation::InvalidationMode;
use crate::cache::ttl::{TtlTable, MAX_TTL};
use crate::error::{Error, Result};
use crate::services::tickets::TicketCacheConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on fast tier TTLs, in seconds
    pub fast_ttl_ceiling_secs: u64,
    /// Coalesce concurrent misses on the same key
    pub single_flight: bool,
    /// Abort producers that run longer than this
    pub producer_timeout_secs: Option<u64>,
    /// How tag invalidation resolves keys
    pub invalidation_mode: InvalidationMode,
    /// Category durations
    pub ttl: TtlTable,
    /// Fast tier settings
    pub memory: MemoryBackendConfig,
    /// Slow tier settings
    pub persistent: PersistentBackendConfig,
    /// Slow tier snapshot restored at startup and written at shutdown
    pub snapshot_path: Option<PathBuf>,
    /// Capacity of the event broadcast channel
    pub event_channel_capacity: usize,
    /// Health assessment thresholds
    pub health: HealthThresholds,
    /// Ticket facade settings
    pub tickets: TicketCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fast_ttl_ceiling_secs: 300,
            single_flight: true,
            producer_timeout_secs: None,
            invalidation_mode: InvalidationMode::Exact,
            ttl: TtlTable::default(),
            memory: MemoryBackendConfig::default(),
            persistent: PersistentBackendConfig::default(),
            snapshot_path: None,
            event_channel_capacity: 1024,
            health: HealthThresholds::default(),
            tickets: TicketCacheConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Parse configuration from YAML text
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Reject settings the cache cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.fast_ttl_ceiling_secs == 0 {
            return Err(Error::Configuration(
                "fast_ttl_ceiling_secs must be greater than zero".to_string(),
            ));
        }
        if self.fast_ttl_ceiling() > MAX_TTL {
            return Err(Error::Configuration(format!(
                "fast_ttl_ceiling_secs must be at most {}",
                MAX_TTL.as_secs()
            )));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::Configuration(
                "event_channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.producer_timeout_secs == Some(0) {
            return Err(Error::Configuration(
                "producer_timeout_secs must be greater than zero when set".to_string(),
            ));
        }
        self.ttl.validate()?;
        self.health.validate()
    }

    /// Fast tier TTL ceiling
    pub fn fast_ttl_ceiling(&self) -> Duration {
        Duration::from_secs(self.fast_ttl_ceiling_secs)
    }

    /// Producer timeout, if any
    pub fn producer_timeout(&self) -> Option<Duration> {
        self.producer_timeout_secs.map(Duration::from_secs)
    }
}
