//! Multi-Layer Caching Engine
//!
//! A two-tier read-through cache for ticket data and rendered fragments:
//! - **Fast tier**: in-memory accelerator with a capped TTL
//! - **Slow tier**: authoritative store holding the full requested TTL
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │        Ticket facade / Fragment cache / Warm-up / Invalidator           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                        Tiered Cache Store                                │
//! │  get_or_compute: fast -> slow (backfill) -> producer (single-flight)    │
//! │  ┌──────────────┐  ┌──────────────────────────┐  ┌─────────────────┐    │
//! │  │  Fast Tier   │  │        Slow Tier         │  │    Tag Index    │    │
//! │  │  (DashMap)   │  │ (compressed, prefixed)   │  │ tag <-> key     │    │
//! │  │  TTL <= 300s │  │      full TTL            │  │                 │    │
//! │  └──────────────┘  └──────────────────────────┘  └─────────────────┘    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  TTL policy • Fingerprinted keys • Layers with cascading invalidation   │
//! │  Cache-line aligned metrics • Event stream • Health diagnostics          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ticket_cache::cache::{
//!     InvalidationMode, Invalidator, MemoryBackend, PersistentBackend, TieredCacheStore,
//! };
//!
//! let store = Arc::new(TieredCacheStore::new(
//!     Arc::new(MemoryBackend::new()),
//!     Arc::new(PersistentBackend::new()),
//! ));
//!
//! let ticket: Ticket = store
//!     .get_or_compute("ticket:42", Duration::from_secs(300), || async {
//!         Ok(load_ticket(42).await?)
//!     })
//!     .await?;
//!
//! let invalidator = Invalidator::new(store.clone(), InvalidationMode::Exact);
//! invalidator.invalidate_key("ticket:42").await;
//! ```

pub mod backend;
pub mod compression;
pub mod diagnostics;
pub mod entry;
pub mod events;
pub mod fingerprint;
pub mod fragment;
pub mod index;
pub mod invalidation;
pub mod layer;
pub mod metrics;
pub mod store;
pub mod tier;
pub mod ttl;
pub mod warmup;

// Re-export main types
pub use backend::{
    BackendInfo, CacheBackend, CacheBackendRef, MemoryBackend, MemoryBackendConfig,
    PersistentBackend, PersistentBackendConfig,
};
pub use compression::{Codec, CompressionConfig};
pub use diagnostics::{CacheStats, Diagnostics, HealthReport, HealthStatus, HealthThresholds};
pub use entry::{CacheEntry, CacheKey, CompressionAlgorithm};
pub use events::{CacheEvent, EvictionReason};
pub use fingerprint::{fingerprint, QueryFingerprint};
pub use fragment::{FragmentCache, FragmentContext};
pub use index::TagIndex;
pub use invalidation::{InvalidationMode, InvalidationReport, Invalidator};
pub use layer::CacheLayer;
pub use metrics::{CacheMetrics, MetricsSnapshot, TierMetricsSnapshot};
pub use store::{CacheRequest, StoreConfig, TierHealth, TieredCacheStore};
pub use tier::{CacheTier, DEFAULT_FAST_TTL_CEILING};
pub use ttl::{FragmentKind, TtlCategory, TtlPolicy, TtlTable};
pub use warmup::{WarmUpOutcome, WarmUpReport, WarmUpScheduler, WarmUpTarget};
