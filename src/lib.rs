//! Ticket Cache - Multi-Layer Caching Engine
//!
//! Read-through caching for a ticket aggregation service: a fast in-memory
//! tier in front of an authoritative slow tier, tag and pattern
//! invalidation, warm-up, rendered fragment caching and diagnostics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              Admin API (axum)                                │
//! │        /health  /ready  /metrics  /v1/cache/{stats,health,invalidate}        │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │        Ticket Cache         │  │           View Fragments            │   │
//! │  │  (TicketSource port)        │  │        (ViewRenderer port)          │   │
//! │  └──────────────┬──────────────┘  └──────────────────┬──────────────────┘   │
//! │                 └──────────────────┬─────────────────┘                       │
//! │                        ┌───────────┴───────────┐                             │
//! │                        │   Tiered Cache Store  │                             │
//! │                        │  fast -> slow -> fn   │                             │
//! │                        └───────────────────────┘                             │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │   Invalidator  •  Warm-Up Scheduler  •  Diagnostics  •  Tag Index           │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`cache`]: Tiered store, backends, invalidation, warm-up and diagnostics
//! - [`services`]: Ticket and view-fragment caching on top of the store
//! - [`admin`]: Administrative HTTP API
//! - [`domain`]: Ticket data types and ports
//! - [`config`]: YAML configuration
//! - [`error`]: Error types and handling

pub mod admin;
pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;

// Re-export commonly used types
pub use admin::{AdminServer, AdminServerConfig, AdminState, RestRouter};

pub use cache::{
    CacheBackend, CacheEvent, CacheLayer, CacheRequest, CacheTier, Diagnostics, FragmentCache,
    FragmentContext, FragmentKind, HealthReport, HealthStatus, InvalidationMode,
    InvalidationReport, Invalidator, MemoryBackend, PersistentBackend, QueryFingerprint,
    StoreConfig, TieredCacheStore, TtlCategory, TtlPolicy, WarmUpReport, WarmUpScheduler,
    WarmUpTarget,
};

pub use config::CacheConfig;

pub use domain::ports::{
    TicketQuery, TicketRecord, TicketSource, TicketSourceRef, UserRole, ViewRenderer,
    ViewRendererRef,
};

pub use error::{Error, FailureAction, Result};

pub use services::{TicketCache, TicketCacheConfig, ViewFragments};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
