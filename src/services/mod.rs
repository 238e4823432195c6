//! Domain services on top of the cache
//!
//! - [`tickets`]: cached ticket queries, aggregates and critical warm-up
//! - [`views`]: named page fragments

pub mod tickets;
pub mod views;

pub use tickets::{TicketCache, TicketCacheConfig};
pub use views::{FragmentWarmUp, ViewFragments};
