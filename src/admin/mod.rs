//! Admin API Module
//!
//! HTTP surface for operating the cache: health probes, Prometheus metrics,
//! statistics and invalidation.

pub mod rest;
pub mod server;

pub use rest::{AdminState, ApiErrorResponse, FlushRequest, InvalidateRequest, RestRouter};
pub use server::{AdminServer, AdminServerConfig};
