//! Domain layer - Ticket data types and port definitions
//!
//! This module defines the traits (ports) that data-store and view-engine
//! adapters implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
