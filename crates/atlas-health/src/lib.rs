//! # Atlas Health System
//!
//! Fuses two independent liveness channels into one status per service:
//! - Active probes: the [`Prober`] issues HTTP checks on a recurring tick
//! - Passive heartbeats: services report in through the API
//!
//! The [`HealthEngine`] is the only writer of a record's health fields.
//! A service is healthy while either channel recently confirmed it, and
//! becomes unhealthy only once both are stale or failing.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod checker;
pub mod engine;
pub mod prober;

pub use checker::{HealthCheck, HttpHealthCheck, ProbeOutcome};
pub use engine::{EngineConfig, HealthEngine};
pub use prober::{Prober, ProberConfig, TickSummary};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::checker::{HealthCheck, HttpHealthCheck, ProbeOutcome};
    pub use crate::engine::{EngineConfig, HealthEngine};
    pub use crate::prober::{Prober, ProberConfig, TickSummary};
}
