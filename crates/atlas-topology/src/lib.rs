//! # Atlas Topology
//!
//! The dependency ledger: directed `source → target` call relationships
//! between registered services, and the topology snapshot built from them.
//!
//! Referential checks live in [`validate`] and are shared with the route
//! table.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod ledger;
pub mod validate;

pub use ledger::DependencyLedger;
pub use validate::{require_gateway, require_service};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::ledger::DependencyLedger;
    pub use crate::validate::{require_gateway, require_service};
}
