//! # Atlas Router
//!
//! Per-gateway route rules and path resolution:
//! - Patterns are compiled once into a literal prefix plus a wildcard kind
//! - The most specific rule (longest literal prefix) wins
//! - Ties go to the rule created first
//! - Disabled rules never match
//!
//! ## Pattern syntax
//!
//! - `/docs` matches exactly `/docs`
//! - `/docs/*` and `/docs/**` match `/docs` and anything under `/docs/`
//! - `/docs*` matches any path starting with `/docs`

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod matcher;
pub mod table;

pub use matcher::{PathPattern, PatternKind};
pub use table::{CompiledRoute, RouteTable};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::matcher::{PathPattern, PatternKind};
    pub use crate::table::{CompiledRoute, RouteTable};
}
