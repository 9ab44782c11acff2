//! # Atlas Core
//!
//! Core types and error handling for the ServiceAtlas registry.
//!
//! This crate provides the vocabulary shared by every other crate:
//! - Service records, their registration spec and health state
//! - Dependency edges and topology snapshots
//! - Gateway route rules
//! - The error taxonomy and its HTTP mapping

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used HTTP types
pub use http::{Method, StatusCode};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::types::*;
}
