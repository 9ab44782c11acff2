//! # Atlas Gateway Forwarder
//!
//! Streams inbound gateway requests to the target of the best matching
//! route rule and relays the upstream response:
//! - Route resolution via [`atlas_router::RouteTable`]
//! - Target health gate (`unhealthy` targets are refused, `unknown` ones tried)
//! - Path rewrite and hop-by-hop header filtering
//! - Bounded time to response headers; bodies stream in both directions

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod body;
pub mod client;
pub mod forwarder;
pub mod headers;

pub use body::{empty, full, ProxyBody};
pub use client::{ClientConfig, HttpClient};
pub use forwarder::{Forwarder, ForwarderConfig};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::body::{empty, full, ProxyBody};
    pub use crate::client::{ClientConfig, HttpClient};
    pub use crate::forwarder::{Forwarder, ForwarderConfig};
}
