//! # Atlas Runtime
//!
//! Application runtime and lifecycle management with:
//! - The [`Atlas`] facade over registry, health engine, ledger and router
//! - Restore-then-preload startup and snapshot persistence
//! - The registry REST API and gateway forwarding endpoint
//! - Server lifecycle with graceful shutdown and signal handling

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod api;
pub mod atlas;
pub mod handler;
pub mod server;
pub mod shutdown;

pub use api::ApiHandler;
pub use atlas::{Atlas, GatewayRoute, Overview, PreloadSummary, RouteTarget, ServiceFilter};
pub use handler::RequestHandler;
pub use server::{Server, ServerBuilder};
pub use shutdown::{ShutdownSignal, SignalHandler};

/// Runtime state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Server is initializing
    Initializing,
    /// Server is running
    Running,
    /// Server is shutting down
    ShuttingDown,
    /// Server is stopped
    Stopped,
}

/// Re-export commonly used types
pub mod prelude {
    pub use crate::atlas::{Atlas, ServiceFilter};
    pub use crate::server::{Server, ServerBuilder};
    pub use crate::shutdown::{ShutdownSignal, SignalHandler};
    pub use crate::RuntimeState;
}
