//! # Atlas State
//!
//! The ServiceRecord store and its durable snapshot backends.
//!
//! - [`ServiceRegistry`]: the authoritative in-memory map of service records,
//!   with one lock per record so health updates for different services never
//!   contend with each other or with readers.
//! - [`StateBackend`]: pluggable snapshot persistence.
//!
//! ## Backends
//!
//! - **InMemory**: no durability, used by tests and ephemeral deployments (default)
//! - **File**: JSON snapshot written atomically to a local path
//! - **SQLite**: rows in a local database (`sqlite` feature)
//!
//! ## Example
//!
//! ```rust
//! use atlas_core::ServiceDescriptor;
//! use atlas_state::ServiceRegistry;
//!
//! let registry = ServiceRegistry::new();
//! let descriptor = ServiceDescriptor::new("DeckView", "127.0.0.1", 8000);
//! registry.upsert("deckview", descriptor, chrono::Utc::now());
//! assert!(registry.contains("deckview"));
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

mod backend;
mod config;
mod file;
mod inmemory;
mod registry;
mod snapshot;

#[cfg(feature = "sqlite")]
mod sqlite_backend;

pub use backend::{open_backend, StateBackend};
pub use config::StorageConfig;
pub use file::FileBackend;
pub use inmemory::InMemoryBackend;
pub use registry::{ServiceRegistry, Upsert};
pub use snapshot::Snapshot;

#[cfg(feature = "sqlite")]
pub use sqlite_backend::SqliteBackend;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{open_backend, StateBackend};
    pub use crate::config::StorageConfig;
    pub use crate::file::FileBackend;
    pub use crate::inmemory::InMemoryBackend;
    pub use crate::registry::{ServiceRegistry, Upsert};
    pub use crate::snapshot::Snapshot;

    #[cfg(feature = "sqlite")]
    pub use crate::sqlite_backend::SqliteBackend;
}
