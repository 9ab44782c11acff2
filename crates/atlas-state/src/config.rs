//! Configuration for state backends

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where snapshots are persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Keep snapshots in memory only (default)
    #[default]
    Memory,

    /// JSON snapshot file
    File {
        /// Snapshot path
        path: PathBuf,
    },

    /// SQLite database (requires the `sqlite` feature)
    Sqlite {
        /// Connection URL, e.g. `sqlite://atlas.db`
        url: String,
    },
}
