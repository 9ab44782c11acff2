//! State backend trait definition

use crate::{FileBackend, InMemoryBackend, Snapshot, StorageConfig};
use async_trait::async_trait;
use atlas_core::Result;
use std::sync::Arc;
use tracing::info;

/// State backend trait
///
/// Persists whole [`Snapshot`]s. The in-memory registry stays authoritative;
/// backends only need to survive restarts.
#[async_trait]
pub trait StateBackend: Send + Sync + std::fmt::Debug + 'static {
    /// Load the latest snapshot, `None` if nothing was saved yet
    async fn load(&self) -> Result<Option<Snapshot>>;

    /// Replace the stored snapshot
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;

    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Health check - verify the backend is reachable
    async fn health_check(&self) -> Result<()> {
        self.load().await.map(|_| ())
    }
}

/// Open the backend described by `config`
pub async fn open_backend(config: &StorageConfig) -> Result<Arc<dyn StateBackend>> {
    let backend: Arc<dyn StateBackend> = match config {
        StorageConfig::Memory => Arc::new(InMemoryBackend::new()),
        StorageConfig::File { path } => Arc::new(FileBackend::new(path)),
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { url } => Arc::new(crate::SqliteBackend::connect(url).await?),
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => {
            return Err(atlas_core::Error::Config(
                "sqlite storage requires the `sqlite` feature".to_string(),
            ))
        }
    };

    info!(backend = backend.name(), "State backend opened");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::Error;

    #[tokio::test]
    async fn test_open_memory_backend() {
        let backend = open_backend(&StorageConfig::Memory).await.unwrap();
        assert_eq!(backend.name(), "memory");
        assert!(backend.load().await.unwrap().is_none());
        backend.health_check().await.unwrap();
    }

    #[cfg(not(feature = "sqlite"))]
    #[tokio::test]
    async fn test_sqlite_requires_feature() {
        let config = StorageConfig::Sqlite {
            url: "sqlite://atlas.db".to_string(),
        };
        let err = open_backend(&config).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
