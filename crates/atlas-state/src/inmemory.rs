//! In-memory state backend implementation

use crate::{Snapshot, StateBackend};
use async_trait::async_trait;
use atlas_core::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::trace;

/// In-memory state backend
///
/// Keeps the last saved snapshot in process memory. Nothing survives a
/// restart; useful for tests and throwaway deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    snapshot: Arc<RwLock<Option<Snapshot>>>,
}

impl InMemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateBackend for InMemoryBackend {
    async fn load(&self) -> Result<Option<Snapshot>> {
        Ok(self.snapshot.read().clone())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        trace!(services = snapshot.services.len(), "InMemory SAVE");
        *self.snapshot.write() = Some(snapshot.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::{ServiceDescriptor, ServiceRecord};
    use chrono::Utc;

    #[tokio::test]
    async fn test_save_then_load() {
        let backend = InMemoryBackend::new();
        let snapshot = Snapshot {
            services: vec![ServiceRecord::new(
                "deckview",
                ServiceDescriptor::new("DeckView", "127.0.0.1", 8000),
                Utc::now(),
            )],
            ..Default::default()
        };
        backend.save(&snapshot).await.unwrap();

        let loaded = backend.load().await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        let clone = backend.clone();
        assert!(clone.load().await.unwrap().is_some());
    }
}
