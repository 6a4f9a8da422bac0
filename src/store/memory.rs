use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ArtifactDocument, ArtifactStage, ArtifactStore, ArtifactStoreError};

/// In-process store with the same write-once contract as the filesystem store.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    documents: RwLock<HashMap<(Uuid, ArtifactStage), ArtifactDocument>>,
}

impl MemoryArtifactStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Stages stored for `run_id`, in pipeline order.
    pub async fn stages_for(&self, run_id: Uuid) -> Vec<ArtifactStage> {
        let documents = self.documents.read().await;
        ArtifactStage::ALL
            .into_iter()
            .filter(|stage| documents.contains_key(&(run_id, *stage)))
            .collect()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, document: &ArtifactDocument) -> Result<(), ArtifactStoreError> {
        let key = (document.header.run_id, document.header.stage);
        let mut documents = self.documents.write().await;
        match documents.get(&key) {
            Some(existing) if existing == document => Ok(()),
            Some(_) => Err(ArtifactStoreError::DuplicateArtifact {
                run_id: key.0,
                stage: key.1,
            }),
            None => {
                documents.insert(key, document.clone());
                Ok(())
            }
        }
    }

    async fn get(
        &self,
        run_id: Uuid,
        stage: ArtifactStage,
    ) -> Result<ArtifactDocument, ArtifactStoreError> {
        self.documents
            .read()
            .await
            .get(&(run_id, stage))
            .cloned()
            .ok_or(ArtifactStoreError::NotFound { run_id, stage })
    }

    async fn latest_run(&self, stage: ArtifactStage) -> Result<Option<Uuid>, ArtifactStoreError> {
        Ok(self
            .documents
            .read()
            .await
            .keys()
            .filter(|(_, stored)| *stored == stage)
            .map(|(run_id, _)| *run_id)
            .max())
    }
}
