//! Write-once artifact persistence keyed by run and stage.
pub mod artifact;
pub mod cache;
pub mod fs;
pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

pub use artifact::{ArtifactDocument, ArtifactHeader, ArtifactStage, ArtifactStatus, ArtifactStoreError};
pub use cache::{
    CachedBulletin, FsGenerationCache, GenerationCache, MemoryGenerationCache,
    generation_cache_key,
};
pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

/// Durable home for stage outputs.
///
/// `(run_id, stage)` is written at most once. Re-putting a byte-for-byte equal document is a
/// no-op; anything else is rejected with [`ArtifactStoreError::DuplicateArtifact`].
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, document: &ArtifactDocument) -> Result<(), ArtifactStoreError>;

    async fn get(
        &self,
        run_id: Uuid,
        stage: ArtifactStage,
    ) -> Result<ArtifactDocument, ArtifactStoreError>;

    /// Most recent run that has an artifact for `stage`.
    async fn latest_run(&self, stage: ArtifactStage) -> Result<Option<Uuid>, ArtifactStoreError>;
}
