//! Filesystem artifact store: `<root>/<run_id>/<stage>.json`.
//!
//! Documents are first written to a temporary file in the run directory and then hard-linked to
//! their final name. Linking fails if the target exists, which gives write-once semantics without
//! a separate lock and never exposes a half-written document.
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{ArtifactDocument, ArtifactStage, ArtifactStore, ArtifactStoreError};

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn artifact_path(&self, run_id: Uuid, stage: ArtifactStage) -> PathBuf {
        self.root.join(run_id.to_string()).join(stage.file_name())
    }

    async fn link_into_place(
        &self,
        temp_path: &Path,
        final_path: &Path,
        document: &ArtifactDocument,
        bytes: &[u8],
    ) -> Result<(), ArtifactStoreError> {
        match fs::hard_link(temp_path, final_path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {
                // Byte comparison: reparsing would not round-trip every f64 exactly.
                let existing = fs::read(final_path).await.map_err(|source| io(final_path, source))?;
                if existing == bytes {
                    debug!(path = %final_path.display(), "identical artifact already stored");
                    Ok(())
                } else {
                    Err(ArtifactStoreError::DuplicateArtifact {
                        run_id: document.header.run_id,
                        stage: document.header.stage,
                    })
                }
            }
            Err(source) => Err(io(final_path, source)),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, document: &ArtifactDocument) -> Result<(), ArtifactStoreError> {
        let run_id = document.header.run_id;
        let stage = document.header.stage;
        let run_dir = self.root.join(run_id.to_string());
        fs::create_dir_all(&run_dir)
            .await
            .map_err(|source| io(&run_dir, source))?;

        let final_path = self.artifact_path(run_id, stage);
        let temp_path = run_dir.join(format!(".{}.{}.tmp", stage.as_str(), Uuid::new_v4()));
        let bytes = serde_json::to_vec_pretty(document)?;
        fs::write(&temp_path, &bytes)
            .await
            .map_err(|source| io(&temp_path, source))?;

        let linked = self
            .link_into_place(&temp_path, &final_path, document, &bytes)
            .await;
        if let Err(error) = fs::remove_file(&temp_path).await {
            debug!(path = %temp_path.display(), error = %error, "failed to remove temporary artifact");
        }
        linked?;

        debug!(%run_id, %stage, path = %final_path.display(), "stored artifact");
        Ok(())
    }

    async fn get(
        &self,
        run_id: Uuid,
        stage: ArtifactStage,
    ) -> Result<ArtifactDocument, ArtifactStoreError> {
        let path = self.artifact_path(run_id, stage);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                return Err(ArtifactStoreError::NotFound { run_id, stage });
            }
            Err(source) => return Err(io(&path, source)),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn latest_run(&self, stage: ArtifactStage) -> Result<Option<Uuid>, ArtifactStoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io(&self.root, source)),
        };

        let mut latest: Option<Uuid> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| io(&self.root, source))?
        {
            let Some(run_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };
            let has_stage = fs::try_exists(entry.path().join(stage.file_name()))
                .await
                .unwrap_or(false);
            // Run ids are UUIDv7, so byte order is creation order.
            if has_stage && latest.is_none_or(|current| run_id > current) {
                latest = Some(run_id);
            }
        }

        Ok(latest)
    }
}

fn io(path: &Path, source: std::io::Error) -> ArtifactStoreError {
    ArtifactStoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
