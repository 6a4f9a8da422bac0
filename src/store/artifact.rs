use std::{fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStage {
    Collection,
    Normalized,
    Deduplicated,
    Segmentation,
    Ranking,
    Bulletins,
    RunSummary,
}

impl ArtifactStage {
    pub const ALL: [Self; 7] = [
        Self::Collection,
        Self::Normalized,
        Self::Deduplicated,
        Self::Segmentation,
        Self::Ranking,
        Self::Bulletins,
        Self::RunSummary,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Normalized => "normalized",
            Self::Deduplicated => "deduplicated",
            Self::Segmentation => "segmentation",
            Self::Ranking => "ranking",
            Self::Bulletins => "bulletins",
            Self::RunSummary => "run_summary",
        }
    }

    #[must_use]
    pub fn file_name(self) -> String {
        format!("{}.json", self.as_str())
    }
}

impl fmt::Display for ArtifactStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the stage produced everything it was asked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Complete,
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub run_id: Uuid,
    pub stage: ArtifactStage,
    pub generated_at: DateTime<Utc>,
    pub status: ArtifactStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactDocument {
    pub header: ArtifactHeader,
    pub payload: Value,
}

impl ArtifactDocument {
    /// # Errors
    /// Returns an error when `payload` cannot be represented as JSON.
    pub fn new<T: Serialize>(
        run_id: Uuid,
        stage: ArtifactStage,
        status: ArtifactStatus,
        generated_at: DateTime<Utc>,
        payload: &T,
    ) -> Result<Self, ArtifactStoreError> {
        Ok(Self {
            header: ArtifactHeader {
                run_id,
                stage,
                generated_at,
                status,
            },
            payload: serde_json::to_value(payload)?,
        })
    }

    /// # Errors
    /// Returns an error when the payload does not have the shape of `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ArtifactStoreError> {
        Ok(T::deserialize(&self.payload)?)
    }
}

#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    #[error("artifact `{stage}` for run {run_id} already exists with different content")]
    DuplicateArtifact { run_id: Uuid, stage: ArtifactStage },
    #[error("artifact `{stage}` for run {run_id} not found")]
    NotFound { run_id: Uuid, stage: ArtifactStage },
    #[error("artifact I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
