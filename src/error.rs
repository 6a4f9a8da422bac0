//! Error taxonomy shared by the pipeline stages.
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::store::{ArtifactStage, ArtifactStoreError};

/// A source fetch failed. Retried per source, never fatal on its own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("source `{0}` is not configured")]
    UnknownSource(String),
    #[error("transient failure fetching {target}: {message}")]
    Transient { target: String, message: String },
    #[error("permanent failure fetching {target}: {message}")]
    Permanent { target: String, message: String },
    #[error("feed {target} could not be parsed: {message}")]
    Parse { target: String, message: String },
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("run deadline exceeded before the fetch completed")]
    DeadlineExceeded,
}

impl FetchError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout(_))
    }
}

/// A raw record could not be turned into an article. The record is skipped.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizationError {
    #[error("record from `{source_id}` is missing required field `{field}`")]
    MissingField {
        source_id: String,
        field: &'static str,
    },
    #[error("record from `{source_id}` has an invalid url `{url}`")]
    InvalidUrl { source_id: String, url: String },
}

/// Text generation failed for one segment.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("generator is rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transient generator failure: {0}")]
    Transient(String),
    #[error("generator rejected the request: {0}")]
    Rejected(String),
    #[error("generator returned no text")]
    EmptyResponse,
    #[error("generator is not configured")]
    Unavailable,
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("run deadline exceeded before generation")]
    DeadlineExceeded,
}

impl GenerationError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Transient(_) | Self::Timeout(_)
        )
    }

    /// Server-provided minimum wait before the next attempt.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Writing or reading an artifact failed. Always fatal to the run.
#[derive(Debug, Error)]
#[error("failed to persist `{stage}` artifact for run {run_id}")]
pub struct PersistenceError {
    pub run_id: Uuid,
    pub stage: ArtifactStage,
    #[source]
    pub source: ArtifactStoreError,
}

/// A run could not proceed past a stage. Always fatal to the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("every configured source failed")]
    AllSourcesFailed,
    #[error("no previous run holds a `{stage}` artifact")]
    NoInputRun { stage: ArtifactStage },
    #[error("input artifact `{stage}` of run {run_id} is unavailable")]
    InputUnavailable {
        run_id: Uuid,
        stage: ArtifactStage,
        #[source]
        source: ArtifactStoreError,
    },
}

/// A pipeline invariant did not hold. Indicates a logic defect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invariant `{check}` violated: {detail}")]
pub struct InvariantViolation {
    pub check: &'static str,
    pub detail: String,
}

impl InvariantViolation {
    pub(crate) fn new(check: &'static str, detail: impl Into<String>) -> Self {
        Self {
            check,
            detail: detail.into(),
        }
    }
}
