//! Error classification across the pipeline taxonomy.
use anyhow::Error;

use crate::error::{FetchError, GenerationError, InvariantViolation, PersistenceError, PipelineError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    /// Worth another attempt (transient transport failures, timeouts, rate limits).
    Retryable,
    /// Will fail the same way again, but only affects one source or segment.
    NonRetryable,
    /// Ends the run.
    Fatal,
}

#[must_use]
pub(crate) fn classify_error(error: &Error) -> ErrorKind {
    if error.downcast_ref::<PersistenceError>().is_some()
        || error.downcast_ref::<InvariantViolation>().is_some()
        || error.downcast_ref::<PipelineError>().is_some()
    {
        return ErrorKind::Fatal;
    }

    if let Some(fetch) = error.downcast_ref::<FetchError>() {
        return if fetch.is_retryable() {
            ErrorKind::Retryable
        } else {
            ErrorKind::NonRetryable
        };
    }

    if let Some(generation) = error.downcast_ref::<GenerationError>() {
        return if generation.is_retryable() {
            ErrorKind::Retryable
        } else {
            ErrorKind::NonRetryable
        };
    }

    if let Some(reqwest_err) = error.downcast_ref::<reqwest::Error>() {
        if crate::util::retry::is_retryable_error(reqwest_err) {
            return ErrorKind::Retryable;
        }
    }

    ErrorKind::NonRetryable
}

#[must_use]
pub(crate) fn is_fatal(error: &Error) -> bool {
    matches!(classify_error(error), ErrorKind::Fatal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ArtifactStage, ArtifactStoreError};
    use anyhow::anyhow;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn taxonomy_is_classified() {
        assert_eq!(
            classify_error(&Error::new(FetchError::Timeout(Duration::from_secs(1)))),
            ErrorKind::Retryable
        );
        assert_eq!(
            classify_error(&Error::new(GenerationError::Rejected("401".into()))),
            ErrorKind::NonRetryable
        );
        assert!(is_fatal(&Error::new(InvariantViolation::new(
            "unique_keys",
            "dup"
        ))));
    }

    #[test]
    fn context_does_not_hide_persistence_errors() {
        let run_id = Uuid::now_v7();
        let error = Error::new(PersistenceError {
            run_id,
            stage: ArtifactStage::Ranking,
            source: ArtifactStoreError::NotFound {
                run_id,
                stage: ArtifactStage::Ranking,
            },
        })
        .context("persisting ranking");
        assert!(is_fatal(&error));
    }

    #[test]
    fn unknown_errors_are_non_retryable() {
        let error = anyhow!("something else");
        assert_eq!(classify_error(&error), ErrorKind::NonRetryable);
        assert!(!is_fatal(&error));
    }
}
