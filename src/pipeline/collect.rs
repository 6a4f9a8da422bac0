use std::{num::NonZeroUsize, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    clients::source::{RawArticle, SourceAdapter},
    error::FetchError,
    observability::metrics::Metrics,
    util::retry::RetryConfig,
};

use super::run::{RunContext, RunStatus, SourceReport};

/// Everything COLLECT produced. Stored as the `collection` artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOutcome {
    /// Run start; stands in for records without a publication time.
    pub collected_at: DateTime<Utc>,
    pub since: DateTime<Utc>,
    pub status: RunStatus,
    pub sources: Vec<SourceReport>,
    /// Merged records in catalog source order.
    pub articles: Vec<RawArticle>,
}

impl CollectionOutcome {
    #[must_use]
    pub fn succeeded_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|report| report.status == RunStatus::Succeeded)
            .count()
    }
}

#[async_trait]
pub trait CollectStage: Send + Sync {
    async fn collect(&self, ctx: &RunContext) -> CollectionOutcome;
}

#[derive(Debug, Clone)]
pub struct CollectSettings {
    pub lookback_days: u32,
    pub max_articles_per_source: usize,
    pub retry: RetryConfig,
    pub attempt_timeout: Duration,
    pub max_concurrency: Option<NonZeroUsize>,
}

/// Fetches every configured source concurrently, isolating failures per source.
pub struct SourceCollectStage {
    adapter: Arc<dyn SourceAdapter>,
    source_ids: Vec<String>,
    settings: CollectSettings,
    metrics: Arc<Metrics>,
}

struct SourceFetch {
    report: SourceReport,
    articles: Vec<RawArticle>,
}

impl SourceCollectStage {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        source_ids: Vec<String>,
        settings: CollectSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            adapter,
            source_ids,
            settings,
            metrics,
        }
    }

    async fn fetch_source(&self, ctx: &RunContext, source_id: &str, since: DateTime<Utc>) -> SourceFetch {
        let started = Instant::now();
        let (result, attempts) = self.fetch_with_retry(ctx, source_id, since).await;
        self.metrics
            .fetch_duration
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(mut articles) => {
                articles.retain(|article| article.published_at.is_none_or(|at| at >= since));
                articles.truncate(self.settings.max_articles_per_source);
                self.metrics.sources_fetched.inc();
                #[allow(clippy::cast_precision_loss)]
                self.metrics.articles_collected.inc_by(articles.len() as f64);
                info!(
                    "bulletin.source" = source_id,
                    attempts,
                    articles = articles.len(),
                    "source collected"
                );
                SourceFetch {
                    report: SourceReport {
                        source_id: source_id.to_string(),
                        status: RunStatus::Succeeded,
                        attempts,
                        articles: articles.len(),
                        error: None,
                    },
                    articles,
                }
            }
            Err(error) => {
                self.metrics.sources_failed.inc();
                warn!(
                    "bulletin.source" = source_id,
                    attempts,
                    error = %error,
                    "source excluded from run"
                );
                SourceFetch {
                    report: SourceReport {
                        source_id: source_id.to_string(),
                        status: RunStatus::Failed,
                        attempts,
                        articles: 0,
                        error: Some(error.to_string()),
                    },
                    articles: Vec::new(),
                }
            }
        }
    }

    /// Returns the final result and the number of attempts made.
    async fn fetch_with_retry(
        &self,
        ctx: &RunContext,
        source_id: &str,
        since: DateTime<Utc>,
    ) -> (Result<Vec<RawArticle>, FetchError>, usize) {
        let retry = self.settings.retry;
        let mut attempt = 0;

        loop {
            let limit = ctx.bounded(self.settings.attempt_timeout);
            if limit.is_zero() {
                return (Err(FetchError::DeadlineExceeded), attempt);
            }

            let result = match tokio::time::timeout(limit, self.adapter.fetch(source_id, since)).await {
                Ok(result) => result,
                Err(_) if ctx.deadline_passed() => Err(FetchError::DeadlineExceeded),
                Err(_) => Err(FetchError::Timeout(limit)),
            };

            match result {
                Ok(articles) => {
                    attempt += 1;
                    if attempt > 1 {
                        info!("bulletin.source" = source_id, attempt, "fetch succeeded after retry");
                    }
                    return (Ok(articles), attempt);
                }
                Err(error) => {
                    attempt += 1;

                    if !retry.can_retry(attempt) {
                        warn!(
                            "bulletin.source" = source_id,
                            attempt,
                            max_attempts = retry.max_attempts,
                            "fetch failed after all retries"
                        );
                        return (Err(error), attempt);
                    }

                    if !error.is_retryable() {
                        warn!("bulletin.source" = source_id, error = %error, "error is not retryable");
                        return (Err(error), attempt);
                    }

                    let delay = retry.delay_for_attempt(attempt);
                    if ctx.remaining().is_some_and(|left| left <= delay) {
                        return (Err(error), attempt);
                    }

                    self.metrics.fetch_retries.inc();
                    warn!(
                        "bulletin.source" = source_id,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "fetch failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Start of the collection window. Saturates at the earliest representable time.
pub(crate) fn lookback_start(started_at: DateTime<Utc>, lookback_days: u32) -> DateTime<Utc> {
    TimeDelta::try_days(i64::from(lookback_days))
        .and_then(|window| started_at.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
impl CollectStage for SourceCollectStage {
    async fn collect(&self, ctx: &RunContext) -> CollectionOutcome {
        let since = lookback_start(ctx.started_at, self.settings.lookback_days);
        let limit = self
            .settings
            .max_concurrency
            .map_or(self.source_ids.len(), NonZeroUsize::get)
            .max(1);

        let mut fetched: Vec<(usize, SourceFetch)> =
            stream::iter(self.source_ids.clone().into_iter().enumerate())
                .map(|(position, source_id)| async move {
                    (position, self.fetch_source(ctx, &source_id, since).await)
                })
                .buffer_unordered(limit)
                .collect()
                .await;
        fetched.sort_by_key(|(position, _)| *position);

        let mut sources = Vec::with_capacity(fetched.len());
        let mut articles = Vec::new();
        for (_, mut fetch) in fetched {
            articles.append(&mut fetch.articles);
            sources.push(fetch.report);
        }

        let succeeded = sources
            .iter()
            .filter(|report| report.status == RunStatus::Succeeded)
            .count();
        let status = if succeeded == 0 {
            RunStatus::Failed
        } else if succeeded < sources.len() {
            RunStatus::Partial
        } else {
            RunStatus::Succeeded
        };

        CollectionOutcome {
            collected_at: ctx.started_at,
            since,
            status,
            sources,
            articles,
        }
    }
}
