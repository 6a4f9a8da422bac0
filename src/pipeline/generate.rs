use std::{fmt::Write as _, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    clients::generator::{BulletinRequest, Generator},
    error::GenerationError,
    observability::metrics::Metrics,
    store::{CachedBulletin, GenerationCache, generation_cache_key},
    util::retry::RetryConfig,
};

use super::{
    normalize::Article,
    run::{BulletinMode, RunContext, RunStatus},
};

/// One segment's ranked articles, ready for generation.
#[derive(Debug, Clone)]
pub struct SegmentBatch {
    pub segment_name: String,
    pub display_name: String,
    pub focus: String,
    pub articles: Vec<Article>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bulletin {
    pub segment_name: String,
    pub generated_text: String,
    pub source_article_ids: Vec<String>,
    pub generated_at: DateTime<Utc>,
    pub mode: BulletinMode,
    pub attempts: usize,
    /// Text came from the generation cache; the generator was not called.
    #[serde(default)]
    pub cached: bool,
    /// Last generator error when the bulletin is degraded.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub status: RunStatus,
    pub bulletins: Vec<Bulletin>,
}

#[async_trait]
pub trait GenerateStage: Send + Sync {
    async fn generate(&self, ctx: &RunContext, batches: &[SegmentBatch]) -> GenerationOutcome;
}

#[derive(Debug, Clone, Copy)]
pub struct GenerateSettings {
    pub retry: RetryConfig,
    pub call_timeout: Duration,
    pub segment_pause: Duration,
}

/// Generates segments one after another, degrading a segment whose generation fails.
pub struct BulletinGenerateStage {
    generator: Arc<dyn Generator>,
    settings: GenerateSettings,
    metrics: Arc<Metrics>,
    cache: Option<(Arc<dyn GenerationCache>, Duration)>,
}

impl BulletinGenerateStage {
    pub fn new(generator: Arc<dyn Generator>, settings: GenerateSettings, metrics: Arc<Metrics>) -> Self {
        Self {
            generator,
            settings,
            metrics,
            cache: None,
        }
    }

    /// Reuses generated text for a segment whose ranked article set was seen within `ttl`.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn GenerationCache>, ttl: Duration) -> Self {
        self.cache = Some((cache, ttl));
        self
    }

    async fn cached_text(&self, key: &str, batch: &SegmentBatch) -> Option<String> {
        let (cache, ttl) = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(entry)) if entry.is_fresh(*ttl, Utc::now()) => Some(entry.content),
            Ok(Some(_)) => {
                debug!("bulletin.segment" = %batch.segment_name, key = %key, "cached bulletin expired");
                None
            }
            Ok(None) => None,
            Err(error) => {
                warn!("bulletin.segment" = %batch.segment_name, key = %key, error = %error, "generation cache lookup failed");
                None
            }
        }
    }

    async fn remember(&self, key: &str, batch: &SegmentBatch, content: &str) {
        let Some((cache, _)) = self.cache.as_ref() else {
            return;
        };
        let entry = CachedBulletin {
            key: key.to_string(),
            segment_name: batch.segment_name.clone(),
            content: content.to_string(),
            cached_at: Utc::now(),
        };
        if let Err(error) = cache.put(&entry).await {
            warn!("bulletin.segment" = %batch.segment_name, key = %key, error = %error, "failed to cache bulletin text");
        }
    }

    async fn generate_with_retry(
        &self,
        ctx: &RunContext,
        batch: &SegmentBatch,
    ) -> (Result<String, GenerationError>, usize) {
        let retry = self.settings.retry;
        let request = BulletinRequest {
            segment_name: &batch.segment_name,
            display_name: &batch.display_name,
            focus: &batch.focus,
            articles: &batch.articles,
        };
        let mut attempt = 0;

        loop {
            let limit = ctx.bounded(self.settings.call_timeout);
            if limit.is_zero() {
                return (Err(GenerationError::DeadlineExceeded), attempt);
            }

            let result = match tokio::time::timeout(limit, self.generator.generate(&request)).await {
                Ok(result) => result,
                Err(_) if ctx.deadline_passed() => Err(GenerationError::DeadlineExceeded),
                Err(_) => Err(GenerationError::Timeout(limit)),
            };
            attempt += 1;

            let error = match result {
                Ok(text) => return (Ok(text), attempt),
                Err(error) => error,
            };

            if !retry.can_retry(attempt) {
                warn!(
                    "bulletin.segment" = %batch.segment_name,
                    attempt,
                    max_attempts = retry.max_attempts,
                    error = %error,
                    "generation failed after all retries"
                );
                return (Err(error), attempt);
            }

            if !error.is_retryable() {
                warn!("bulletin.segment" = %batch.segment_name, error = %error, "generation error is not retryable");
                return (Err(error), attempt);
            }

            let backoff = retry.delay_for_attempt(attempt);
            let delay = error.retry_after().map_or(backoff, |wait| wait.max(backoff));
            if ctx.remaining().is_some_and(|left| left <= delay) {
                return (Err(error), attempt);
            }

            self.metrics.generation_retries.inc();
            warn!(
                "bulletin.segment" = %batch.segment_name,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "generation failed, retrying after delay"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl GenerateStage for BulletinGenerateStage {
    async fn generate(&self, ctx: &RunContext, batches: &[SegmentBatch]) -> GenerationOutcome {
        let mut bulletins = Vec::with_capacity(batches.len());
        let mut generator_called = false;

        for batch in batches {
            let key = generation_cache_key(
                &batch.segment_name,
                &batch.focus,
                batch.articles.iter().map(|article| article.id.as_str()),
            );
            if let Some(content) = self.cached_text(&key, batch).await {
                self.metrics.generation_cache_hits.inc();
                info!("bulletin.segment" = %batch.segment_name, key = %key, "bulletin served from cache");
                let generated_at = Utc::now();
                bulletins.push(Bulletin {
                    segment_name: batch.segment_name.clone(),
                    generated_text: format_bulletin(batch, &content, generated_at),
                    source_article_ids: article_ids(batch),
                    generated_at,
                    mode: BulletinMode::Generated,
                    attempts: 0,
                    cached: true,
                    error: None,
                });
                continue;
            }

            // The pause spaces out generator calls, so cache hits skip it.
            if generator_called && !self.settings.segment_pause.is_zero() {
                tokio::time::sleep(ctx.bounded(self.settings.segment_pause)).await;
            }
            generator_called = true;

            let started = Instant::now();
            let (result, attempts) = self.generate_with_retry(ctx, batch).await;
            self.metrics
                .generation_duration
                .observe(started.elapsed().as_secs_f64());
            let generated_at = Utc::now();

            let bulletin = match result {
                Ok(content) => {
                    self.metrics.bulletins_generated.inc();
                    info!(
                        "bulletin.segment" = %batch.segment_name,
                        attempts,
                        articles = batch.articles.len(),
                        "bulletin generated"
                    );
                    self.remember(&key, batch, &content).await;
                    Bulletin {
                        segment_name: batch.segment_name.clone(),
                        generated_text: format_bulletin(batch, &content, generated_at),
                        source_article_ids: article_ids(batch),
                        generated_at,
                        mode: BulletinMode::Generated,
                        attempts,
                        cached: false,
                        error: None,
                    }
                }
                Err(error) => {
                    self.metrics.bulletins_degraded.inc();
                    warn!(
                        "bulletin.segment" = %batch.segment_name,
                        attempts,
                        error = %error,
                        "bulletin degraded to article list"
                    );
                    Bulletin {
                        segment_name: batch.segment_name.clone(),
                        generated_text: format_degraded_bulletin(batch, generated_at),
                        source_article_ids: article_ids(batch),
                        generated_at,
                        mode: BulletinMode::Degraded,
                        attempts,
                        cached: false,
                        error: Some(error.to_string()),
                    }
                }
            };
            bulletins.push(bulletin);
        }

        let status = if bulletins.iter().any(|b| b.mode == BulletinMode::Degraded) {
            RunStatus::Partial
        } else {
            RunStatus::Succeeded
        };

        GenerationOutcome { status, bulletins }
    }
}

fn article_ids(batch: &SegmentBatch) -> Vec<String> {
    batch.articles.iter().map(|article| article.id.clone()).collect()
}

fn header(batch: &SegmentBatch, generated_at: DateTime<Utc>) -> String {
    format!(
        "# {}\n\n**Data:** {}  \n**Segmento:** {}  \n**Artigos analisados:** {}\n\n---\n\n",
        batch.display_name,
        generated_at.format("%d/%m/%Y"),
        batch.display_name,
        batch.articles.len()
    )
}

fn article_list(batch: &SegmentBatch) -> String {
    let mut list = String::new();
    for (position, article) in batch.articles.iter().enumerate() {
        let _ = write!(
            list,
            "{}. **{}**  \n   Fonte: {}  \n   Data: {}  \n   Link: {}  \n\n",
            position + 1,
            article.title,
            article.source,
            article.published_at.format("%d/%m/%Y"),
            article.url
        );
    }
    list
}

fn footer(generated_at: DateTime<Utc>) -> String {
    format!(
        "---\n\n*Boletim gerado automaticamente em {}*\n",
        generated_at.format("%d/%m/%Y às %H:%M")
    )
}

/// Generated prose framed by a header and the list of analysed articles.
pub(crate) fn format_bulletin(batch: &SegmentBatch, content: &str, generated_at: DateTime<Utc>) -> String {
    format!(
        "{}{}\n\n---\n\n## Artigos Analisados\n\n{}{}",
        header(batch, generated_at),
        content.trim(),
        article_list(batch),
        footer(generated_at)
    )
}

/// Plain ranked list used when the generator could not produce text.
pub(crate) fn format_degraded_bulletin(batch: &SegmentBatch, generated_at: DateTime<Utc>) -> String {
    format!(
        "{}*Resumo automático indisponível. Seguem as notícias selecionadas para o segmento.*\n\n## Notícias Selecionadas\n\n{}{}",
        header(batch, generated_at),
        article_list(batch),
        footer(generated_at)
    )
}
