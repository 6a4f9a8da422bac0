use anyhow::Result;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{InvariantViolation, PersistenceError, PipelineError},
    store::{ArtifactDocument, ArtifactStage, ArtifactStatus},
};

use super::{
    PipelineOrchestrator,
    collect::CollectionOutcome,
    dedup::{DedupOutcome, dedupe},
    generate::{GenerationOutcome, SegmentBatch},
    invariants::{check_ranking, check_unique_keys},
    normalize::{Article, normalize_all},
    rank::{RankedSegment, index_articles, rank},
    run::{BulletinMode, PipelineRun, PipelineStage, RunContext, RunStatus, SegmentReport},
    segment::SegmentationResult,
};

/// Ranked segments plus the per-segment bookkeeping that generate-only runs restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingArtifact {
    pub segments: Vec<RankedSegment>,
    pub reports: Vec<SegmentReport>,
}

/// Runs one stage at a time, recording it on the run and persisting its artifact.
pub(crate) struct StageExecutor<'a> {
    orchestrator: &'a PipelineOrchestrator,
    run_id: Uuid,
}

impl<'a> StageExecutor<'a> {
    pub(crate) fn new(orchestrator: &'a PipelineOrchestrator, run_id: Uuid) -> Self {
        Self {
            orchestrator,
            run_id,
        }
    }

    pub(crate) async fn execute_collect(
        &self,
        run: &mut PipelineRun,
        ctx: &RunContext,
    ) -> Result<CollectionOutcome> {
        run.begin_stage(PipelineStage::Collect);
        let outcome = self.orchestrator.stages.collect.collect(ctx).await;
        run.sources.clone_from(&outcome.sources);
        run.counts.collected = outcome.articles.len();

        // The collection artifact is written even when every source failed, for the audit trail.
        self.save_state(ArtifactStage::Collection, outcome.status, &outcome)
            .await?;

        let detail = format!(
            "{} of {} sources succeeded, {} records",
            outcome.succeeded_sources(),
            outcome.sources.len(),
            outcome.articles.len()
        );
        if outcome.status == RunStatus::Failed {
            run.finish_stage(PipelineStage::Collect, RunStatus::Failed, Some(detail));
            return Err(PipelineError::AllSourcesFailed.into());
        }
        run.finish_stage(PipelineStage::Collect, outcome.status, Some(detail));
        Ok(outcome)
    }

    pub(crate) async fn execute_normalize_dedupe(
        &self,
        run: &mut PipelineRun,
        collection: &CollectionOutcome,
    ) -> Result<DedupOutcome> {
        run.begin_stage(PipelineStage::NormalizeDedupe);

        let corpus = normalize_all(&collection.articles, collection.collected_at);
        #[allow(clippy::cast_precision_loss)]
        self.orchestrator
            .metrics
            .articles_rejected
            .inc_by(corpus.rejected.len() as f64);
        run.counts.rejected = corpus.rejected.len();
        run.counts.normalized = corpus.articles.len();
        self.save_state(ArtifactStage::Normalized, RunStatus::Succeeded, &corpus)
            .await?;

        let outcome = dedupe(
            corpus.articles,
            self.orchestrator.config.dedup_title_similarity(),
        );
        check_unique_keys(&outcome.articles)?;
        #[allow(clippy::cast_precision_loss)]
        self.orchestrator
            .metrics
            .articles_deduplicated
            .inc_by(outcome.removed() as f64);
        run.counts.deduplicated = outcome.articles.len();
        run.counts.duplicates_removed = outcome.removed();
        self.save_state(ArtifactStage::Deduplicated, RunStatus::Succeeded, &outcome)
            .await?;

        run.finish_stage(
            PipelineStage::NormalizeDedupe,
            RunStatus::Succeeded,
            Some(format!(
                "{} articles kept, {} rejected, {} duplicates removed",
                outcome.articles.len(),
                corpus.rejected.len(),
                outcome.removed()
            )),
        );
        Ok(outcome)
    }

    pub(crate) async fn execute_segment(
        &self,
        run: &mut PipelineRun,
        articles: &[Article],
    ) -> Result<SegmentationResult> {
        run.begin_stage(PipelineStage::Segment);
        let result = self.orchestrator.scorer.score_all(articles);
        run.counts.unassigned = result.unassigned.len();
        run.counts.gated = result.gated.len();
        self.save_state(ArtifactStage::Segmentation, RunStatus::Succeeded, &result)
            .await?;

        let qualified: usize = result.segments.iter().map(|s| s.scored.len()).sum();
        run.finish_stage(
            PipelineStage::Segment,
            RunStatus::Succeeded,
            Some(format!(
                "{qualified} qualifying pairs, {} unassigned, {} gated",
                result.unassigned.len(),
                result.gated.len()
            )),
        );
        Ok(result)
    }

    pub(crate) async fn execute_rank(
        &self,
        run: &mut PipelineRun,
        articles: &[Article],
        segmentation: &SegmentationResult,
    ) -> Result<RankingArtifact> {
        run.begin_stage(PipelineStage::Rank);
        let index = index_articles(articles);
        let priority = &self.orchestrator.source_priority;

        let mut segments = Vec::new();
        let mut reports = Vec::new();
        for segment in self.orchestrator.scorer.segments() {
            let scored = segmentation.scores_for(&segment.name);
            let ranked = rank(segment, scored, &index, priority);
            check_ranking(&ranked, segment, &index, priority)?;
            reports.push(SegmentReport {
                segment: segment.name.clone(),
                qualified: scored.len(),
                ranked: ranked.entries.len(),
                bulletin: None,
                attempts: 0,
                error: None,
            });
            segments.push(ranked);
        }

        let artifact = RankingArtifact { segments, reports };
        run.segments.clone_from(&artifact.reports);
        self.save_state(ArtifactStage::Ranking, RunStatus::Succeeded, &artifact)
            .await?;

        let non_empty = artifact.segments.iter().filter(|s| !s.is_empty()).count();
        run.finish_stage(
            PipelineStage::Rank,
            RunStatus::Succeeded,
            Some(format!("{non_empty} of {} segments have articles", artifact.segments.len())),
        );
        Ok(artifact)
    }

    pub(crate) async fn execute_generate(
        &self,
        run: &mut PipelineRun,
        ctx: &RunContext,
        articles: &[Article],
        ranking: &RankingArtifact,
    ) -> Result<GenerationOutcome> {
        run.begin_stage(PipelineStage::Generate);
        if run.segments.is_empty() {
            run.segments.clone_from(&ranking.reports);
        }

        let index = index_articles(articles);
        let mut batches = Vec::new();
        for ranked in ranking.segments.iter().filter(|ranked| !ranked.is_empty()) {
            let Some(segment) = self
                .orchestrator
                .scorer
                .segments()
                .find(|segment| segment.name == ranked.segment_name)
            else {
                debug!(segment = %ranked.segment_name, "segment no longer configured, skipping");
                continue;
            };
            let mut batch_articles = Vec::with_capacity(ranked.entries.len());
            for id in ranked.article_ids() {
                let article = index.get(id).ok_or_else(|| {
                    InvariantViolation::new(
                        "ranking_membership",
                        format!("segment {} references unknown article {id}", ranked.segment_name),
                    )
                })?;
                batch_articles.push((*article).clone());
            }
            batches.push(SegmentBatch {
                segment_name: segment.name.clone(),
                display_name: segment.display_name.clone(),
                focus: segment.focus.clone(),
                articles: batch_articles,
            });
        }

        let outcome = self.orchestrator.stages.generate.generate(ctx, &batches).await;
        for bulletin in &outcome.bulletins {
            if let Some(report) = run
                .segments
                .iter_mut()
                .find(|report| report.segment == bulletin.segment_name)
            {
                report.bulletin = Some(bulletin.mode);
                report.attempts = bulletin.attempts;
                report.error.clone_from(&bulletin.error);
            }
        }
        self.save_state(ArtifactStage::Bulletins, outcome.status, &outcome)
            .await?;

        let degraded = outcome
            .bulletins
            .iter()
            .filter(|bulletin| bulletin.mode == BulletinMode::Degraded)
            .count();
        run.finish_stage(
            PipelineStage::Generate,
            outcome.status,
            Some(format!(
                "{} bulletins, {degraded} degraded",
                outcome.bulletins.len()
            )),
        );
        Ok(outcome)
    }

    /// Reads an artifact of an earlier run.
    pub(crate) async fn load_state<T: DeserializeOwned>(
        &self,
        run_id: Uuid,
        stage: ArtifactStage,
    ) -> Result<T> {
        let document = self
            .orchestrator
            .store
            .get(run_id, stage)
            .await
            .map_err(|source| PipelineError::InputUnavailable {
                run_id,
                stage,
                source,
            })?;
        let payload = document
            .payload_as()
            .map_err(|source| PipelineError::InputUnavailable {
                run_id,
                stage,
                source,
            })?;
        Ok(payload)
    }

    /// Writes this run's artifact for `stage`. Any failure is fatal to the run.
    pub(crate) async fn save_state<T: Serialize + Sync>(
        &self,
        stage: ArtifactStage,
        status: RunStatus,
        payload: &T,
    ) -> Result<(), PersistenceError> {
        let to_persistence_error = |source| PersistenceError {
            run_id: self.run_id,
            stage,
            source,
        };
        let document = ArtifactDocument::new(
            self.run_id,
            stage,
            artifact_status(status),
            chrono::Utc::now(),
            payload,
        )
        .map_err(to_persistence_error)?;
        self.orchestrator
            .store
            .put(&document)
            .await
            .map_err(to_persistence_error)?;

        info!(
            "bulletin.run_id" = %self.run_id,
            "bulletin.artifact" = %stage,
            "artifact stored"
        );
        Ok(())
    }
}

fn artifact_status(status: RunStatus) -> ArtifactStatus {
    match status {
        RunStatus::Partial => ArtifactStatus::Partial,
        RunStatus::Failed => ArtifactStatus::Failed,
        RunStatus::Pending | RunStatus::Running | RunStatus::Succeeded => ArtifactStatus::Complete,
    }
}
