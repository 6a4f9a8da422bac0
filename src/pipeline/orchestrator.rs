//! Pipeline orchestrator and builder for the bulletin pipeline.

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    catalog::Catalog,
    config::Config,
    error::{InvariantViolation, PersistenceError, PipelineError},
    observability::metrics::Metrics,
    store::{ArtifactStage, ArtifactStore},
    util::error::is_fatal,
};

use super::{
    collect::{CollectStage, CollectionOutcome},
    dedup::DedupOutcome,
    executor::{RankingArtifact, StageExecutor},
    generate::GenerateStage,
    invariants::check_stage_coverage,
    run::{FailureKind, PipelineRun, PipelineStage, RunCommand, RunContext, RunStatus},
    segment::SegmentScorer,
};

/// Coordinates the stages of one run and owns the run record.
pub struct PipelineOrchestrator {
    pub(super) config: Arc<Config>,
    pub(super) stages: PipelineStages,
    pub(super) scorer: SegmentScorer,
    pub(super) source_priority: HashMap<String, usize>,
    pub(super) store: Arc<dyn ArtifactStore>,
    pub(super) metrics: Arc<Metrics>,
}

/// The stages that talk to the outside world. Everything else is pure and built from the catalog.
pub(crate) struct PipelineStages {
    pub(super) collect: Arc<dyn CollectStage>,
    pub(super) generate: Arc<dyn GenerateStage>,
}

impl PipelineOrchestrator {
    #[must_use]
    pub fn builder(config: Arc<Config>, catalog: Arc<Catalog>) -> PipelineBuilder {
        PipelineBuilder::new(config, catalog)
    }

    /// Collect through generate in one invocation.
    pub async fn run_pipeline(&self) -> PipelineRun {
        let (ctx, mut run) = self.start(RunCommand::Pipeline);
        let executor = StageExecutor::new(self, ctx.run_id);
        let result = Self::full_pipeline(&executor, &mut run, &ctx).await;
        self.finish(&executor, run, result).await
    }

    /// Collect only. The collection artifact becomes the input of a later `segment` run.
    pub async fn run_collect(&self) -> PipelineRun {
        let (ctx, mut run) = self.start(RunCommand::Collect);
        let executor = StageExecutor::new(self, ctx.run_id);
        let result = executor.execute_collect(&mut run, &ctx).await.map(|_| ());
        self.finish(&executor, run, result).await
    }

    /// Normalize, dedupe, segment and rank the collection of `input` or of the latest collecting run.
    pub async fn run_segment(&self, input: Option<Uuid>) -> PipelineRun {
        let (ctx, mut run) = self.start(RunCommand::Segment);
        let executor = StageExecutor::new(self, ctx.run_id);
        let result = self.segment_from_input(&executor, &mut run, input).await;
        self.finish(&executor, run, result).await
    }

    /// Generate bulletins from the ranking of `input` or of the latest ranking run.
    pub async fn run_generate(&self, input: Option<Uuid>) -> PipelineRun {
        let (ctx, mut run) = self.start(RunCommand::Generate);
        let executor = StageExecutor::new(self, ctx.run_id);
        let result = self
            .generate_from_input(&executor, &mut run, &ctx, input)
            .await;
        self.finish(&executor, run, result).await
    }

    fn start(&self, command: RunCommand) -> (RunContext, PipelineRun) {
        let ctx = RunContext::new(self.config.run_timeout());
        let run = PipelineRun::new(&ctx, command, None);
        info!(
            "bulletin.run_id" = %ctx.run_id,
            "bulletin.command" = ?command,
            "run started"
        );
        (ctx, run)
    }

    async fn full_pipeline(
        executor: &StageExecutor<'_>,
        run: &mut PipelineRun,
        ctx: &RunContext,
    ) -> Result<()> {
        let collection = executor.execute_collect(run, ctx).await?;
        let deduplicated = executor.execute_normalize_dedupe(run, &collection).await?;
        let segmentation = executor
            .execute_segment(run, &deduplicated.articles)
            .await?;
        let ranking = executor
            .execute_rank(run, &deduplicated.articles, &segmentation)
            .await?;
        executor
            .execute_generate(run, ctx, &deduplicated.articles, &ranking)
            .await?;
        Ok(())
    }

    async fn segment_from_input(
        &self,
        executor: &StageExecutor<'_>,
        run: &mut PipelineRun,
        input: Option<Uuid>,
    ) -> Result<()> {
        let input_run = self.resolve_input(input, ArtifactStage::Collection).await?;
        run.input_run_id = Some(input_run);

        let collection: CollectionOutcome = executor
            .load_state(input_run, ArtifactStage::Collection)
            .await?;
        if collection.status == RunStatus::Failed {
            return Err(PipelineError::AllSourcesFailed.into());
        }
        run.sources.clone_from(&collection.sources);
        run.counts.collected = collection.articles.len();

        let deduplicated = executor.execute_normalize_dedupe(run, &collection).await?;
        let segmentation = executor
            .execute_segment(run, &deduplicated.articles)
            .await?;
        executor
            .execute_rank(run, &deduplicated.articles, &segmentation)
            .await?;
        Ok(())
    }

    async fn generate_from_input(
        &self,
        executor: &StageExecutor<'_>,
        run: &mut PipelineRun,
        ctx: &RunContext,
        input: Option<Uuid>,
    ) -> Result<()> {
        let input_run = self.resolve_input(input, ArtifactStage::Ranking).await?;
        run.input_run_id = Some(input_run);

        let ranking: RankingArtifact = executor
            .load_state(input_run, ArtifactStage::Ranking)
            .await?;
        let deduplicated: DedupOutcome = executor
            .load_state(input_run, ArtifactStage::Deduplicated)
            .await?;
        run.counts.deduplicated = deduplicated.articles.len();

        executor
            .execute_generate(run, ctx, &deduplicated.articles, &ranking)
            .await?;
        Ok(())
    }

    async fn resolve_input(&self, requested: Option<Uuid>, stage: ArtifactStage) -> Result<Uuid> {
        if let Some(run_id) = requested {
            return Ok(run_id);
        }
        let latest = self
            .store
            .latest_run(stage)
            .await
            .with_context(|| format!("failed to look up the latest run with a `{stage}` artifact"))?;
        latest.ok_or_else(|| PipelineError::NoInputRun { stage }.into())
    }

    /// Settles the run, writes the run summary and records run metrics.
    async fn finish(
        &self,
        executor: &StageExecutor<'_>,
        mut run: PipelineRun,
        result: Result<()>,
    ) -> PipelineRun {
        let result = result.and_then(|()| check_stage_coverage(&run).map_err(anyhow::Error::from));
        match result {
            Ok(()) => {
                run.begin_stage(PipelineStage::Persist);
                let written = run.command.stages().len() - 1;
                run.finish_stage(
                    PipelineStage::Persist,
                    RunStatus::Succeeded,
                    Some(format!("{written} stages persisted")),
                );
            }
            Err(err) => {
                let kind = failure_kind(&err);
                error!(
                    "bulletin.run_id" = %run.run_id,
                    failure = ?kind,
                    fatal = is_fatal(&err),
                    error = ?err,
                    "run failed"
                );
                run.fail(kind, format!("{err:#}"));
            }
        }
        run.finalize(Utc::now());

        if let Err(err) = executor
            .save_state(ArtifactStage::RunSummary, run.status, &run)
            .await
        {
            error!(
                "bulletin.run_id" = %run.run_id,
                error = ?err,
                "failed to persist run summary"
            );
            if !run.is_failed() {
                run.finish_stage(PipelineStage::Persist, RunStatus::Failed, None);
            }
            run.fail(FailureKind::Persistence, err.to_string());
            run.finalize(Utc::now());
        }

        self.record_run(&run);
        run
    }

    fn record_run(&self, run: &PipelineRun) {
        if !run.state.is_terminal() {
            warn!(state = ?run.state, status = ?run.status, "run finished outside a terminal state");
        }
        match run.status {
            RunStatus::Succeeded => self.metrics.runs_succeeded.inc(),
            RunStatus::Partial => self.metrics.runs_partial.inc(),
            RunStatus::Failed => self.metrics.runs_failed.inc(),
            RunStatus::Pending | RunStatus::Running => {}
        }
        if let Some(finished_at) = run.finished_at {
            if let Ok(elapsed) = (finished_at - run.started_at).to_std() {
                self.metrics.run_duration.observe(elapsed.as_secs_f64());
            }
        }

        info!(
            "bulletin.run_id" = %run.run_id,
            "bulletin.command" = ?run.command,
            "bulletin.status" = ?run.status,
            collected = run.counts.collected,
            deduplicated = run.counts.deduplicated,
            bulletins = run.segments.iter().filter(|s| s.bulletin.is_some()).count(),
            "run finished"
        );
    }
}

fn failure_kind(err: &anyhow::Error) -> FailureKind {
    if let Some(pipeline_error) = err.downcast_ref::<PipelineError>() {
        return match pipeline_error {
            PipelineError::AllSourcesFailed => FailureKind::Collection,
            PipelineError::NoInputRun { .. } | PipelineError::InputUnavailable { .. } => {
                FailureKind::Input
            }
        };
    }
    if err.downcast_ref::<InvariantViolation>().is_some() {
        FailureKind::Invariant
    } else if err.downcast_ref::<PersistenceError>().is_some() {
        FailureKind::Persistence
    } else {
        FailureKind::Internal
    }
}

/// Builder pattern for constructing `PipelineOrchestrator`.
pub struct PipelineBuilder {
    config: Arc<Config>,
    catalog: Arc<Catalog>,
    collect: Option<Arc<dyn CollectStage>>,
    generate: Option<Arc<dyn GenerateStage>>,
    store: Option<Arc<dyn ArtifactStore>>,
    metrics: Option<Arc<Metrics>>,
}

impl PipelineBuilder {
    #[must_use]
    pub fn new(config: Arc<Config>, catalog: Arc<Catalog>) -> Self {
        Self {
            config,
            catalog,
            collect: None,
            generate: None,
            store: None,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_collect_stage(mut self, stage: Arc<dyn CollectStage>) -> Self {
        self.collect = Some(stage);
        self
    }

    #[must_use]
    pub fn with_generate_stage(mut self, stage: Arc<dyn GenerateStage>) -> Self {
        self.generate = Some(stage);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// # Errors
    /// Returns an error when a stage or the store is missing, or the segment matchers cannot be built.
    pub fn build(self) -> Result<PipelineOrchestrator> {
        let stages = PipelineStages {
            collect: self
                .collect
                .context("collect stage must be configured before build")?,
            generate: self
                .generate
                .context("generate stage must be configured before build")?,
        };
        let store = self
            .store
            .context("artifact store must be configured before build")?;
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(Metrics::detached().context("failed to register metrics")?),
        };
        let scorer = SegmentScorer::from_catalog(
            &self.catalog,
            self.config.max_articles_per_segment(),
            self.config.segment_title_boost(),
            self.config.segment_threshold(),
        )
        .context("failed to compile segment terms")?;

        Ok(PipelineOrchestrator {
            source_priority: self.catalog.source_priority(),
            config: self.config,
            stages,
            scorer,
            store,
            metrics,
        })
    }
}
