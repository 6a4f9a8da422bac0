//! End-to-end runs of the orchestrator against scripted sources and generators.

use std::{
    collections::{HashMap, HashSet},
    io,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use bulletin_worker::{
    catalog::Catalog,
    clients::{BulletinRequest, Generator, RawArticle, SourceAdapter},
    config::Config,
    error::{FetchError, GenerationError},
    observability::metrics::Metrics,
    pipeline::{
        BulletinGenerateStage, CollectSettings, FailureKind, GenerateSettings, GenerationOutcome,
        PipelineOrchestrator, PipelineRun, PipelineStage, RankingArtifact, RunStatus,
        SourceCollectStage, run::BulletinMode,
    },
    store::{
        ArtifactDocument, ArtifactStage, ArtifactStore, ArtifactStoreError, MemoryArtifactStore,
        MemoryGenerationCache,
    },
    util::retry::RetryConfig,
};

const CATALOG: &str = r"
sources:
  - id: alpha
    name: Alpha
    feeds: [https://alpha.example/rss]
  - id: beta
    name: Beta
    feeds: [https://beta.example/rss]
  - id: gamma
    name: Gamma
    feeds: [https://gamma.example/rss]
segments:
  - name: tech
    display_name: Tecnologia
    max_articles: 2
    terms:
      startup: 2
      chip: 1
  - name: saude
    display_name: Saúde
    terms:
      vacina: 2
";

enum Script {
    Articles(Vec<RawArticle>),
    Fail,
}

struct ScriptedAdapter {
    scripts: HashMap<String, Script>,
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    async fn fetch(
        &self,
        source_id: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<RawArticle>, FetchError> {
        match self.scripts.get(source_id) {
            Some(Script::Articles(articles)) => Ok(articles.clone()),
            Some(Script::Fail) => Err(FetchError::Permanent {
                target: source_id.to_string(),
                message: "410 gone".to_string(),
            }),
            None => Err(FetchError::UnknownSource(source_id.to_string())),
        }
    }
}

#[derive(Default)]
struct ScriptedGenerator {
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn failing(segments: &[&str]) -> Self {
        Self {
            failing: segments.iter().map(ToString::to_string).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &BulletinRequest<'_>) -> Result<String, GenerationError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(request.segment_name.to_string());
        if self.failing.contains(request.segment_name) {
            return Err(GenerationError::Transient("503 upstream".to_string()));
        }
        Ok(format!(
            "Resumo de {} notícias sobre {}.",
            request.articles.len(),
            request.display_name
        ))
    }
}

fn raw(source: &str, title: &str, url: &str, hours_ago: i64) -> RawArticle {
    RawArticle {
        source_id: source.to_string(),
        title: Some(title.to_string()),
        body: Some(format!("<p>{title}</p>")),
        url: Some(url.to_string()),
        published_at: Some(Utc::now() - Duration::hours(hours_ago)),
    }
}

fn config() -> Arc<Config> {
    let config = temp_env::with_vars(
        [
            ("PIPELINE_RUN_TIMEOUT_SECS", None::<&str>),
            ("DEDUP_TITLE_SIMILARITY", None),
            ("SEGMENT_THRESHOLD", None),
            ("SEGMENT_TITLE_BOOST", None),
            ("BULLETIN_MAX_ARTICLES_PER_SEGMENT", None),
            ("BULLETIN_MAX_ARTICLES_PER_SOURCE", None),
            ("BULLETIN_LOOKBACK_DAYS", None),
        ],
        Config::from_env,
    );
    Arc::new(config.expect("config loads"))
}

/// Delegates to an in-memory store but refuses writes of one artifact stage.
struct FailingStore {
    inner: MemoryArtifactStore,
    failing: ArtifactStage,
}

impl FailingStore {
    fn refusing(failing: ArtifactStage) -> Self {
        Self {
            inner: MemoryArtifactStore::new(),
            failing,
        }
    }
}

#[async_trait]
impl ArtifactStore for FailingStore {
    async fn put(&self, document: &ArtifactDocument) -> Result<(), ArtifactStoreError> {
        if document.header.stage == self.failing {
            return Err(ArtifactStoreError::Io {
                path: PathBuf::from("/outputs").join(document.header.stage.file_name()),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only file system"),
            });
        }
        self.inner.put(document).await
    }

    async fn get(
        &self,
        run_id: Uuid,
        stage: ArtifactStage,
    ) -> Result<ArtifactDocument, ArtifactStoreError> {
        self.inner.get(run_id, stage).await
    }

    async fn latest_run(&self, stage: ArtifactStage) -> Result<Option<Uuid>, ArtifactStoreError> {
        self.inner.latest_run(stage).await
    }
}

struct Harness {
    pipeline: PipelineOrchestrator,
    store: Arc<MemoryArtifactStore>,
    generator: Arc<ScriptedGenerator>,
    metrics: Arc<Metrics>,
}

fn harness(scripts: HashMap<String, Script>, generator: ScriptedGenerator) -> Harness {
    let store = Arc::new(MemoryArtifactStore::new());
    let generator = Arc::new(generator);
    let metrics = Arc::new(Metrics::detached().expect("metrics"));
    let pipeline = orchestrator(
        scripts,
        Arc::clone(&generator),
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&metrics),
        None,
    );

    Harness {
        pipeline,
        store,
        generator,
        metrics,
    }
}

fn orchestrator(
    scripts: HashMap<String, Script>,
    generator: Arc<ScriptedGenerator>,
    store: Arc<dyn ArtifactStore>,
    metrics: Arc<Metrics>,
    cache: Option<Arc<MemoryGenerationCache>>,
) -> PipelineOrchestrator {
    let catalog = Arc::new(Catalog::from_yaml_str(CATALOG).expect("catalog parses"));

    let collect = SourceCollectStage::new(
        Arc::new(ScriptedAdapter { scripts }),
        catalog.source_ids(),
        CollectSettings {
            lookback_days: 5,
            max_articles_per_source: 100,
            retry: RetryConfig::new(2, 0, 0),
            attempt_timeout: std::time::Duration::from_secs(5),
            max_concurrency: None,
        },
        Arc::clone(&metrics),
    );
    let mut generate = BulletinGenerateStage::new(
        generator as Arc<dyn Generator>,
        GenerateSettings {
            retry: RetryConfig::new(3, 0, 0),
            call_timeout: std::time::Duration::from_secs(5),
            segment_pause: std::time::Duration::ZERO,
        },
        Arc::clone(&metrics),
    );
    if let Some(cache) = cache {
        generate = generate.with_cache(cache, std::time::Duration::from_secs(3_600));
    }

    PipelineOrchestrator::builder(config(), catalog)
        .with_collect_stage(Arc::new(collect))
        .with_generate_stage(Arc::new(generate))
        .with_store(store)
        .with_metrics(metrics)
        .build()
        .expect("orchestrator builds")
}

fn healthy_scripts() -> HashMap<String, Script> {
    HashMap::from([
        (
            "alpha".to_string(),
            Script::Articles(vec![
                raw("alpha", "Startup lança chip novo", "https://alpha.example/chip", 2),
                raw("alpha", "Campanha de vacina começa", "https://alpha.example/vacina", 3),
                raw("alpha", "Resultado do futebol", "https://alpha.example/futebol", 1),
            ]),
        ),
        (
            "beta".to_string(),
            Script::Articles(vec![
                // Same story as alpha, published later: dropped by dedup.
                raw("beta", "Startup lança chip novo", "https://alpha.example/chip", 1),
                raw("beta", "Startup capta rodada", "https://beta.example/rodada", 4),
            ]),
        ),
        (
            "gamma".to_string(),
            Script::Articles(vec![raw("gamma", "Startup de chip abre vagas", "https://gamma.example/vagas", 5)]),
        ),
    ])
}

fn stage_status(run: &PipelineRun, stage: PipelineStage) -> Option<RunStatus> {
    run.stage(stage).map(|record| record.status)
}

#[tokio::test]
async fn full_pipeline_writes_every_artifact_and_succeeds() {
    let harness = harness(healthy_scripts(), ScriptedGenerator::default());

    let run = harness.pipeline.run_pipeline().await;

    assert_eq!(run.status, RunStatus::Succeeded, "{:?}", run.failure);
    assert!(run.failure.is_none());
    assert!(
        PipelineStage::ALL
            .iter()
            .all(|stage| stage_status(&run, *stage) == Some(RunStatus::Succeeded))
    );
    assert_eq!(run.counts.collected, 6);
    assert_eq!(run.counts.deduplicated, 5);
    assert_eq!(run.counts.duplicates_removed, 1);
    assert_eq!(run.counts.unassigned, 1);

    let stages = harness.store.stages_for(run.run_id).await;
    for stage in ArtifactStage::ALL {
        assert!(stages.contains(&stage), "missing {stage} artifact");
    }

    let ranking: RankingArtifact = harness
        .store
        .get(run.run_id, ArtifactStage::Ranking)
        .await
        .expect("ranking stored")
        .payload_as()
        .expect("ranking decodes");
    let tech = ranking
        .segments
        .iter()
        .find(|segment| segment.segment_name == "tech")
        .expect("tech ranked");
    // Three tech candidates, capped at two.
    assert_eq!(tech.entries.len(), 2);

    let bulletins: GenerationOutcome = harness
        .store
        .get(run.run_id, ArtifactStage::Bulletins)
        .await
        .expect("bulletins stored")
        .payload_as()
        .expect("bulletins decode");
    assert_eq!(bulletins.bulletins.len(), 2);
    assert!(
        bulletins
            .bulletins
            .iter()
            .all(|bulletin| bulletin.mode == BulletinMode::Generated)
    );
    let tech_bulletin = bulletins
        .bulletins
        .iter()
        .find(|bulletin| bulletin.segment_name == "tech")
        .expect("tech bulletin");
    assert_eq!(
        tech_bulletin.source_article_ids,
        tech.article_ids().map(str::to_string).collect::<Vec<_>>()
    );
    assert!(tech_bulletin.generated_text.contains("# Tecnologia"));

    assert!((harness.metrics.runs_succeeded.get() - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn one_failing_source_yields_partial_run() {
    let mut scripts = healthy_scripts();
    scripts.insert("gamma".to_string(), Script::Fail);
    let harness = harness(scripts, ScriptedGenerator::default());

    let run = harness.pipeline.run_pipeline().await;

    assert_eq!(run.status, RunStatus::Partial);
    assert!(run.status.is_success());
    assert_eq!(stage_status(&run, PipelineStage::Collect), Some(RunStatus::Partial));
    assert_eq!(stage_status(&run, PipelineStage::Generate), Some(RunStatus::Succeeded));

    let gamma = run
        .sources
        .iter()
        .find(|report| report.source_id == "gamma")
        .expect("gamma reported");
    assert_eq!(gamma.status, RunStatus::Failed);
    // Permanent errors are not retried.
    assert_eq!(gamma.attempts, 1);
    assert!(gamma.error.as_deref().is_some_and(|error| error.contains("410")));
}

#[tokio::test]
async fn all_sources_failing_fails_run_before_normalization() {
    let scripts = HashMap::from([
        ("alpha".to_string(), Script::Fail),
        ("beta".to_string(), Script::Fail),
        ("gamma".to_string(), Script::Fail),
    ]);
    let harness = harness(scripts, ScriptedGenerator::default());

    let run = harness.pipeline.run_pipeline().await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.failure.as_ref().map(|failure| failure.kind),
        Some(FailureKind::Collection)
    );
    assert_eq!(stage_status(&run, PipelineStage::Collect), Some(RunStatus::Failed));
    for stage in [
        PipelineStage::NormalizeDedupe,
        PipelineStage::Segment,
        PipelineStage::Rank,
        PipelineStage::Generate,
        PipelineStage::Persist,
    ] {
        assert_eq!(stage_status(&run, stage), Some(RunStatus::Pending), "{stage}");
    }

    let stages = harness.store.stages_for(run.run_id).await;
    assert_eq!(stages, vec![ArtifactStage::Collection, ArtifactStage::RunSummary]);
    assert!(harness.generator.calls().is_empty());
    assert!((harness.metrics.runs_failed.get() - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn exhausted_generator_degrades_only_its_segment() {
    let harness = harness(healthy_scripts(), ScriptedGenerator::failing(&["saude"]));

    let run = harness.pipeline.run_pipeline().await;

    assert_eq!(run.status, RunStatus::Partial);
    assert_eq!(stage_status(&run, PipelineStage::Generate), Some(RunStatus::Partial));

    let saude = run
        .segments
        .iter()
        .find(|report| report.segment == "saude")
        .expect("saude reported");
    assert_eq!(saude.bulletin, Some(BulletinMode::Degraded));
    assert_eq!(saude.attempts, 3);
    assert!(saude.error.is_some());

    let tech = run
        .segments
        .iter()
        .find(|report| report.segment == "tech")
        .expect("tech reported");
    assert_eq!(tech.bulletin, Some(BulletinMode::Generated));
    assert_eq!(tech.attempts, 1);

    let calls = harness.generator.calls();
    assert_eq!(calls.iter().filter(|segment| *segment == "saude").count(), 3);
    assert_eq!(calls.iter().filter(|segment| *segment == "tech").count(), 1);

    let bulletins: GenerationOutcome = harness
        .store
        .get(run.run_id, ArtifactStage::Bulletins)
        .await
        .expect("bulletins stored")
        .payload_as()
        .expect("bulletins decode");
    let degraded = bulletins
        .bulletins
        .iter()
        .find(|bulletin| bulletin.segment_name == "saude")
        .expect("degraded bulletin present");
    assert!(degraded.generated_text.contains("Campanha de vacina começa"));
    assert!(!degraded.source_article_ids.is_empty());
}

#[tokio::test]
async fn stage_commands_chain_through_input_runs() {
    let harness = harness(healthy_scripts(), ScriptedGenerator::default());

    let collected = harness.pipeline.run_collect().await;
    assert_eq!(collected.status, RunStatus::Succeeded);
    assert_eq!(stage_status(&collected, PipelineStage::Segment), Some(RunStatus::Pending));

    let segmented = harness.pipeline.run_segment(Some(collected.run_id)).await;
    assert_eq!(segmented.status, RunStatus::Succeeded, "{:?}", segmented.failure);
    assert_eq!(segmented.input_run_id, Some(collected.run_id));
    assert_eq!(stage_status(&segmented, PipelineStage::Collect), Some(RunStatus::Pending));
    assert_eq!(stage_status(&segmented, PipelineStage::Rank), Some(RunStatus::Succeeded));
    assert_eq!(segmented.counts.deduplicated, 5);
    assert_eq!(
        segmented
            .stage(PipelineStage::Persist)
            .and_then(|record| record.detail.as_deref()),
        Some("3 stages persisted")
    );

    let generated = harness.pipeline.run_generate(Some(segmented.run_id)).await;
    assert_eq!(generated.status, RunStatus::Succeeded, "{:?}", generated.failure);
    assert_eq!(generated.input_run_id, Some(segmented.run_id));
    assert_eq!(generated.segments.len(), 2);

    let stages = harness.store.stages_for(generated.run_id).await;
    assert!(stages.contains(&ArtifactStage::Bulletins));
    assert!(!stages.contains(&ArtifactStage::Ranking));

    // Running segment twice over the same collection yields the same ranking.
    let again = harness.pipeline.run_segment(Some(collected.run_id)).await;
    let first: RankingArtifact = harness
        .store
        .get(segmented.run_id, ArtifactStage::Ranking)
        .await
        .expect("first ranking")
        .payload_as()
        .expect("decodes");
    let second: RankingArtifact = harness
        .store
        .get(again.run_id, ArtifactStage::Ranking)
        .await
        .expect("second ranking")
        .payload_as()
        .expect("decodes");
    assert_eq!(first, second);
}

#[tokio::test]
async fn generate_without_any_ranking_fails_with_input_error() {
    let harness = harness(healthy_scripts(), ScriptedGenerator::default());

    let run = harness.pipeline.run_generate(None).await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.failure.as_ref().map(|failure| failure.kind),
        Some(FailureKind::Input)
    );
    assert_eq!(run.input_run_id, None);
    assert!(harness.generator.calls().is_empty());
    assert_eq!(
        harness.store.stages_for(run.run_id).await,
        vec![ArtifactStage::RunSummary]
    );
}

#[tokio::test]
async fn segment_uses_latest_collection_by_default() {
    let harness = harness(healthy_scripts(), ScriptedGenerator::default());

    let collected = harness.pipeline.run_collect().await;
    let segmented = harness.pipeline.run_segment(None).await;

    assert_eq!(segmented.input_run_id, Some(collected.run_id));
    assert_eq!(segmented.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn failed_stage_artifact_write_fails_the_run() {
    let store = Arc::new(FailingStore::refusing(ArtifactStage::Ranking));
    let generator = Arc::new(ScriptedGenerator::default());
    let metrics = Arc::new(Metrics::detached().expect("metrics"));
    let pipeline = orchestrator(
        healthy_scripts(),
        Arc::clone(&generator),
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&metrics),
        None,
    );

    let run = pipeline.run_pipeline().await;

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(
        run.failure.as_ref().map(|failure| failure.kind),
        Some(FailureKind::Persistence)
    );
    assert_eq!(stage_status(&run, PipelineStage::Segment), Some(RunStatus::Succeeded));
    assert_eq!(stage_status(&run, PipelineStage::Rank), Some(RunStatus::Failed));
    assert_eq!(stage_status(&run, PipelineStage::Generate), Some(RunStatus::Pending));
    assert_eq!(stage_status(&run, PipelineStage::Persist), Some(RunStatus::Pending));
    assert!(generator.calls().is_empty());

    assert_eq!(
        store.inner.stages_for(run.run_id).await,
        vec![
            ArtifactStage::Collection,
            ArtifactStage::Normalized,
            ArtifactStage::Deduplicated,
            ArtifactStage::Segmentation,
            ArtifactStage::RunSummary,
        ]
    );
    let summary: PipelineRun = store
        .inner
        .get(run.run_id, ArtifactStage::RunSummary)
        .await
        .expect("summary stored")
        .payload_as()
        .expect("summary decodes");
    assert_eq!(summary, run);
    assert!((metrics.runs_failed.get() - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn failed_run_summary_write_fails_an_otherwise_complete_run() {
    let store = Arc::new(FailingStore::refusing(ArtifactStage::RunSummary));
    let generator = Arc::new(ScriptedGenerator::default());
    let metrics = Arc::new(Metrics::detached().expect("metrics"));
    let pipeline = orchestrator(
        healthy_scripts(),
        Arc::clone(&generator),
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&metrics),
        None,
    );

    let run = pipeline.run_pipeline().await;

    assert_eq!(run.status, RunStatus::Failed);
    assert!(!run.status.is_success());
    let failure = run.failure.as_ref().expect("failure recorded");
    assert_eq!(failure.kind, FailureKind::Persistence);
    assert!(failure.message.contains("run_summary"), "{}", failure.message);
    assert_eq!(stage_status(&run, PipelineStage::Generate), Some(RunStatus::Succeeded));
    assert_eq!(stage_status(&run, PipelineStage::Persist), Some(RunStatus::Failed));

    let stages = store.inner.stages_for(run.run_id).await;
    assert!(stages.contains(&ArtifactStage::Bulletins));
    assert!(!stages.contains(&ArtifactStage::RunSummary));
    assert!((metrics.runs_failed.get() - 1.0).abs() < f64::EPSILON);
    assert!(metrics.runs_succeeded.get().abs() < f64::EPSILON);
}

#[tokio::test]
async fn repeated_pipeline_reuses_cached_bulletins() {
    let store = Arc::new(MemoryArtifactStore::new());
    let generator = Arc::new(ScriptedGenerator::default());
    let metrics = Arc::new(Metrics::detached().expect("metrics"));
    let cache = Arc::new(MemoryGenerationCache::new());
    let pipeline = orchestrator(
        healthy_scripts(),
        Arc::clone(&generator),
        Arc::clone(&store) as Arc<dyn ArtifactStore>,
        Arc::clone(&metrics),
        Some(Arc::clone(&cache)),
    );

    let first = pipeline.run_pipeline().await;
    let second = pipeline.run_pipeline().await;

    assert_eq!(first.status, RunStatus::Succeeded);
    assert_eq!(second.status, RunStatus::Succeeded);
    assert_eq!(generator.calls().len(), 2);
    assert_eq!(cache.len().await, 2);
    assert!((metrics.generation_cache_hits.get() - 2.0).abs() < f64::EPSILON);

    let bulletins: GenerationOutcome = store
        .get(second.run_id, ArtifactStage::Bulletins)
        .await
        .expect("bulletins stored")
        .payload_as()
        .expect("bulletins decode");
    assert!(bulletins.bulletins.iter().all(|bulletin| bulletin.cached));
    assert!(second.segments.iter().all(|report| report.attempts == 0));
}
