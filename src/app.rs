use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    catalog::Catalog,
    clients::{
        ChatCompletionGenerator, ChatCompletionSettings, Generator, RssSourceAdapter,
        UnavailableGenerator,
    },
    config::Config,
    observability::Telemetry,
    pipeline::{
        BulletinGenerateStage, CollectSettings, GenerateSettings, PipelineOrchestrator,
        SourceCollectStage,
    },
    store::{FsArtifactStore, FsGenerationCache},
};

/// Everything one CLI invocation needs, wired from the config and the catalog.
pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    pipeline: PipelineOrchestrator,
}

impl ComponentRegistry {
    /// Loads the catalog and builds the clients, stages and orchestrator.
    ///
    /// # Errors
    /// Returns an error when the catalog is invalid or an HTTP client cannot be built.
    pub fn build(config: Config, telemetry: Telemetry) -> Result<Self> {
        let config = Arc::new(config);
        let catalog = Arc::new(
            Catalog::load(config.catalog_path().map(PathBuf::as_path))
                .context("failed to load source and segment catalog")?,
        );
        let metrics = telemetry.metrics();

        let adapter = Arc::new(RssSourceAdapter::new(
            &catalog.sources,
            config.source_timeout(),
        )?);
        let collect = SourceCollectStage::new(
            adapter,
            catalog.source_ids(),
            CollectSettings {
                lookback_days: config.lookback_days(),
                max_articles_per_source: config.max_articles_per_source(),
                retry: config.source_retry(),
                attempt_timeout: config.source_timeout(),
                max_concurrency: config.source_max_concurrency(),
            },
            Arc::clone(&metrics),
        );

        let generator = build_generator(&config)?;
        let mut generate = BulletinGenerateStage::new(
            generator,
            GenerateSettings {
                retry: config.generation_retry(),
                call_timeout: config.generation_timeout(),
                segment_pause: config.generation_segment_pause(),
            },
            Arc::clone(&metrics),
        );
        if config.generation_cache_enabled() {
            generate = generate.with_cache(
                Arc::new(FsGenerationCache::new(config.generation_cache_dir())),
                config.generation_cache_ttl(),
            );
        }

        let store = Arc::new(FsArtifactStore::new(config.output_dir().clone()));
        info!(
            output_dir = %config.output_dir().display(),
            sources = catalog.sources.len(),
            segments = catalog.segments.len(),
            "components initialized"
        );

        let pipeline = PipelineOrchestrator::builder(Arc::clone(&config), catalog)
            .with_collect_stage(Arc::new(collect))
            .with_generate_stage(Arc::new(generate))
            .with_store(store)
            .with_metrics(metrics)
            .build()?;

        Ok(Self {
            config,
            telemetry,
            pipeline,
        })
    }

    #[must_use]
    pub fn pipeline(&self) -> &PipelineOrchestrator {
        &self.pipeline
    }

    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }
}

fn build_generator(config: &Config) -> Result<Arc<dyn Generator>> {
    let Some(api_key) = config.generator_api_key() else {
        warn!("GENERATOR_API_KEY is not set; every bulletin will use the plain article list");
        return Ok(Arc::new(UnavailableGenerator));
    };
    let generator = ChatCompletionGenerator::new(ChatCompletionSettings {
        base_url: config.generator_base_url().to_string(),
        api_key: api_key.to_string(),
        model: config.generator_model().to_string(),
        max_tokens: config.generator_max_tokens(),
        temperature: config.generator_temperature(),
        timeout: config.generation_timeout(),
    })?;
    Ok(Arc::new(generator))
}
