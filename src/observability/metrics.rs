//! Prometheus metric definitions.
use prometheus::{
    Counter, Histogram, Registry, register_counter_with_registry,
    register_histogram_with_registry,
};

#[derive(Debug, Clone)]
pub struct Metrics {
    // counters
    pub sources_fetched: Counter,
    pub sources_failed: Counter,
    pub fetch_retries: Counter,
    pub articles_collected: Counter,
    pub articles_rejected: Counter,
    pub articles_deduplicated: Counter,
    pub bulletins_generated: Counter,
    pub bulletins_degraded: Counter,
    pub generation_retries: Counter,
    pub generation_cache_hits: Counter,
    pub runs_succeeded: Counter,
    pub runs_partial: Counter,
    pub runs_failed: Counter,

    // histograms
    pub fetch_duration: Histogram,
    pub generation_duration: Histogram,
    pub run_duration: Histogram,
}

impl Metrics {
    /// Registers every metric with `registry`.
    ///
    /// # Errors
    /// Returns an error when a metric with the same name is already registered.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            sources_fetched: register_counter_with_registry!(
                "bulletin_sources_fetched_total",
                "Sources fetched successfully",
                registry
            )?,
            sources_failed: register_counter_with_registry!(
                "bulletin_sources_failed_total",
                "Sources that failed after all attempts",
                registry
            )?,
            fetch_retries: register_counter_with_registry!(
                "bulletin_fetch_retries_total",
                "Source fetch retries",
                registry
            )?,
            articles_collected: register_counter_with_registry!(
                "bulletin_articles_collected_total",
                "Raw records collected from sources",
                registry
            )?,
            articles_rejected: register_counter_with_registry!(
                "bulletin_articles_rejected_total",
                "Raw records rejected by the normalizer",
                registry
            )?,
            articles_deduplicated: register_counter_with_registry!(
                "bulletin_articles_deduplicated_total",
                "Articles removed as duplicates",
                registry
            )?,
            bulletins_generated: register_counter_with_registry!(
                "bulletin_bulletins_generated_total",
                "Bulletins produced by the generator",
                registry
            )?,
            bulletins_degraded: register_counter_with_registry!(
                "bulletin_bulletins_degraded_total",
                "Bulletins that fell back to the plain article list",
                registry
            )?,
            generation_retries: register_counter_with_registry!(
                "bulletin_generation_retries_total",
                "Generator call retries",
                registry
            )?,
            generation_cache_hits: register_counter_with_registry!(
                "bulletin_generation_cache_hits_total",
                "Bulletins served from the generation cache",
                registry
            )?,
            runs_succeeded: register_counter_with_registry!(
                "bulletin_runs_succeeded_total",
                "Runs that finished with every stage succeeded",
                registry
            )?,
            runs_partial: register_counter_with_registry!(
                "bulletin_runs_partial_total",
                "Runs that finished with degraded output",
                registry
            )?,
            runs_failed: register_counter_with_registry!(
                "bulletin_runs_failed_total",
                "Runs that failed",
                registry
            )?,
            fetch_duration: register_histogram_with_registry!(
                "bulletin_fetch_duration_seconds",
                "Duration of one source fetch including retries",
                registry
            )?,
            generation_duration: register_histogram_with_registry!(
                "bulletin_generation_duration_seconds",
                "Duration of one segment's generation including retries",
                registry
            )?,
            run_duration: register_histogram_with_registry!(
                "bulletin_run_duration_seconds",
                "Duration of a whole run",
                registry
            )?,
        })
    }

    /// Metrics on a throwaway registry, for tests and dry runs.
    ///
    /// # Errors
    /// Returns an error when registration fails.
    pub fn detached() -> Result<Self, prometheus::Error> {
        Self::new(&Registry::new())
    }
}
