use std::{
    env, fmt::Display, num::NonZeroUsize, ops::RangeInclusive, path::PathBuf, str::FromStr,
    time::Duration,
};

use thiserror::Error;

use crate::util::retry::RetryConfig;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

const MAX_LOOKBACK_DAYS: u32 = 365;
const MAX_CALL_TIMEOUT_SECS: u64 = 3_600;
const MAX_RUN_TIMEOUT_SECS: u64 = 7 * 86_400;
const MAX_CACHE_TTL_HOURS: u64 = 30 * 24;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    output_dir: PathBuf,
    catalog_path: Option<PathBuf>,
    lookback_days: u32,
    max_articles_per_source: usize,
    max_articles_per_segment: NonZeroUsize,
    segment_threshold: f64,
    segment_title_boost: f64,
    dedup_title_similarity: Option<f64>,
    source_max_retries: usize,
    source_backoff_base_ms: u64,
    source_backoff_cap_ms: u64,
    source_timeout: Duration,
    source_max_concurrency: Option<NonZeroUsize>,
    generation_max_retries: usize,
    generation_backoff_base_ms: u64,
    generation_backoff_cap_ms: u64,
    generation_timeout: Duration,
    generation_segment_pause: Duration,
    generator_base_url: String,
    generator_api_key: Option<String>,
    generator_model: String,
    generator_max_tokens: u32,
    generator_temperature: f64,
    generation_cache_enabled: bool,
    generation_cache_ttl: Duration,
    run_timeout: Option<Duration>,
    metrics_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// Reads and validates the worker settings from the environment.
    ///
    /// Every variable is optional; unset values fall back to the documented defaults.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when a variable is set but cannot be parsed or is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let output_dir = PathBuf::from(
            env::var("BULLETIN_OUTPUT_DIR").unwrap_or_else(|_| "outputs".to_string()),
        );
        let catalog_path = optional_string("BULLETIN_CATALOG_PATH").map(PathBuf::from);

        // Collection window and caps
        let lookback_days = parse_in_range("BULLETIN_LOOKBACK_DAYS", 5, 1..=MAX_LOOKBACK_DAYS)?;
        let max_articles_per_source = parse_usize("BULLETIN_MAX_ARTICLES_PER_SOURCE", 100)?;
        let max_articles_per_segment =
            parse_non_zero_usize("BULLETIN_MAX_ARTICLES_PER_SEGMENT", 15)?;

        // Scoring
        let segment_threshold = parse_non_negative_f64("SEGMENT_THRESHOLD", 0.0)?;
        let segment_title_boost = parse_non_negative_f64("SEGMENT_TITLE_BOOST", 2.0)?;
        let dedup_title_similarity = parse_optional_ratio("DEDUP_TITLE_SIMILARITY")?;

        // Source fetch retries (exponential backoff + jitter)
        let source_max_retries = parse_attempts("SOURCE_MAX_RETRIES", 3)?;
        let source_backoff_base_ms = parse_u64("SOURCE_BACKOFF_BASE_MS", 500)?;
        let source_backoff_cap_ms = parse_u64("SOURCE_BACKOFF_CAP_MS", 10000)?;
        let source_timeout = Duration::from_secs(parse_in_range(
            "SOURCE_TIMEOUT_SECS",
            30,
            1..=MAX_CALL_TIMEOUT_SECS,
        )?);
        let source_max_concurrency =
            NonZeroUsize::new(parse_usize("SOURCE_MAX_CONCURRENCY", 0)?);

        // Generation retries
        let generation_max_retries = parse_attempts("GENERATION_MAX_RETRIES", 3)?;
        let generation_backoff_base_ms = parse_u64("GENERATION_BACKOFF_BASE_MS", 2000)?;
        let generation_backoff_cap_ms = parse_u64("GENERATION_BACKOFF_CAP_MS", 60000)?;
        let generation_timeout = Duration::from_secs(parse_in_range(
            "GENERATION_TIMEOUT_SECS",
            60,
            1..=MAX_CALL_TIMEOUT_SECS,
        )?);
        let generation_segment_pause = parse_duration_ms("GENERATION_SEGMENT_PAUSE_MS", 2000)?;

        // Generator endpoint
        let generator_base_url = env::var("GENERATOR_BASE_URL")
            .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string());
        let generator_api_key = optional_string("GENERATOR_API_KEY");
        let generator_model = env::var("GENERATOR_MODEL")
            .unwrap_or_else(|_| "google/gemini-2.5-flash-lite".to_string());
        let generator_max_tokens = parse_in_range("GENERATOR_MAX_TOKENS", 4000, 1..=200_000)?;
        let generator_temperature = parse_non_negative_f64("GENERATOR_TEMPERATURE", 0.7)?;

        // Generation cache
        let generation_cache_enabled = parse_bool("GENERATION_CACHE_ENABLED", true)?;
        let generation_cache_ttl = Duration::from_secs(
            parse_in_range("GENERATION_CACHE_TTL_HOURS", 24, 1..=MAX_CACHE_TTL_HOURS)? * 3_600,
        );

        let run_timeout = optional_string("PIPELINE_RUN_TIMEOUT_SECS")
            .map(|_| parse_in_range("PIPELINE_RUN_TIMEOUT_SECS", 0, 1..=MAX_RUN_TIMEOUT_SECS))
            .transpose()?
            .map(Duration::from_secs);
        let metrics_path = optional_string("BULLETIN_METRICS_PATH").map(PathBuf::from);

        Ok(Self {
            output_dir,
            catalog_path,
            lookback_days,
            max_articles_per_source,
            max_articles_per_segment,
            segment_threshold,
            segment_title_boost,
            dedup_title_similarity,
            source_max_retries,
            source_backoff_base_ms,
            source_backoff_cap_ms,
            source_timeout,
            source_max_concurrency,
            generation_max_retries,
            generation_backoff_base_ms,
            generation_backoff_cap_ms,
            generation_timeout,
            generation_segment_pause,
            generator_base_url,
            generator_api_key,
            generator_model,
            generator_max_tokens,
            generator_temperature,
            generation_cache_enabled,
            generation_cache_ttl,
            run_timeout,
            metrics_path,
        })
    }

    /// Overrides the artifact root (e.g. from a CLI flag).
    #[must_use]
    pub fn with_output_dir(mut self, output_dir: PathBuf) -> Self {
        self.output_dir = output_dir;
        self
    }

    /// Overrides the catalog location (e.g. from a CLI flag).
    #[must_use]
    pub fn with_catalog_path(mut self, catalog_path: PathBuf) -> Self {
        self.catalog_path = Some(catalog_path);
        self
    }

    #[must_use]
    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    #[must_use]
    pub fn catalog_path(&self) -> Option<&PathBuf> {
        self.catalog_path.as_ref()
    }

    #[must_use]
    pub fn lookback_days(&self) -> u32 {
        self.lookback_days
    }

    #[must_use]
    pub fn max_articles_per_source(&self) -> usize {
        self.max_articles_per_source
    }

    #[must_use]
    pub fn max_articles_per_segment(&self) -> NonZeroUsize {
        self.max_articles_per_segment
    }

    #[must_use]
    pub fn segment_threshold(&self) -> f64 {
        self.segment_threshold
    }

    #[must_use]
    pub fn segment_title_boost(&self) -> f64 {
        self.segment_title_boost
    }

    #[must_use]
    pub fn dedup_title_similarity(&self) -> Option<f64> {
        self.dedup_title_similarity
    }

    #[must_use]
    pub fn source_retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.source_max_retries,
            self.source_backoff_base_ms,
            self.source_backoff_cap_ms,
        )
    }

    #[must_use]
    pub fn source_timeout(&self) -> Duration {
        self.source_timeout
    }

    /// `None` means one slot per configured source.
    #[must_use]
    pub fn source_max_concurrency(&self) -> Option<NonZeroUsize> {
        self.source_max_concurrency
    }

    #[must_use]
    pub fn generation_retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.generation_max_retries,
            self.generation_backoff_base_ms,
            self.generation_backoff_cap_ms,
        )
    }

    #[must_use]
    pub fn generation_timeout(&self) -> Duration {
        self.generation_timeout
    }

    #[must_use]
    pub fn generation_segment_pause(&self) -> Duration {
        self.generation_segment_pause
    }

    #[must_use]
    pub fn generator_base_url(&self) -> &str {
        &self.generator_base_url
    }

    #[must_use]
    pub fn generator_api_key(&self) -> Option<&str> {
        self.generator_api_key.as_deref()
    }

    #[must_use]
    pub fn generator_model(&self) -> &str {
        &self.generator_model
    }

    #[must_use]
    pub fn generator_max_tokens(&self) -> u32 {
        self.generator_max_tokens
    }

    #[must_use]
    pub fn generator_temperature(&self) -> f64 {
        self.generator_temperature
    }

    #[must_use]
    pub fn generation_cache_enabled(&self) -> bool {
        self.generation_cache_enabled
    }

    #[must_use]
    pub fn generation_cache_ttl(&self) -> Duration {
        self.generation_cache_ttl
    }

    /// Where cached bulletin texts live. Kept beside the run directories.
    #[must_use]
    pub fn generation_cache_dir(&self) -> PathBuf {
        self.output_dir.join("cache").join("bulletins")
    }

    #[must_use]
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout
    }

    #[must_use]
    pub fn metrics_path(&self) -> Option<&PathBuf> {
        self.metrics_path.as_ref()
    }
}

fn optional_string(name: &'static str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let parsed = parse_usize(name, default)?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_attempts(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    parse_non_zero_usize(name, default).map(NonZeroUsize::get)
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(value))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim().parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.trim().parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

/// Parses `name` (or `default` when unset) and requires it to fall in `range`.
fn parse_in_range<T>(name: &'static str, default: T, range: RangeInclusive<T>) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Display + Copy,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.trim().parse::<T>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if !range.contains(&parsed) {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!(
                "{parsed} is outside {}..={}",
                range.start(),
                range.end()
            ),
        });
    }
    Ok(parsed)
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = optional_string(name) else {
        return Ok(default);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("expected a boolean, got `{raw}`"),
        }),
    }
}

fn parse_non_negative_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.trim().parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("must be a finite, non-negative number"),
        });
    }
    Ok(parsed)
}

fn parse_optional_ratio(name: &'static str) -> Result<Option<f64>, ConfigError> {
    let Some(raw) = optional_string(name) else {
        return Ok(None);
    };
    let parsed = raw.parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    if !(parsed > 0.0 && parsed <= 1.0) {
        return Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("value must be in (0, 1]"),
        });
    }
    Ok(Some(parsed))
}
