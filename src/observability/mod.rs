pub mod metrics;
pub(crate) mod structured_log;
pub mod tracing;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};

use self::metrics::Metrics;

/// Owns the metrics registry and the process-wide tracing setup.
#[derive(Debug, Clone)]
pub struct Telemetry {
    registry: Arc<Registry>,
    metrics: Arc<Metrics>,
}

impl Telemetry {
    /// Initializes tracing and registers the metrics.
    ///
    /// # Errors
    /// Returns an error when tracing or metric registration fails.
    pub fn new() -> Result<Self> {
        tracing::init()?;
        Self::without_tracing()
    }

    /// Metrics only; leaves the global subscriber alone.
    ///
    /// # Errors
    /// Returns an error when metric registration fails.
    pub fn without_tracing() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        let metrics = Arc::new(Metrics::new(&registry)?);
        Ok(Self { registry, metrics })
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Text exposition of every registered metric.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).ok();
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Writes the text exposition to `path` (node-exporter textfile style).
    ///
    /// # Errors
    /// Returns an error when the file cannot be written.
    pub async fn write_textfile(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(path, self.render_prometheus())
            .await
            .with_context(|| format!("failed to write metrics to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn textfile_contains_registered_counters() {
        let telemetry = Telemetry::without_tracing().expect("telemetry");
        telemetry.metrics().runs_partial.inc();

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("metrics").join("bulletin.prom");
        telemetry.write_textfile(&path).await.expect("writes");

        let text = std::fs::read_to_string(&path).expect("reads");
        assert!(text.contains("bulletin_runs_partial_total 1"));
    }
}
