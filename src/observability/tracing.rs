use anyhow::{Error, Result};
use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use super::structured_log::StructuredLogLayer;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Initializes the tracing subscriber once.
///
/// Logs go to stderr as JSON so stdout stays free for the run summary. `RUST_LOG` overrides the
/// default `info` filter. [`StructuredLogLayer`] additionally re-emits events that carry
/// `bulletin.*` fields.
///
/// # Errors
/// Returns an error when a global subscriber was already installed by someone else.
pub fn init() -> Result<()> {
    TRACING_INIT.get_or_try_init(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(StructuredLogLayer)
            .try_init()
            .map_err(|e: tracing_subscriber::util::TryInitError| Error::msg(e.to_string()))?;
        info!(version = env!("CARGO_PKG_VERSION"), "tracing initialized");

        Ok::<(), Error>(())
    })?;
    Ok(())
}
