use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use uuid::Uuid;

use bulletin_worker::{
    app::ComponentRegistry, config::Config, observability::Telemetry, pipeline::PipelineRun,
};

#[derive(Debug, Parser)]
#[command(name = "bulletin-worker", version, about = "Collects news feeds and writes per-segment bulletins")]
struct Cli {
    /// Root directory for run artifacts (overrides BULLETIN_OUTPUT_DIR)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Source and segment catalog in YAML (overrides BULLETIN_CATALOG_PATH)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch every configured source and store the raw records
    Collect,
    /// Normalize, dedupe, score and rank a previous collection
    Segment {
        /// Run whose collection to use; defaults to the latest one
        #[arg(long)]
        run: Option<Uuid>,
    },
    /// Write bulletins for a previous ranking
    Generate {
        /// Run whose ranking to use; defaults to the latest one
        #[arg(long)]
        run: Option<Uuid>,
    },
    /// Run every stage in one go
    Pipeline,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));

    let cli = Cli::parse();

    // Tracing initialization is handled by Telemetry::new()
    let telemetry = Telemetry::new()?;
    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(output_dir) = cli.output_dir {
        config = config.with_output_dir(output_dir);
    }
    if let Some(catalog) = cli.catalog {
        config = config.with_catalog_path(catalog);
    }

    let registry =
        ComponentRegistry::build(config, telemetry).context("failed to build component registry")?;
    let pipeline = registry.pipeline();

    let run: PipelineRun = match cli.command {
        Commands::Collect => pipeline.run_collect().await,
        Commands::Segment { run } => pipeline.run_segment(run).await,
        Commands::Generate { run } => pipeline.run_generate(run).await,
        Commands::Pipeline => pipeline.run_pipeline().await,
    };

    if let Some(path) = registry.config().metrics_path() {
        if let Err(err) = registry.telemetry().write_textfile(path).await {
            warn!(error = ?err, "failed to write metrics textfile");
        }
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&run).context("failed to render run summary")?
    );
    info!(run_id = %run.run_id, status = ?run.status, "exiting");

    if !run.status.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
