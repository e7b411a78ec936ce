use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use taxistar_core::config::PipelineConfig;
use taxistar_core::fetch::HttpFetcher;
use taxistar_core::pipeline::{fetch_zones, ingest_source, run_pending, BatchSummary};
use taxistar_core::registry::SourceRegistry;
use taxistar_core::sources::{candidate_sources, LocalFiles, SourceLoader, SourceLocation, SourceRef};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const LOG_FILE_NAME: &str = "taxistar.log";

#[derive(Parser, Debug)]
#[command(author, version, about = "NYC taxi star-schema pipeline", long_about = None)]
struct Cli {
    /// Pipeline config file (TOML); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and process every trip source not yet recorded
    Run,
    /// Process a local trip file and zone lookup
    Process(ProcessArgs),
    /// List candidate sources with availability and processed status
    Sources,
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// Monthly trip parquet file
    #[arg(long)]
    trips: PathBuf,
    /// Taxi zone lookup CSV
    #[arg(long)]
    zones: PathBuf,
    /// Batch id for stored rows; defaults to the trip file name
    #[arg(long)]
    source_id: Option<String>,
    /// Do not record the source in the registry
    #[arg(long)]
    no_record: bool,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())?;
    let _log_guard = init_logging(&config.log_dir);

    let outcome = match cli.command {
        Command::Run => handle_run(&config),
        Command::Process(args) => handle_process(&config, args),
        Command::Sources => handle_sources(&config),
    };
    if let Err(err) = &outcome {
        error!(error = %format!("{err:#}"), "taxistar failed");
    }
    outcome
}

/// Installs a stderr layer and a daily-rolling JSON file layer. The returned
/// guard flushes the file writer when dropped.
fn init_logging(log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_filter(env_filter("RUST_LOG", "info"));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(env_filter("RUST_LOG_JSON", "debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    guard
}

fn env_filter(var: &str, default: &str) -> EnvFilter {
    EnvFilter::try_from_env(var).unwrap_or_else(|_| EnvFilter::new(default))
}

fn handle_run(config: &PipelineConfig) -> Result<()> {
    let fetcher = HttpFetcher::with_download_timeout(config.download_timeout())
        .context("failed to build HTTP client")?;
    let mut registry = SourceRegistry::load(&config.registry_path)?;
    let today = Local::now().date_naive();

    let summary = run_pending(config, &fetcher, &mut registry, today)?;
    for batch in &summary.processed {
        print_batch(batch);
    }
    for failed in &summary.failed {
        warn!(source_id = %failed.source_id, error = %failed.error, "source not processed");
    }
    println!(
        "processed {} source(s), {} failed",
        summary.processed.len(),
        summary.failed.len()
    );
    Ok(())
}

fn handle_process(config: &PipelineConfig, args: ProcessArgs) -> Result<()> {
    let source_id = match args.source_id {
        Some(id) => id,
        None => args
            .trips
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .context("trip path has no file name; pass --source-id")?,
    };
    let source = SourceRef {
        id: source_id,
        location: SourceLocation::Path(args.trips),
    };

    let loader = LocalFiles;
    let zones = fetch_zones(&SourceLocation::Path(args.zones), &loader)?;
    let (batch, entry) = ingest_source(&source, &zones, config, &loader)?;
    print_batch(&batch);

    if args.no_record {
        info!(source_id = %source.id, "registry left unchanged");
        return Ok(());
    }
    let mut registry = SourceRegistry::load(&config.registry_path)?;
    registry.record(entry);
    registry.save()?;
    Ok(())
}

fn handle_sources(config: &PipelineConfig) -> Result<()> {
    let fetcher = HttpFetcher::with_download_timeout(config.download_timeout())
        .context("failed to build HTTP client")?;
    let registry = SourceRegistry::load(&config.registry_path)?;
    let today = Local::now().date_naive();

    for source in candidate_sources(&config.sources, today) {
        let processed = registry.contains(&source.id);
        let available = processed || fetcher.is_available(&source.location);
        println!(
            "{:<36} {:<11} {}",
            source.id,
            if available { "available" } else { "unavailable" },
            if processed { "processed" } else { "pending" },
        );
    }
    Ok(())
}

fn print_batch(batch: &BatchSummary) {
    match serde_json::to_string_pretty(batch) {
        Ok(json) => println!("{json}"),
        Err(err) => warn!(error = %err, "could not render batch summary"),
    }
}
