use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Table};
use taxistar_core::config::PipelineConfig;
use taxistar_core::registry::SourceRegistry;
use taxistar_core::storage::inspect;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Taxistar administrative tooling", long_about = None)]
struct Cli {
    /// Pipeline config file (TOML); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show row counts for every stored table
    Inspect,
    /// Inspect or edit the processed-source registry
    #[command(subcommand)]
    Registry(RegistryCommand),
}

#[derive(Subcommand, Debug)]
enum RegistryCommand {
    /// List recorded sources
    List,
    /// Forget a recorded source so the next run processes it again
    Forget(ForgetArgs),
}

#[derive(Args, Debug)]
struct ForgetArgs {
    /// Source id, e.g. yellow_tripdata_2025-01.parquet
    source_id: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Inspect => handle_inspect(&config),
        Command::Registry(RegistryCommand::List) => handle_registry_list(&config),
        Command::Registry(RegistryCommand::Forget(args)) => handle_registry_forget(&config, args),
    }
}

fn handle_inspect(config: &PipelineConfig) -> Result<()> {
    let summaries = inspect(&config.data_root)?;
    if summaries.is_empty() {
        println!("No stored tables under {}.", config.data_root.display());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["format", "table", "partition", "rows"]);
    for summary in &summaries {
        table.add_row(vec![
            summary.format.to_string(),
            summary.table.clone(),
            summary.partition.clone().unwrap_or_default(),
            summary.rows.to_string(),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn handle_registry_list(config: &PipelineConfig) -> Result<()> {
    let registry = SourceRegistry::load(&config.registry_path)?;
    if registry.entries().is_empty() {
        println!("No sources recorded in {}.", registry.path().display());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["source", "processed at", "fact rows", "content hash"]);
    for entry in registry.entries() {
        table.add_row(vec![
            entry.source_id.clone(),
            entry
                .processed_at
                .map_or_else(|| "-".to_string(), |at| at.to_rfc3339()),
            entry
                .fact_rows
                .map_or_else(|| "-".to_string(), |rows| rows.to_string()),
            entry
                .content_hash
                .as_deref()
                .map_or_else(|| "-".to_string(), |hash| hash.chars().take(16).collect()),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn handle_registry_forget(config: &PipelineConfig, args: ForgetArgs) -> Result<()> {
    let mut registry = SourceRegistry::load(&config.registry_path)?;
    if registry.forget(&args.source_id) {
        registry.save()?;
        info!(source_id = %args.source_id, "source forgotten");
        println!("Forgot {}; it will be processed on the next run.", args.source_id);
    } else {
        warn!(source_id = %args.source_id, "source not found in registry");
        println!("{} is not recorded.", args.source_id);
    }
    Ok(())
}
