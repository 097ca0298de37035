//! # ShelfSync CLI
//!
//! The `shelfsync` binary drives the validation pipeline and the sync
//! orchestrator from the command line.
//!
//! ## Usage
//!
//! ```bash
//! shelfsync --config ./shelfsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shelfsync validate <file>` | Validate and normalize raw records from a JSON file |
//! | `shelfsync sync <source> <target>` | Diff two canonical sets and run a sync |
//! | `shelfsync stats <file>` | Print batch statistics and quality score only |
//!
//! ## Examples
//!
//! ```bash
//! # Validate a Readmoo export and write canonical books to stdout
//! shelfsync validate readmoo.json --platform readmoo > canonical.json
//!
//! # Sync a local canonical set against a remote one
//! shelfsync sync local.json remote.json --compare HASH_COMPARE
//!
//! # Quality summary without the record payloads
//! shelfsync stats readmoo.json --platform readmoo
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shelfsync::compare::{CompareOptions, CompareStrategy};
use shelfsync::config::{self, Config, SyncStrategy};
use shelfsync::models::{CanonicalBook, Platform, RawRecord};
use shelfsync::pipeline::ValidationPipeline;
use shelfsync::progress::TracingEvents;
use shelfsync::quality;
use shelfsync::sync::SyncOrchestrator;

/// ShelfSync CLI — validation, normalization, and synchronization for book
/// catalog records scraped from reading platforms.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; when the file does not exist, built-in defaults apply.
#[derive(Parser)]
#[command(
    name = "shelfsync",
    about = "ShelfSync — validate, normalize, and synchronize book catalog records",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./shelfsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Validate and normalize raw records.
    ///
    /// Reads a JSON array of raw records, runs the full pipeline
    /// (auto-fix, validation, normalization, quality scoring), and prints
    /// the batch result as JSON. Invalid records are reported, never
    /// dropped silently.
    Validate {
        /// JSON file containing an array of raw records.
        file: PathBuf,

        /// Source platform of the records.
        #[arg(long, default_value = "readmoo")]
        platform: Platform,

        /// Source tag recorded in the batch (e.g. `library`, `shelf`).
        #[arg(long, default_value = "library")]
        source: String,

        /// Enable strict validation (shorter title floor, ISBN warnings).
        #[arg(long)]
        strict: bool,

        /// Disable the auto-fix passes.
        #[arg(long)]
        no_fix: bool,

        /// Print only the normalized canonical books, not the full report.
        #[arg(long)]
        books_only: bool,
    },

    /// Diff two canonical record sets and run a sync between them.
    ///
    /// Both files must contain JSON arrays of canonical books (the
    /// `normalizedBooks` output of `validate`). Prints the sync report.
    Sync {
        /// Source (local) canonical set.
        source: PathBuf,

        /// Target (remote) canonical set.
        target: PathBuf,

        /// Force a strategy instead of the automatic decision table:
        /// `STANDARD_SYNC`, `BATCH_SYNC`, `PARALLEL_SYNC`, `INCREMENTAL_SYNC`.
        #[arg(long)]
        strategy: Option<SyncStrategy>,

        /// Comparison strategy: `FIELD_LEVEL`, `OBJECT_LEVEL`,
        /// `DEEP_COMPARE`, or `HASH_COMPARE`.
        #[arg(long, default_value = "FIELD_LEVEL")]
        compare: CompareStrategy,
    },

    /// Validate records and print statistics only.
    ///
    /// Same pipeline as `validate`, but the output is just the counts,
    /// quality score, and metrics — useful for health checks.
    Stats {
        /// JSON file containing an array of raw records.
        file: PathBuf,

        /// Source platform of the records.
        #[arg(long, default_value = "readmoo")]
        platform: Platform,
    },
}

fn load_config_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::default())
    }
}

fn read_raw_records(path: &Path) -> anyhow::Result<Vec<RawRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse records file: {}", path.display()))
}

fn read_canonical(path: &Path) -> anyhow::Result<Vec<CanonicalBook>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read canonical file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse canonical file: {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Validate {
            file,
            platform,
            source,
            strict,
            no_fix,
            books_only,
        } => {
            let records = read_raw_records(&file)?;
            let mut options = config.pipeline;
            options.strict_mode = strict || options.strict_mode;
            if no_fix {
                options.auto_fix = false;
            }
            let pipeline = ValidationPipeline::new(options);
            let result = pipeline
                .validate_and_normalize(records, platform, &source, &TracingEvents)
                .await?;
            if books_only {
                println!("{}", serde_json::to_string_pretty(&result.normalized_books)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
            if result.statistics.failed > 0 {
                eprintln!(
                    "{} of {} records failed validation",
                    result.statistics.failed, result.statistics.total
                );
            }
        }

        Commands::Sync {
            source,
            target,
            strategy,
            compare,
        } => {
            let source_books = read_canonical(&source)?;
            let target_books = read_canonical(&target)?;
            let mut sync_options = config.sync;
            if let Some(strategy) = strategy {
                sync_options.strategy = strategy;
            }
            let orchestrator = SyncOrchestrator::new(sync_options).with_compare_options(
                CompareOptions {
                    strategy: compare,
                    fields: None,
                },
            );
            let report = orchestrator
                .orchestrate_sync(&source_books, &target_books, &TracingEvents)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.unresolved_conflicts.is_empty() {
                eprintln!(
                    "{} conflicts need manual resolution",
                    report.unresolved_conflicts.len()
                );
            }
        }

        Commands::Stats { file, platform } => {
            let records = read_raw_records(&file)?;
            let thresholds = config.pipeline.quality_thresholds;
            let pipeline = ValidationPipeline::new(config.pipeline);
            let result = pipeline
                .validate_and_normalize(records, platform, "stats", &TracingEvents)
                .await?;
            let band = quality::band(result.quality_score, &thresholds);
            let summary = serde_json::json!({
                "statistics": result.statistics,
                "qualityScore": result.quality_score,
                "qualityBand": format!("{:?}", band),
                "warnings": result.warnings.len(),
                "metrics": result.metrics,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
