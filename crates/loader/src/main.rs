//! Strata loader - stream NDJSON records into a table
//!
//! # Usage
//!
//! ```bash
//! # Load a file
//! strata-load --config strata.toml --table users --input users.ndjson
//!
//! # Read stdin, print what would be pushed without sending anything
//! cat users.ndjson | strata-load --table users --dry-run
//! ```
//!
//! Logs go to stderr. The final report is printed to stdout as JSON.

mod config;
mod input;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use strata_bulk::{BulkProcessor, HttpBulkWriter, MemoryWriter, RemoteWriter, Stats};
use tokio::io::{AsyncBufRead, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{LoaderConfig, LogFormat};
use crate::input::InputSummary;

/// Strata loader - stream NDJSON records into a table
#[derive(Parser, Debug)]
#[command(name = "strata-load")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Destination table
    #[arg(short, long)]
    table: String,

    /// NDJSON input file, or `-` for stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Batch and count records without sending them
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long)]
    log_level: Option<String>,
}

/// Printed to stdout once the run completes
#[derive(Serialize)]
struct Report<'a> {
    table: &'a str,
    dry_run: bool,
    input: InputSummary,
    stats: Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => LoaderConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => LoaderConfig::default(),
    };

    let level = cli
        .log_level
        .as_deref()
        .unwrap_or(config.log.level.as_str());
    init_logging(level, config.log.format)?;

    config.validate(cli.dry_run)?;

    let writer: Arc<dyn RemoteWriter> = if cli.dry_run {
        Arc::new(MemoryWriter::new())
    } else {
        Arc::new(HttpBulkWriter::new(config.remote.clone())?)
    };

    let processor = BulkProcessor::new(config.processor.clone(), writer)?;

    tracing::info!(
        table = %cli.table,
        input = %cli.input,
        dry_run = cli.dry_run,
        "loading records"
    );

    let reader = open_input(&cli.input).await?;
    let summary = input::read_records(reader, |record| processor.put_record(&cli.table, record))
        .await
        .with_context(|| format!("failed to read {}", cli.input))?;

    let stats = processor.close().await;

    let report = Report {
        table: &cli.table,
        dry_run: cli.dry_run,
        input: summary,
        stats,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.stats.failed_records > 0 {
        anyhow::bail!(
            "{} records in {} batches could not be pushed",
            report.stats.failed_records,
            report.stats.failed_batches
        );
    }

    Ok(())
}

async fn open_input(input: &str) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }

    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("failed to open {input}"))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Console => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }

    Ok(())
}
