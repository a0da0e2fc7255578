//! Sluice Ingest - stream NDJSON records through an ingestion pipeline

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use sluice_common::logging::{init_logging, LogConfig, LogLevel};
use sluice_common::Record;
use sluice_ingest::{IngestConfig, IngestionPipeline, SendRequest, SenderRegistry, StepRegistry};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sluice-ingest")]
#[command(author, version, about = "Stream newline-delimited JSON records through a Sluice pipeline")]
struct Cli {
    /// NDJSON input file, or '-' for stdin
    #[arg(default_value = "-")]
    input: PathBuf,

    /// Destination table for every record
    #[arg(short, long)]
    table: String,

    /// Target connection string, URL or path passed to the sender
    #[arg(long)]
    target: Option<String>,

    /// Sender method; falls back to SLUICE_METHODS / SLUICE_DEFAULT_METHOD, then 'log'
    #[arg(short, long)]
    method: Option<String>,

    /// Collection id attached to every record
    #[arg(long)]
    collection_id: Option<String>,

    /// Pre-processing steps, comma separated (overrides SLUICE_PREPROCESS_STEPS)
    #[arg(long, value_delimiter = ',')]
    steps: Vec<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("sluice-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::default().merge_env()?;
    if !cli.steps.is_empty() {
        config.preprocess_steps = cli.steps.clone();
    }
    if config.methods.is_empty() && config.default_method.is_none() {
        config.default_method = Some("log".to_string());
    }

    let pipeline = IngestionPipeline::start(
        config,
        SenderRegistry::with_builtins(),
        &StepRegistry::with_builtins(),
    )?;

    let reader = open_input(&cli.input).await?;
    let (sent, skipped) = stream_records(&pipeline, &cli, reader).await?;
    info!(sent, skipped, "Input exhausted, draining pipeline");

    let summary = pipeline.close().await?;
    info!(
        records = summary.metrics.records_dispatched,
        batches = summary.metrics.batches_succeeded,
        failed = summary.metrics.records_failed,
        "Ingestion complete"
    );
    Ok(())
}

async fn open_input(path: &Path) -> Result<Box<dyn AsyncBufRead + Unpin + Send>> {
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufReader::new(tokio::io::stdin())));
    }
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open input file: {}", path.display()))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Send every parsable line; returns (sent, skipped)
async fn stream_records(
    pipeline: &IngestionPipeline,
    cli: &Cli,
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
) -> Result<(u64, u64)> {
    let mut lines = reader.lines();
    let (mut sent, mut skipped) = (0u64, 0u64);
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read input")? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let record = match serde_json::from_str::<Value>(&line)
            .map_err(anyhow::Error::from)
            .and_then(|value| Record::try_from(value).map_err(anyhow::Error::from))
        {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping invalid record");
                skipped += 1;
                continue;
            }
        };

        let mut request = SendRequest::new(&cli.table, record);
        if let Some(target) = &cli.target {
            request = request.target(target);
        }
        if let Some(collection_id) = &cli.collection_id {
            request = request.collection_id(collection_id);
        }
        if let Some(method) = &cli.method {
            request = request.method(method);
        }

        match pipeline.send(request).await {
            Ok(()) => sent += 1,
            Err(e) if e.is_rejection() => {
                warn!(line = line_no, error = %e, "Record rejected");
                skipped += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok((sent, skipped))
}
