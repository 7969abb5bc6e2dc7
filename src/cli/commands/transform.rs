use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::{IngestOptions, IngestPipeline, RunLedger, Store};
use crate::utils::{CancelFlag, discover_shards};

#[derive(Debug, Args)]
pub struct TransformArgs {
    #[arg(required = true, help = "Shard files or directories of shards")]
    pub paths: Vec<PathBuf>,

    #[arg(
        long,
        short = 'j',
        help = "Shards extracted concurrently (default: ingest.workers)"
    )]
    pub workers: Option<usize>,
}

/// Returns `false` when any shard failed structurally.
pub async fn handle_transform(
    args: TransformArgs,
    config: &Config,
    format: OutputFormat,
    verbose: bool,
    cancel: CancelFlag,
) -> Result<bool> {
    let formatter = get_formatter(format);

    let shards = discover_shards(&args.paths).context("failed to scan input paths")?;
    if shards.is_empty() {
        println!("{}", formatter.format_message("No shard files found."));
        return Ok(true);
    }

    let store = Store::open_or_create(&config.store.path, config.store.bucket_count)
        .with_context(|| format!("failed to open store at {}", config.store.path.display()))?;
    let _lock = store.lock().context("store is in use by another process")?;
    let ledger = RunLedger::open(&store.layout().ledger()).context("failed to open run ledger")?;

    let options = IngestOptions {
        workers: args
            .workers
            .filter(|w| *w > 0)
            .unwrap_or_else(|| config.ingest.effective_workers()),
        flush_records: config.store.flush_records,
    };

    if verbose {
        eprintln!("Store: {}", store.layout().root().display());
        eprintln!("  Buckets: {}", store.bucket_count());
        eprintln!("  Shards: {}", shards.len());
        eprintln!("  Workers: {}", options.workers);
    }

    let pb = ProgressBar::new(shards.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} shards ({eta})",
            )
            .unwrap()
            .progress_chars("#>-"),
    );

    let started_at = chrono::Utc::now();
    let mut pipeline = IngestPipeline::new(&store, options, cancel)
        .context("failed to prepare ingest")?
        .with_progress(pb.clone());
    let stats = pipeline.run(shards).await.context("transform failed")?;
    pb.finish_and_clear();

    ledger
        .record_ingest(started_at, &stats)
        .context("failed to record run")?;

    print!("{}", formatter.format_ingest_stats(&stats));
    Ok(!stats.has_failed_shards())
}
