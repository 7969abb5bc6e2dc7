use anyhow::{Context, Result};
use clap::Args;

use super::open_store;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::{AttachOptions, Attacher, HttpEmbedder, RunLedger};
use crate::utils::CancelFlag;

#[derive(Debug, Args)]
pub struct EmbedArgs {
    #[arg(long, short = 'm', help = "Embedding model id (default: embedding.model_id)")]
    pub model: Option<String>,

    #[arg(long, short = 'b', help = "Abstracts per embedding call")]
    pub batch_size: Option<usize>,

    #[arg(long, short = 'n', help = "Maximum number of abstracts to embed")]
    pub limit: Option<usize>,
}

pub async fn handle_embed(
    args: EmbedArgs,
    config: &Config,
    format: OutputFormat,
    verbose: bool,
    cancel: CancelFlag,
) -> Result<()> {
    let formatter = get_formatter(format);

    if args.batch_size == Some(0) {
        anyhow::bail!("batch size must be at least 1");
    }
    if let Some(ref model) = args.model
        && model.trim().is_empty()
    {
        anyhow::bail!("model id cannot be empty");
    }

    let store = open_store(config)?;
    let _lock = store.lock().context("store is in use by another process")?;
    let ledger = RunLedger::open(&store.layout().ledger()).context("failed to open run ledger")?;

    let mut options = AttachOptions::from_config(&config.embedding);
    if let Some(model) = args.model {
        options.model_id = model;
        // A configured dimension belongs to the configured model.
        options.dimension = None;
    }
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size;
    }
    options.limit = args.limit;

    let embedder = HttpEmbedder::new(&config.embedding).context("failed to create embedding client")?;

    if verbose {
        eprintln!("Embedding server: {}", embedder.base_url());
        eprintln!("  Model: {}", options.model_id);
        eprintln!("  Batch size: {}", options.batch_size);
        match embedder.health_check().await {
            Ok(health) => eprintln!(
                "  Health: {}",
                health.status.unwrap_or_else(|| "unknown".to_string())
            ),
            Err(e) => eprintln!("  Health: {e}"),
        }
    }

    let started_at = chrono::Utc::now();
    let mut attacher =
        Attacher::new(&store, embedder, options, cancel).context("failed to prepare embedding")?;
    let stats = attacher.run().await.context("embedding failed")?;

    ledger
        .record_embed(started_at, &stats)
        .context("failed to record run")?;

    print!("{}", formatter.format_embed_stats(&stats));
    Ok(())
}
