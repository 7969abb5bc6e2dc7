use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use super::open_store;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::{Loader, PdfCache};

#[derive(Debug, Args)]
pub struct MissingPdfsArgs {
    #[arg(long, help = "PDF cache directory (default: pdf.dir or <store>/pdfs)")]
    pub pdf_dir: Option<PathBuf>,

    #[arg(long, short = 'n', help = "Maximum number of DOIs to list")]
    pub limit: Option<usize>,
}

pub async fn handle_missing_pdfs(
    args: MissingPdfsArgs,
    config: &Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let cache = PdfCache::new(args.pdf_dir.unwrap_or_else(|| config.pdf_dir()));
    let local = cache
        .local_dois()
        .with_context(|| format!("failed to scan {}", cache.dir().display()))?;

    if verbose {
        eprintln!("PDF cache: {}", cache.dir().display());
        eprintln!("  Cached: {}", local.len());
    }

    let store = open_store(config)?;
    let loader = Loader::open(&store).context("failed to load store")?;
    let missing = loader
        .dois_missing_pdf(local.iter().map(String::as_str), args.limit)
        .context("failed to query missing PDFs")?;

    print!(
        "{}",
        get_formatter(format).format_dois("DOIs without a cached PDF", &missing)
    );
    Ok(())
}
