//! Command-line surface of `doistore`.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::models::OutputFormat;

/// Build and query a deduplicated store of Crossref DOI records.
#[derive(Debug, Parser)]
#[command(name = "doistore")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[arg(
        long,
        short = 'f',
        global = true,
        help = "Output format: text, json, or markdown"
    )]
    pub format: Option<OutputFormat>,

    #[arg(long, short = 'v', global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Path to the config file")]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        env = "DOISTORE_STORE",
        help = "Store directory (overrides config)"
    )]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Ingest dump shards or directories of shards into the store
    Transform(commands::TransformArgs),

    /// Compute missing or stale abstract embeddings
    Embed(commands::EmbedArgs),

    /// Show store counts and recent runs
    Stats,

    /// Search titles and abstracts by keyword
    Search(commands::SearchArgs),

    /// List DOIs without a cached PDF
    MissingPdfs(commands::MissingPdfsArgs),

    /// Manage configuration
    #[command(subcommand)]
    Config(commands::ConfigCommand),
}
