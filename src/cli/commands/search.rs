use anyhow::{Context, Result};
use clap::Args;

use super::open_store;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat, SearchQuery, SourceType};
use crate::services::Loader;

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(required = true, help = "Keywords; every one must match the title or abstract")]
    pub keywords: Vec<String>,

    #[arg(
        long = "type",
        short = 't',
        help = "Only this record type (e.g. journal-article)"
    )]
    pub source_type: Option<String>,

    #[arg(long, help = "Earliest publication year")]
    pub from: Option<i32>,

    #[arg(long, help = "Latest publication year")]
    pub to: Option<i32>,

    #[arg(long, short = 'n', help = "Maximum number of results to return")]
    pub limit: Option<u32>,

    #[arg(long, help = "Only records that have an abstract")]
    pub require_abstract: bool,
}

pub async fn handle_search(
    args: SearchArgs,
    config: &Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let mut query = SearchQuery::new(args.keywords)
        .with_years(args.from, args.to)
        .with_require_abstract(args.require_abstract);
    if query.keywords.is_empty() {
        anyhow::bail!("search keywords cannot be empty");
    }
    if let (Some(from), Some(to)) = (args.from, args.to)
        && from > to
    {
        anyhow::bail!("--from ({from}) is after --to ({to})");
    }
    if let Some(limit) = args.limit {
        if limit == 0 {
            anyhow::bail!("limit must be at least 1");
        }
        query = query.with_limit(limit);
    }
    if let Some(ref name) = args.source_type {
        let Ok(source_type) = name.parse::<SourceType>();
        query = query.with_source_type(source_type);
    }

    if verbose {
        eprintln!("Keywords: {}", query.keywords.join(", "));
        eprintln!("  Limit: {}", query.limit);
        if let Some(ref t) = query.source_type {
            eprintln!("  Type: {t}");
        }
        if query.from_year.is_some() || query.to_year.is_some() {
            eprintln!("  Years: {:?}..{:?}", query.from_year, query.to_year);
        }
    }

    let store = open_store(config)?;
    let loader = Loader::open(&store).context("failed to load store")?;
    let results = loader.search(&query).context("search failed")?;

    print!("{}", get_formatter(format).format_search_results(&results));
    Ok(())
}
