use anyhow::{Context, Result};

use super::open_store;
use crate::cli::output::get_formatter;
use crate::models::{Config, OutputFormat};
use crate::services::{Loader, RunLedger};

const RECENT_RUNS: usize = 5;

pub async fn handle_stats(config: &Config, format: OutputFormat, verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);

    let store = open_store(config)?;
    if verbose {
        eprintln!("Store: {}", store.layout().root().display());
        eprintln!("  Format version: {}", store.manifest().format_version);
        eprintln!("  Ledger: {}", store.layout().ledger().display());
        eprintln!("  Active model: {}", config.embedding.model_id);
    }

    let loader = Loader::open(&store).context("failed to load store")?;
    let mut overview = loader
        .overview(&config.embedding.model_id)
        .context("failed to read store statistics")?;
    overview.bucket_count = store.bucket_count();

    let ledger = RunLedger::open(&store.layout().ledger()).context("failed to open run ledger")?;
    overview.totals = ledger.totals().context("failed to read run totals")?;
    overview.recent_runs = ledger
        .recent(RECENT_RUNS)
        .context("failed to read recent runs")?;

    print!("{}", formatter.format_overview(&overview));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Store;

    #[tokio::test]
    async fn test_stats_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        Store::open_or_create(dir.path(), 2).unwrap();

        let mut config = Config::default();
        config.store.path = dir.path().to_path_buf();

        handle_stats(&config, OutputFormat::Json, true).await.unwrap();
        handle_stats(&config, OutputFormat::Text, false).await.unwrap();
        assert!(dir.path().join("ledger.sqlite").exists());
    }

    #[tokio::test]
    async fn test_stats_without_store_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.path = dir.path().join("missing");

        assert!(handle_stats(&config, OutputFormat::Text, true).await.is_err());
    }
}
