use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use doistore::cli::commands::{
    handle_config, handle_embed, handle_missing_pdfs, handle_search, handle_stats,
    handle_transform,
};
use doistore::cli::output::get_formatter;
use doistore::cli::{Cli, Commands};
use doistore::models::{Config, OutputFormat};
use doistore::utils::CancelFlag;

fn init_tracing(verbose: bool) {
    let default = if verbose { "doistore=debug" } else { "doistore=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => exit_with_error(cli.format.unwrap_or_default(), &e),
    };
    let format = cli.format.unwrap_or(config.output.default_format);

    let cancel = CancelFlag::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            eprintln!("\nReceived shutdown signal, finishing current work...");
            cancel.cancel();
        })
    };

    let result = run_command(cli, &config, format, cancel).await;
    watcher.abort();

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => exit_with_error(format, &e),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(store) = cli.store.clone() {
        config.store.path = store;
    }
    Ok(config)
}

fn exit_with_error(format: OutputFormat, error: &anyhow::Error) -> ! {
    let message = get_formatter(format).format_error(&format!("{error:#}"));
    eprintln!("{}", message.trim_end());
    std::process::exit(1);
}

/// Returns `false` when the command finished but must exit non-zero.
async fn run_command(
    cli: Cli,
    config: &Config,
    format: OutputFormat,
    cancel: CancelFlag,
) -> Result<bool> {
    let verbose = cli.verbose;
    match cli.command {
        Commands::Transform(args) => {
            return handle_transform(args, config, format, verbose, cancel).await;
        }
        Commands::Embed(args) => {
            handle_embed(args, config, format, verbose, cancel).await?;
        }
        Commands::Stats => {
            handle_stats(config, format, verbose).await?;
        }
        Commands::Search(args) => {
            handle_search(args, config, format, verbose).await?;
        }
        Commands::MissingPdfs(args) => {
            handle_missing_pdfs(args, config, format, verbose).await?;
        }
        Commands::Config(cmd) => {
            handle_config(cmd, config, cli.config.as_deref(), format).await?;
        }
    }

    Ok(true)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
