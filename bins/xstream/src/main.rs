mod cmd;
mod config;
mod error;

use std::process::ExitCode;

use clap::Parser;
use config::{Cli, Commands};
use tracing_subscriber::EnvFilter;

/// Log filter used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "info";

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries rows; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Consume(args) => cmd::consume::run(&cli.config, args).await,
        Commands::Select(args) => cmd::select::run(&cli.config, args).await,
        Commands::Produce(args) => cmd::produce::run(&cli.config, args).await,
        Commands::Settings => cmd::settings::run(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(config = %cli.config, "{e}");
            ExitCode::FAILURE
        }
    }
}
