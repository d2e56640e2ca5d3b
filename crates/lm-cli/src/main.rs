//! `lm` — a connectionist language-modeling toolkit's command-line front end.
//!
//! Thin wrapper: install a `tracing` subscriber, parse arguments, dispatch.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod config;
mod error;

use commands::LmCli;
use config::CliConfig;
use error::CliResult;

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = LmCli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => CliConfig::default_config_path()?,
    };
    let cfg = CliConfig::load_from_file(&config_path)?;

    let default_level = if cli.verbose { "debug" } else { cfg.log_level.as_deref().unwrap_or("info") };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    if let Err(err) = cli.execute().await {
        error!("command failed: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
