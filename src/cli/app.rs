use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_settings};
use crate::metrics;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let settings = load_settings(cli.config.as_deref())?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.log.level.clone());
    init_logging(&level, cli.log_json || settings.log.json)?;
    metrics::register_metrics();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("BIRDBOARD_GIT_HASH"),
        "Starting Birdboard proxy"
    );
    let cli_context = CliContext::new(settings, cli.config.clone());
    if let Some(path) = cli_context.config_path() {
        info!("Loaded configuration from: {}", path.display());
    }

    match dispatch(&cli, &cli_context).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
