use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ProxySettings;

/// Installs the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let level: tracing::Level = level.parse().context("Invalid log level")?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if json {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.context("failed to install tracing subscriber")?;

    Ok(())
}

pub fn load_settings(config_path: Option<&Path>) -> Result<ProxySettings> {
    ProxySettings::load(config_path).with_context(|| match config_path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration from environment".to_string(),
    })
}
