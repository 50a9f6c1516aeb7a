use clap::Parser;
use std::path::PathBuf;

use super::commands::Commands;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Configuration file path (toml, yaml or json)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level; overrides `log.level`, while `RUST_LOG` overrides both
    #[arg(short, long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl CliArgs {
    /// The chosen subcommand, `serve` when none was given.
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Serve(Default::default()))
    }
}
