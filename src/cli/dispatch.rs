use anyhow::Result;

use super::commands::Commands;
use super::context::CliContext;
use super::env::CliArgs;
use super::maintenance::{cmd_inspect, cmd_rebuild_summary, cmd_refresh_recent};
use super::serve::cmd_serve;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command() {
        Commands::Serve(args) => cmd_serve(args, ctx).await,
        Commands::RebuildSummary => cmd_rebuild_summary(ctx).await,
        Commands::RefreshRecent => cmd_refresh_recent(ctx).await,
        Commands::Inspect => cmd_inspect(ctx).await,
    }
}
