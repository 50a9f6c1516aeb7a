use clap::Subcommand;

use super::serve::ServeArgs;

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Run the caching proxy (default)
    Serve(ServeArgs),

    /// Rebuild the 30-day summary once and print its totals
    RebuildSummary,

    /// Refresh the recent-detections fallback snapshot once
    RefreshRecent,

    /// Print the state of the on-disk caches as JSON
    Inspect,
}
