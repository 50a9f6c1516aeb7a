//! One-shot cache maintenance commands.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

use super::context::CliContext;

pub async fn cmd_rebuild_summary(ctx: &CliContext) -> Result<()> {
    let context = ctx.app_context().await?;
    let snapshot = context
        .summary()
        .rebuild()
        .await
        .context("summary rebuild failed")?;
    info!(
        path = %ctx.settings().storage.summary_path().display(),
        "summary snapshot written"
    );

    let stats = &snapshot.stats;
    let report = json!({
        "generated_at": snapshot.generated_at,
        "window_start": snapshot.window_start,
        "window_end": snapshot.window_end,
        "total_detections": stats.total_detections,
        "unique_species": stats.unique_species,
        "avg_confidence": stats.avg_confidence,
        "top_species": stats.top_species,
        "archive_groups": snapshot.archive.groups.len(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn cmd_refresh_recent(ctx: &CliContext) -> Result<()> {
    let context = ctx.app_context().await?;
    let snapshot = context
        .recent()
        .refresh()
        .await
        .context("recent snapshot refresh failed")?;
    let report = json!({
        "generated_at": snapshot.generated_at,
        "detections": snapshot.len(),
        "newest": snapshot.detections.first().map(|record| record.timestamp),
        "oldest": snapshot.detections.last().map(|record| record.timestamp),
        "path": ctx.settings().storage.recent_path(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Reads the snapshot files only; never contacts the upstream.
pub async fn cmd_inspect(ctx: &CliContext) -> Result<()> {
    let context = ctx.app_context().await?;
    let storage = &ctx.settings().storage;
    let report = json!({
        "data_dir": storage.data_dir,
        "config": ctx.config_path(),
        "summary": {
            "path": storage.summary_path(),
            "status": context.summary().status(),
        },
        "recent": {
            "path": storage.recent_path(),
            "status": context.recent().status(),
        },
        "family": {
            "path": storage.family_path(),
            "status": context.family().status(),
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
