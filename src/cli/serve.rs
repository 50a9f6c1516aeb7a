use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::context::CliContext;
use crate::background::TaskErrorSink;
use crate::server::{build_app, ServeHealth, ServeState};

#[derive(Args, Clone, Debug, Default)]
pub struct ServeArgs {
    /// Address to listen on (defaults to `server.bind`)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,
}

pub async fn cmd_serve(args: ServeArgs, ctx: &CliContext) -> Result<()> {
    let bind = args
        .bind
        .unwrap_or_else(|| ctx.settings().server.bind.clone());
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid bind address '{bind}'"))?;

    let context = ctx.app_context().await?;
    let health = Arc::new(ServeHealth::new());
    let shutdown = CancellationToken::new();
    context.spawn_background(
        shutdown.clone(),
        Some(Arc::clone(&health) as Arc<dyn TaskErrorSink>),
    );

    let state = ServeState::new(Arc::clone(&context), health);
    state.mark_live();

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind proxy on {}", addr))?;
    info!(
        %addr,
        upstream = %ctx.settings().upstream.base_url,
        data_dir = %ctx.settings().storage.data_dir.display(),
        "Birdboard proxy listening"
    );

    axum::serve(listener, build_app(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("proxy server exited unexpectedly")?;

    shutdown.cancel();
    info!("Birdboard proxy stopped");
    Ok(())
}

/// Resolves on Ctrl-C, SIGTERM or an explicit cancel, and cancels `shutdown`
/// so the background tickers stop with the server.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(?err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => {},
    }

    info!("Shutdown signal received, draining connections");
    shutdown.cancel();
}
