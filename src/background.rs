//! Named periodic tasks with cooperative shutdown.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives failures from background jobs so they surface outside the logs.
pub trait TaskErrorSink: Send + Sync {
    fn record_task_error(&self, task: &str, error: &str);
}

/// Runs `job` every `every`, first tick one period from now, until `shutdown`
/// is cancelled. Failures are logged and handed to `sink`; the loop carries on.
pub fn spawn_periodic<F, Fut, E>(
    name: &'static str,
    every: Duration,
    shutdown: CancellationToken,
    sink: Option<Arc<dyn TaskErrorSink>>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(task = name, every_secs = every.as_secs(), "background task started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match job().await {
                        Ok(()) => debug!(task = name, "background tick completed"),
                        Err(err) => {
                            let message = err.to_string();
                            warn!(task = name, error = %message, "background tick failed");
                            if let Some(sink) = sink.as_ref() {
                                sink.record_task_error(name, &message);
                            }
                        }
                    }
                }
            }
        }
        info!(task = name, "background task stopped");
    })
}
