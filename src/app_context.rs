//! Application context and shared services
//!
//! One instance per process owns the upstream client and the three caches.
//! The HTTP façade, the background tickers and the maintenance commands all
//! go through it so no cache is ever duplicated.

use std::sync::Arc;

use birdboard_detection_client::{DetectionApi, HttpUpstream, UpstreamConfig, UpstreamError};
use birdboard_snapshot_store::SnapshotFile;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::background::{spawn_periodic, TaskErrorSink};
use crate::config::ProxySettings;
use crate::family::FamilyResolver;
use crate::freshness::CacheState;
use crate::recent::RecentRefresher;
use crate::summary::SummaryEngine;

pub struct AppContext {
    settings: Arc<ProxySettings>,
    upstream: Arc<dyn DetectionApi>,
    summary: Arc<SummaryEngine>,
    recent: Arc<RecentRefresher>,
    family: Arc<FamilyResolver>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// What was found on disk at startup.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BootstrapReport {
    pub summary_loaded: bool,
    pub recent_loaded: bool,
    pub family_entries: usize,
}

impl AppContext {
    /// Builds the context around a real HTTP upstream.
    pub fn new(settings: ProxySettings) -> Result<Self, UpstreamError> {
        let upstream = HttpUpstream::new(UpstreamConfig {
            base_url: settings.upstream.base_url.clone(),
            timeout: settings.upstream.timeout(),
        })?;
        Ok(Self::with_upstream(settings, Arc::new(upstream)))
    }

    pub fn with_upstream(settings: ProxySettings, upstream: Arc<dyn DetectionApi>) -> Self {
        let storage = &settings.storage;
        let summary = Arc::new(SummaryEngine::new(
            Arc::clone(&upstream),
            SnapshotFile::new(storage.summary_path()),
            settings.summary.clone(),
        ));
        let recent = Arc::new(RecentRefresher::new(
            Arc::clone(&upstream),
            SnapshotFile::new(storage.recent_path()),
            settings.recent.clone(),
        ));
        let family = Arc::new(FamilyResolver::new(
            Arc::clone(&upstream),
            Arc::clone(&summary),
            SnapshotFile::new(storage.family_path()),
            settings.family.clone(),
        ));
        Self {
            settings: Arc::new(settings),
            upstream,
            summary,
            recent,
            family,
            background_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    pub fn upstream(&self) -> &Arc<dyn DetectionApi> {
        &self.upstream
    }

    pub fn summary(&self) -> &Arc<SummaryEngine> {
        &self.summary
    }

    pub fn recent(&self) -> &Arc<RecentRefresher> {
        &self.recent
    }

    pub fn family(&self) -> &Arc<FamilyResolver> {
        &self.family
    }

    /// Loads every snapshot file into memory. Missing or unreadable files
    /// simply leave the matching cache empty.
    pub async fn bootstrap(&self) -> BootstrapReport {
        let report = BootstrapReport {
            summary_loaded: self.summary.bootstrap().await.is_some(),
            recent_loaded: self.recent.bootstrap().await.is_some(),
            family_entries: self.family.bootstrap().await,
        };
        info!(
            summary = report.summary_loaded,
            recent = report.recent_loaded,
            family_entries = report.family_entries,
            data_dir = %self.settings.storage.data_dir.display(),
            "cache bootstrap finished"
        );
        report
    }

    /// Starts the warm-up work and the periodic refreshers. Tasks stop when
    /// `shutdown` is cancelled or the context is dropped.
    pub fn spawn_background(
        &self,
        shutdown: CancellationToken,
        sink: Option<Arc<dyn TaskErrorSink>>,
    ) {
        let mut tasks = self.background_tasks.lock();

        if self.summary.read().state != CacheState::Fresh {
            info!("summary snapshot missing or expired; rebuild started");
        }

        let recent = Arc::clone(&self.recent);
        let warmup_sink = sink.clone();
        tasks.push(tokio::spawn(async move {
            match recent.refresh_if_due().await {
                Ok(true) => {}
                Ok(false) => info!("recent snapshot on disk is current; startup refresh skipped"),
                Err(err) => {
                    warn!(%err, "startup recent refresh failed");
                    if let Some(sink) = warmup_sink {
                        sink.record_task_error("recent-warmup", &err.to_string());
                    }
                }
            }
        }));

        let recent = Arc::clone(&self.recent);
        tasks.push(spawn_periodic(
            "recent-refresh",
            self.settings.recent.refresh_interval(),
            shutdown.clone(),
            sink.clone(),
            move || {
                let recent = Arc::clone(&recent);
                async move { recent.refresh().await.map(|_| ()) }
            },
        ));

        let summary = Arc::clone(&self.summary);
        tasks.push(spawn_periodic(
            "summary-check",
            self.settings.summary.check_interval(),
            shutdown,
            sink,
            move || {
                let summary = Arc::clone(&summary);
                async move {
                    if summary.read().state == CacheState::Fresh {
                        Ok(())
                    } else {
                        summary.rebuild().await.map(|_| ())
                    }
                }
            },
        ));
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        for handle in self.background_tasks.get_mut().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{detection, FakeUpstream};
    use chrono::Utc;
    use std::time::Duration;

    fn settings(dir: &tempfile::TempDir) -> ProxySettings {
        let mut settings = ProxySettings::default();
        settings.storage.data_dir = dir.path().to_path_buf();
        settings
    }

    #[tokio::test]
    async fn bootstrap_on_empty_data_dir_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let context = AppContext::with_upstream(settings(&dir), Arc::new(FakeUpstream::default()));
        let report = context.bootstrap().await;
        assert!(!report.summary_loaded);
        assert!(!report.recent_loaded);
        assert_eq!(report.family_entries, 0);
    }

    #[tokio::test]
    async fn background_warmup_fills_both_caches() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let records = (0..5)
            .map(|i| detection(i, "Turdus merula", "Blackbird", now))
            .collect();
        let context = AppContext::with_upstream(
            settings(&dir),
            Arc::new(FakeUpstream::with_detections(records)),
        );
        let shutdown = CancellationToken::new();
        context.spawn_background(shutdown.clone(), None);

        for _ in 0..50 {
            if context.summary().snapshot().is_some() && context.recent().cached().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();

        assert_eq!(
            context.summary().snapshot().unwrap().stats.total_detections,
            5
        );
        assert_eq!(context.recent().cached().unwrap().len(), 5);
        assert!(dir.path().join("summary-30d.json").exists());
        assert!(dir.path().join("recent-detections.json").exists());
    }
}
