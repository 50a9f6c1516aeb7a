//! Last-resort copy of the newest detections.
//!
//! Refreshed on a timer and persisted unconditionally; read only when the
//! live detection endpoints fail.

use std::sync::Arc;

use birdboard_core_types::{age_of, RecentSnapshot};
use birdboard_detection_client::DetectionApi;
use birdboard_snapshot_store::SnapshotFile;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::config::RecentSettings;
use crate::errors::RefreshError;
use crate::metrics;

#[derive(Clone, Debug, Serialize)]
pub struct RecentStatus {
    pub generated_at: Option<DateTime<Utc>>,
    pub age_secs: Option<u64>,
    pub detections: usize,
    pub cap: usize,
}

pub struct RecentRefresher {
    upstream: Arc<dyn DetectionApi>,
    store: SnapshotFile<RecentSnapshot>,
    settings: RecentSettings,
    current: RwLock<Option<Arc<RecentSnapshot>>>,
    refresh_lock: AsyncMutex<()>,
}

impl RecentRefresher {
    pub fn new(
        upstream: Arc<dyn DetectionApi>,
        store: SnapshotFile<RecentSnapshot>,
        settings: RecentSettings,
    ) -> Self {
        Self {
            upstream,
            store,
            settings,
            current: RwLock::new(None),
            refresh_lock: AsyncMutex::new(()),
        }
    }

    pub fn settings(&self) -> &RecentSettings {
        &self.settings
    }

    pub async fn bootstrap(&self) -> Option<Arc<RecentSnapshot>> {
        let loaded = self.store.load().await.map(Arc::new)?;
        debug!(count = loaded.len(), "recent snapshot loaded from disk");
        let mut current = self.current.write();
        if current.is_none() {
            *current = Some(loaded);
        }
        current.clone()
    }

    /// The in-memory snapshot, falling back to whatever is on disk.
    pub async fn snapshot(&self) -> Option<Arc<RecentSnapshot>> {
        if let Some(snapshot) = self.current.read().clone() {
            return Some(snapshot);
        }
        self.bootstrap().await
    }

    pub fn cached(&self) -> Option<Arc<RecentSnapshot>> {
        self.current.read().clone()
    }

    /// True when nothing is cached or the cached copy is older than one interval.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.cached() {
            Some(snapshot) => {
                age_of(snapshot.generated_at, now) >= self.settings.refresh_interval()
            }
            None => true,
        }
    }

    pub async fn refresh(&self) -> Result<Arc<RecentSnapshot>, RefreshError> {
        let _guard = self.refresh_lock.lock().await;
        let cap = self.settings.cap;
        let detections = match self.upstream.fetch_recent(cap).await {
            Ok(page) => {
                metrics::record_upstream_request("detections_recent", "ok");
                metrics::record_skipped_records("detections_recent", page.skipped());
                page.records
            }
            Err(err) => {
                metrics::record_upstream_request("detections_recent", err.label());
                return Err(err.into());
            }
        };
        let snapshot = Arc::new(RecentSnapshot::new(Utc::now(), detections, cap));
        self.store.save(&snapshot).await?;
        *self.current.write() = Some(Arc::clone(&snapshot));
        metrics::record_cache_event("recent", "refreshed");
        info!(count = snapshot.len(), "recent snapshot refreshed");
        Ok(snapshot)
    }

    /// Refreshes only when `needs_refresh`; returns whether a refresh ran.
    pub async fn refresh_if_due(&self) -> Result<bool, RefreshError> {
        if !self.needs_refresh(Utc::now()) {
            return Ok(false);
        }
        self.refresh().await.map(|_| true)
    }

    pub fn status(&self) -> RecentStatus {
        let now = Utc::now();
        let snapshot = self.cached();
        RecentStatus {
            generated_at: snapshot.as_ref().map(|s| s.generated_at),
            age_secs: snapshot
                .as_ref()
                .map(|s| age_of(s.generated_at, now).as_secs()),
            detections: snapshot.as_ref().map_or(0, |s| s.len()),
            cap: self.settings.cap,
        }
    }
}
