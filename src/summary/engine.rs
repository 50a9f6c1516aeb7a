use std::sync::Arc;
use std::time::{Duration, Instant};

use birdboard_core_types::SummarySnapshot;
use birdboard_detection_client::{DetectionApi, DetectionPage, PageQuery};
use birdboard_snapshot_store::SnapshotFile;
use chrono::{DateTime, Days, NaiveDate, Utc};
use futures::future::{try_join_all, BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::accumulator::SummaryAccumulator;
use crate::config::SummarySettings;
use crate::errors::SummaryError;
use crate::freshness::{remaining_ttl, CacheState};
use crate::metrics;

pub type RebuildOutcome = Result<Arc<SummarySnapshot>, SummaryError>;
pub type SharedRebuild = Shared<BoxFuture<'static, RebuildOutcome>>;

/// What a reader gets back: the payload (if any) and how fresh it is.
#[derive(Clone, Debug)]
pub struct SummaryRead {
    pub state: CacheState,
    pub snapshot: Option<Arc<SummarySnapshot>>,
    /// Seconds of freshness left; zero unless `state` is fresh.
    pub remaining: Duration,
}

#[derive(Clone, Debug, Serialize)]
pub struct SummaryStatus {
    pub state: CacheState,
    pub generated_at: Option<DateTime<Utc>>,
    pub age_secs: Option<u64>,
    pub window_start: Option<NaiveDate>,
    pub window_end: Option<NaiveDate>,
    pub total_detections: Option<u64>,
    pub rebuilding: bool,
    pub last_error: Option<String>,
}

/// Owns the 30-day summary: memory copy, disk copy and the single rebuild slot.
pub struct SummaryEngine {
    upstream: Arc<dyn DetectionApi>,
    store: SnapshotFile<SummarySnapshot>,
    settings: SummarySettings,
    current: RwLock<Option<Arc<SummarySnapshot>>>,
    inflight: Mutex<Option<SharedRebuild>>,
    last_error: RwLock<Option<SummaryError>>,
}

impl SummaryEngine {
    pub fn new(
        upstream: Arc<dyn DetectionApi>,
        store: SnapshotFile<SummarySnapshot>,
        settings: SummarySettings,
    ) -> Self {
        Self {
            upstream,
            store,
            settings,
            current: RwLock::new(None),
            inflight: Mutex::new(None),
            last_error: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &SummarySettings {
        &self.settings
    }

    /// Adopts the on-disk snapshot unless memory already holds a newer one.
    pub async fn bootstrap(&self) -> Option<Arc<SummarySnapshot>> {
        let loaded = self.store.load().await.map(Arc::new)?;
        let mut current = self.current.write();
        let newer = current
            .as_ref()
            .map_or(true, |existing| existing.generated_at < loaded.generated_at);
        if newer {
            info!(
                generated_at = %loaded.generated_at,
                total = loaded.stats.total_detections,
                "summary snapshot loaded from disk"
            );
            *current = Some(Arc::clone(&loaded));
        }
        current.clone()
    }

    pub fn snapshot(&self) -> Option<Arc<SummarySnapshot>> {
        self.current.read().clone()
    }

    pub fn last_error(&self) -> Option<SummaryError> {
        self.last_error.read().clone()
    }

    pub fn is_rebuilding(&self) -> bool {
        self.inflight.lock().is_some()
    }

    /// Never waits on the upstream. Stale or missing payloads kick off a
    /// background rebuild and are reported as such.
    pub fn read(self: &Arc<Self>) -> SummaryRead {
        let now = Utc::now();
        let read = match self.snapshot() {
            Some(snapshot) => {
                let state = CacheState::classify(snapshot.generated_at, now, self.settings.ttl());
                let remaining = match state {
                    CacheState::Fresh => {
                        remaining_ttl(snapshot.generated_at, now, self.settings.ttl())
                    }
                    _ => Duration::ZERO,
                };
                SummaryRead {
                    state,
                    snapshot: Some(snapshot),
                    remaining,
                }
            }
            None => SummaryRead {
                state: CacheState::Warming,
                snapshot: None,
                remaining: Duration::ZERO,
            },
        };
        if read.state != CacheState::Fresh {
            let _ = self.trigger_rebuild();
        }
        metrics::record_cache_event("summary", read.state.as_str());
        read
    }

    /// Starts a rebuild, or joins the one already running.
    pub fn trigger_rebuild(self: &Arc<Self>) -> SharedRebuild {
        let mut slot = self.inflight.lock();
        if let Some(existing) = slot.as_ref() {
            debug!("summary rebuild already in flight; joining");
            return existing.clone();
        }

        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = engine.run_rebuild().await;
            engine.inflight.lock().take();
            outcome
        });
        let shared = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(err) => Err(SummaryError::Aborted(err.to_string())),
            }
        }
        .boxed()
        .shared();
        *slot = Some(shared.clone());
        shared
    }

    /// Rebuilds and waits for the result.
    pub async fn rebuild(self: &Arc<Self>) -> RebuildOutcome {
        self.trigger_rebuild().await
    }

    pub fn status(&self) -> SummaryStatus {
        let now = Utc::now();
        let snapshot = self.snapshot();
        let state = snapshot.as_ref().map_or(CacheState::Warming, |snapshot| {
            CacheState::classify(snapshot.generated_at, now, self.settings.ttl())
        });
        SummaryStatus {
            state,
            generated_at: snapshot.as_ref().map(|s| s.generated_at),
            age_secs: snapshot
                .as_ref()
                .map(|s| birdboard_core_types::age_of(s.generated_at, now).as_secs()),
            window_start: snapshot.as_ref().map(|s| s.window_start),
            window_end: snapshot.as_ref().map(|s| s.window_end),
            total_detections: snapshot.as_ref().map(|s| s.stats.total_detections),
            rebuilding: self.is_rebuilding(),
            last_error: self.last_error().map(|err| err.to_string()),
        }
    }

    async fn run_rebuild(&self) -> RebuildOutcome {
        let started = Instant::now();
        match self.scan(Utc::now()).await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                if let Err(err) = self.store.save(&snapshot).await {
                    warn!(%err, path = %self.store.path().display(), "failed to persist summary snapshot");
                    metrics::record_cache_event("summary", "persist_failed");
                }
                *self.current.write() = Some(Arc::clone(&snapshot));
                self.last_error.write().take();
                metrics::observe_summary_rebuild(started.elapsed());
                metrics::record_cache_event("summary", "rebuilt");
                info!(
                    total = snapshot.stats.total_detections,
                    species = snapshot.stats.unique_species,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "summary rebuilt"
                );
                Ok(snapshot)
            }
            Err(err) => {
                warn!(%err, elapsed_ms = started.elapsed().as_millis() as u64, "summary rebuild failed");
                metrics::record_cache_event("summary", "rebuild_failed");
                *self.last_error.write() = Some(err.clone());
                Err(err)
            }
        }
    }

    async fn scan(&self, now: DateTime<Utc>) -> Result<SummarySnapshot, SummaryError> {
        let window_end = now.date_naive();
        let window_start = window_end
            .checked_sub_days(Days::new(u64::from(self.settings.window_days.saturating_sub(1))))
            .unwrap_or(window_end);
        let page_size = self.settings.page_size;
        let mut accumulator = SummaryAccumulator::new(window_start, window_end);
        let mut next_page = 0usize;

        loop {
            if next_page >= self.settings.max_pages {
                return Err(SummaryError::PageLimitExceeded {
                    limit: self.settings.max_pages,
                });
            }
            let batch_end = (next_page + self.settings.concurrency).min(self.settings.max_pages);
            let requests = (next_page..batch_end).map(|page| {
                self.fetch_page(PageQuery {
                    start_date: window_start,
                    end_date: window_end,
                    limit: page_size,
                    offset: page * page_size,
                })
            });
            let pages = try_join_all(requests).await?;

            let mut exhausted = false;
            for (index, page) in pages.iter().enumerate() {
                for record in &page.records {
                    accumulator.ingest(record);
                }
                let scanned = ((next_page + index + 1) * page_size) as u64;
                if page.fetched < page_size
                    || page.total.is_some_and(|total| scanned >= total)
                {
                    exhausted = true;
                }
            }
            debug!(
                pages = batch_end,
                records = accumulator.total(),
                "summary scan batch ingested"
            );
            next_page = batch_end;
            if exhausted {
                break;
            }
        }

        Ok(accumulator.finish(now, self.settings.top_species))
    }

    async fn fetch_page(&self, query: PageQuery) -> Result<DetectionPage, SummaryError> {
        let offset = query.offset;
        match self.upstream.fetch_detection_page(&query).await {
            Ok(page) => {
                metrics::record_upstream_request("detections", "ok");
                metrics::record_skipped_records("detections", page.skipped());
                Ok(page)
            }
            Err(source) => {
                metrics::record_upstream_request("detections", source.label());
                Err(SummaryError::Upstream { offset, source })
            }
        }
    }
}
