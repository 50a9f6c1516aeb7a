//! In-process stand-in for the upstream detection API.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use birdboard_core_types::DetectionRecord;
use birdboard_detection_client::{
    DetectionApi, DetectionPage, ForwardedResponse, PageQuery, ProxyEndpoint, SpeciesLookup,
    UpstreamError, UpstreamResult,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Semaphore;

pub(crate) fn detection(
    id: usize,
    scientific_name: &str,
    common_name: &str,
    at: DateTime<Utc>,
) -> DetectionRecord {
    DetectionRecord::new(id.to_string(), common_name, scientific_name, 0.8, at)
}

#[derive(Default)]
pub(crate) struct FakeUpstream {
    detections: Vec<DetectionRecord>,
    report_total: bool,
    unreadable: HashSet<usize>,
    gate: Option<Arc<Semaphore>>,
    species: Mutex<HashMap<String, UpstreamResult<SpeciesLookup>>>,
    recent_failure: Mutex<Option<UpstreamError>>,
    forward_failure: Mutex<Option<UpstreamError>>,
    pub(crate) page_calls: AtomicUsize,
    pub(crate) species_calls: AtomicUsize,
}

impl FakeUpstream {
    pub(crate) fn with_detections(detections: Vec<DetectionRecord>) -> Self {
        Self {
            detections,
            ..Self::default()
        }
    }

    /// Page fetches wait for a permit before answering.
    pub(crate) fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn reporting_total(mut self) -> Self {
        self.report_total = true;
        self
    }

    /// Rows at these positions reach the proxy but fail to parse.
    pub(crate) fn unreadable_rows(mut self, rows: impl IntoIterator<Item = usize>) -> Self {
        self.unreadable.extend(rows);
        self
    }

    pub(crate) fn family(self, scientific_name: &str, family_common: &str) -> Self {
        self.set_species(
            scientific_name,
            Ok(SpeciesLookup::Found {
                family_common: Some(family_common.to_string()),
            }),
        );
        self
    }

    pub(crate) fn set_species(
        &self,
        scientific_name: &str,
        outcome: UpstreamResult<SpeciesLookup>,
    ) {
        self.species
            .lock()
            .insert(scientific_name.to_string(), outcome);
    }

    pub(crate) fn fail_recent(&self, error: UpstreamError) {
        *self.recent_failure.lock() = Some(error);
    }

    pub(crate) fn fail_forward(&self, error: UpstreamError) {
        *self.forward_failure.lock() = Some(error);
    }

    fn newest_first(&self, limit: usize) -> Vec<DetectionRecord> {
        let mut records = self.detections.clone();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        records
    }
}

#[async_trait]
impl DetectionApi for FakeUpstream {
    async fn fetch_detection_page(&self, query: &PageQuery) -> UpstreamResult<DetectionPage> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|err| UpstreamError::Transport(err.to_string()))?;
        }
        let start = query.offset.min(self.detections.len());
        let end = (query.offset + query.limit).min(self.detections.len());
        let records = (start..end)
            .filter(|row| !self.unreadable.contains(row))
            .map(|row| self.detections[row].clone())
            .collect();
        Ok(DetectionPage {
            records,
            total: self.report_total.then_some(self.detections.len() as u64),
            fetched: end - start,
        })
    }

    async fn fetch_recent(&self, limit: usize) -> UpstreamResult<DetectionPage> {
        if let Some(err) = self.recent_failure.lock().clone() {
            return Err(err);
        }
        Ok(DetectionPage::new(self.newest_first(limit), None))
    }

    async fn lookup_species(&self, scientific_name: &str) -> UpstreamResult<SpeciesLookup> {
        self.species_calls.fetch_add(1, Ordering::SeqCst);
        self.species
            .lock()
            .get(scientific_name)
            .cloned()
            .unwrap_or(Ok(SpeciesLookup::NotFound))
    }

    async fn forward(
        &self,
        endpoint: ProxyEndpoint,
        _query: &[(String, String)],
    ) -> UpstreamResult<ForwardedResponse> {
        if let Some(err) = self.forward_failure.lock().clone() {
            return Err(err);
        }
        let body = match endpoint {
            ProxyEndpoint::Recent => serde_json::to_vec(&self.newest_first(10)),
            ProxyEndpoint::Detections => serde_json::to_vec(&self.detections),
        }
        .map_err(|err| UpstreamError::Transport(err.to_string()))?;
        Ok(ForwardedResponse {
            status: 200,
            content_type: Some("application/json".to_string()),
            body,
        })
    }
}
