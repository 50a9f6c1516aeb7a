//! Pass-through of the live detection endpoints, with the recent snapshot as
//! a fallback when the upstream is down.

use std::fmt;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use birdboard_core_types::{DetectionRecord, RecentSnapshot};
use birdboard_detection_client::{ForwardedResponse, ProxyEndpoint, UpstreamError};
use chrono::NaiveDate;
use serde_json::json;
use tracing::{instrument, warn};

use super::{no_cache, no_store};
use crate::config::{DEFAULT_DETECTIONS_LIMIT, MAX_DETECTIONS_LIMIT};
use crate::metrics;
use crate::server::ServeState;

const DETECTIONS_CACHE: &str = "x-detections-cache";
const DETECTIONS_FALLBACK: &str = "x-detections-fallback";

type Params = Vec<(String, String)>;

pub(crate) fn router() -> Router<ServeState> {
    Router::new()
        .route("/api/v2/detections", get(detections_handler))
        .route("/api/v2/detections/recent", get(recent_handler))
}

#[instrument(name = "birdboard.detections.list", skip(state, params))]
async fn detections_handler(
    State(state): State<ServeState>,
    Query(params): Query<Params>,
) -> Response {
    proxy(&state, ProxyEndpoint::Detections, params).await
}

#[instrument(name = "birdboard.detections.recent", skip(state, params))]
async fn recent_handler(State(state): State<ServeState>, Query(params): Query<Params>) -> Response {
    proxy(&state, ProxyEndpoint::Recent, params).await
}

async fn proxy(state: &ServeState, endpoint: ProxyEndpoint, params: Params) -> Response {
    match attempt_live(state, endpoint, &params).await {
        Ok(live) => live.into_response(),
        Err(reason) => attempt_fallback(state, endpoint, &params, reason).await,
    }
}

/// Why the live answer was abandoned in favour of the snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum FallbackReason {
    Timeout,
    Unreachable,
    ServerError(u16),
}

impl FallbackReason {
    fn from_error(err: &UpstreamError) -> Self {
        match err {
            UpstreamError::Timeout(_) => FallbackReason::Timeout,
            UpstreamError::Status { status, .. } => FallbackReason::ServerError(*status),
            _ => FallbackReason::Unreachable,
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Timeout => f.write_str("timeout"),
            FallbackReason::Unreachable => f.write_str("unreachable"),
            FallbackReason::ServerError(status) => write!(f, "upstream-{status}"),
        }
    }
}

/// An upstream answer in the 2xx..4xx range, relayed untouched.
pub(crate) struct LiveResponse(ForwardedResponse);

impl IntoResponse for LiveResponse {
    fn into_response(self) -> Response {
        let ForwardedResponse {
            status,
            content_type,
            body,
        } = self.0;
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut headers = HeaderMap::new();
        if let Some(value) = content_type.and_then(|raw| HeaderValue::from_str(&raw).ok()) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(
            HeaderName::from_static(DETECTIONS_CACHE),
            HeaderValue::from_static("live"),
        );
        headers.insert(header::CACHE_CONTROL, no_cache());
        (status, headers, body).into_response()
    }
}

fn endpoint_label(endpoint: ProxyEndpoint) -> &'static str {
    match endpoint {
        ProxyEndpoint::Detections => "detections_proxy",
        ProxyEndpoint::Recent => "detections_recent_proxy",
    }
}

pub(crate) async fn attempt_live(
    state: &ServeState,
    endpoint: ProxyEndpoint,
    params: &[(String, String)],
) -> Result<LiveResponse, FallbackReason> {
    let label = endpoint_label(endpoint);
    match state.context().upstream().forward(endpoint, params).await {
        Ok(response) if response.is_server_error() => {
            metrics::record_upstream_request(label, "server_error");
            warn!(
                endpoint = endpoint.path(),
                status = response.status,
                "upstream server error; serving snapshot"
            );
            Err(FallbackReason::ServerError(response.status))
        }
        Ok(response) => {
            metrics::record_upstream_request(label, "ok");
            Ok(LiveResponse(response))
        }
        Err(err) => {
            metrics::record_upstream_request(label, err.label());
            warn!(endpoint = endpoint.path(), %err, "upstream unavailable; serving snapshot");
            Err(FallbackReason::from_error(&err))
        }
    }
}

pub(crate) async fn attempt_fallback(
    state: &ServeState,
    endpoint: ProxyEndpoint,
    params: &[(String, String)],
    reason: FallbackReason,
) -> Response {
    let reason_value = HeaderValue::from_str(&reason.to_string())
        .unwrap_or_else(|_| HeaderValue::from_static("unknown"));
    let recent = state.context().recent();
    let Some(snapshot) = recent.snapshot().await else {
        metrics::record_cache_event("recent", "fallback_missing");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [
                (HeaderName::from_static(DETECTIONS_FALLBACK), reason_value),
                (header::CACHE_CONTROL, no_store()),
            ],
            Json(json!({
                "error": "upstream unavailable and no fallback snapshot",
                "reason": reason.to_string(),
            })),
        )
            .into_response();
    };
    metrics::record_cache_event("recent", "fallback_served");

    let headers = [
        (
            HeaderName::from_static(DETECTIONS_CACHE),
            HeaderValue::from_static("stale"),
        ),
        (HeaderName::from_static(DETECTIONS_FALLBACK), reason_value),
        (header::CACHE_CONTROL, no_store()),
    ];
    match endpoint {
        ProxyEndpoint::Recent => {
            let limit = recent_limit(params, recent.settings().default_limit, recent.settings().cap);
            let records: Vec<&DetectionRecord> = snapshot.detections.iter().take(limit).collect();
            (StatusCode::OK, headers, Json(records)).into_response()
        }
        ProxyEndpoint::Detections => {
            let page = DetectionFilter::from_params(params).apply(&snapshot);
            (
                StatusCode::OK,
                headers,
                Json(json!({ "data": page.data, "total": page.total })),
            )
                .into_response()
        }
    }
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.trim())
        .filter(|value| !value.is_empty())
}

fn recent_limit(params: &[(String, String)], default: usize, cap: usize) -> usize {
    param(params, "limit")
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(default)
        .clamp(1, cap.max(1))
}

/// The subset of the upstream `detections` query that can be answered from
/// the snapshot. Unparsable values are ignored rather than rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct DetectionFilter {
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    species: Option<String>,
    offset: usize,
    limit: usize,
}

pub(crate) struct FilteredPage<'a> {
    pub(crate) data: Vec<&'a DetectionRecord>,
    pub(crate) total: usize,
}

impl DetectionFilter {
    pub(crate) fn from_params(params: &[(String, String)]) -> Self {
        let date = |key| param(params, key).and_then(|raw| raw.parse::<NaiveDate>().ok());
        Self {
            start_date: date("start_date"),
            end_date: date("end_date"),
            species: param(params, "species").map(str::to_string),
            offset: param(params, "offset")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0),
            limit: param(params, "numResults")
                .and_then(|raw| raw.parse::<usize>().ok())
                .unwrap_or(DEFAULT_DETECTIONS_LIMIT)
                .clamp(1, MAX_DETECTIONS_LIMIT),
        }
    }

    fn matches(&self, record: &DetectionRecord) -> bool {
        let day = record.timestamp.date_naive();
        self.start_date.map_or(true, |start| day >= start)
            && self.end_date.map_or(true, |end| day <= end)
            && self
                .species
                .as_deref()
                .map_or(true, |needle| record.matches_species(needle))
    }

    pub(crate) fn apply<'a>(&self, snapshot: &'a RecentSnapshot) -> FilteredPage<'a> {
        let matching: Vec<&DetectionRecord> = snapshot
            .detections
            .iter()
            .filter(|record| self.matches(record))
            .collect();
        let total = matching.len();
        let data = matching
            .into_iter()
            .skip(self.offset)
            .take(self.limit)
            .collect();
        FilteredPage { data, total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::router::test_app::{json_body, TestApp};
    use crate::test_support::{detection, FakeUpstream};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::time::Duration;

    fn pairs(raw: &[(&str, &str)]) -> Params {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn snapshot() -> RecentSnapshot {
        let base = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let records = (0..6)
            .map(|i| {
                let (sci, common) = if i % 2 == 0 {
                    ("Turdus merula", "Eurasian Blackbird")
                } else {
                    ("Parus major", "Great Tit")
                };
                detection(i, sci, common, base - ChronoDuration::days(i as i64))
            })
            .collect();
        RecentSnapshot::new(base, records, 100)
    }

    #[test]
    fn filter_honours_dates_species_and_paging() {
        let snapshot = snapshot();
        let filter = DetectionFilter::from_params(&pairs(&[
            ("start_date", "2024-05-06"),
            ("end_date", "2024-05-09"),
            ("species", "eurasian blackbird"),
        ]));
        let page = filter.apply(&snapshot);
        let ids: Vec<&str> = page.data.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["2", "4"]);
        assert_eq!(page.total, 2);

        let partial = DetectionFilter::from_params(&pairs(&[("species", "blackbird")]));
        assert_eq!(partial.apply(&snapshot).total, 0);

        let paged = DetectionFilter::from_params(&pairs(&[("offset", "1"), ("numResults", "2")]))
            .apply(&snapshot);
        let ids: Vec<&str> = paged.data.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);
        assert_eq!(paged.total, 6);
    }

    #[test]
    fn garbage_parameters_fall_back_to_defaults() {
        let filter = DetectionFilter::from_params(&pairs(&[
            ("start_date", "yesterday"),
            ("numResults", "-3"),
            ("offset", "x"),
        ]));
        assert_eq!(filter.start_date, None);
        assert_eq!(filter.offset, 0);
        assert_eq!(filter.limit, DEFAULT_DETECTIONS_LIMIT);
        assert_eq!(
            DetectionFilter::from_params(&pairs(&[("numResults", "50000")])).limit,
            MAX_DETECTIONS_LIMIT
        );
    }

    #[test]
    fn recent_limit_is_clamped_to_cap() {
        assert_eq!(recent_limit(&pairs(&[]), 10, 2000), 10);
        assert_eq!(recent_limit(&pairs(&[("limit", "0")]), 10, 2000), 1);
        assert_eq!(recent_limit(&pairs(&[("limit", "9999")]), 10, 2000), 2000);
    }

    #[test]
    fn fallback_reason_header_values() {
        assert_eq!(FallbackReason::Timeout.to_string(), "timeout");
        assert_eq!(FallbackReason::ServerError(503).to_string(), "upstream-503");
        assert_eq!(
            FallbackReason::from_error(&UpstreamError::Transport("refused".into())),
            FallbackReason::Unreachable
        );
    }

    #[tokio::test]
    async fn healthy_upstream_is_passed_through() {
        let now = Utc::now();
        let app = TestApp::new(FakeUpstream::with_detections(vec![detection(
            1,
            "Turdus merula",
            "Eurasian Blackbird",
            now,
        )]));
        let response = app.get("/api/v2/detections/recent?limit=5").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[DETECTIONS_CACHE], "live");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(json_body(response).await[0]["id"], "1");
    }

    #[tokio::test]
    async fn timeout_serves_filtered_snapshot() {
        let app = TestApp::new(FakeUpstream::default());
        app.upstream
            .fail_forward(UpstreamError::Timeout(Duration::from_secs(12)));
        birdboard_snapshot_store::save(
            &app.context.settings().storage.recent_path(),
            &snapshot(),
        )
        .await
        .unwrap();

        let response = app
            .get("/api/v2/detections?species=Parus%20major&numResults=1")
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[DETECTIONS_CACHE], "stale");
        assert_eq!(response.headers()[DETECTIONS_FALLBACK], "timeout");
        let body = json_body(response).await;
        assert_eq!(body["total"], 3);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"][0]["scientificName"], "Parus major");
    }

    #[tokio::test]
    async fn no_snapshot_means_service_unavailable() {
        let app = TestApp::new(FakeUpstream::default());
        app.upstream.fail_forward(UpstreamError::Status {
            status: 502,
            body: "bad gateway".into(),
        });
        let response = app.get("/api/v2/detections/recent").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert_eq!(response.headers()[DETECTIONS_FALLBACK], "upstream-502");
    }
}
