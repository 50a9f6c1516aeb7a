use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use birdboard_cli::server::{build_app, ServeHealth, ServeState};
use birdboard_cli::{AppContext, ProxySettings};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Detections in the upstream's own camelCase shape, newest first.
#[derive(Default)]
struct Upstream {
    detections: Vec<Value>,
    families: HashMap<String, String>,
    recent_down: AtomicBool,
    page_calls: AtomicUsize,
}

type Shared = Arc<Upstream>;

async fn detections(
    State(upstream): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    upstream.page_calls.fetch_add(1, Ordering::SeqCst);
    let offset: usize = params.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
    let limit: usize = params
        .get("numResults")
        .and_then(|v| v.parse().ok())
        .unwrap_or(100);
    let page: Vec<Value> = upstream
        .detections
        .iter()
        .skip(offset)
        .take(limit)
        .cloned()
        .collect();
    Json(json!({ "data": page, "total": upstream.detections.len() }))
}

async fn recent(
    State(upstream): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if upstream.recent_down.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "engine restarting").into_response();
    }
    let limit: usize = params.get("limit").and_then(|v| v.parse().ok()).unwrap_or(10);
    let items: Vec<Value> = upstream.detections.iter().take(limit).cloned().collect();
    Json(Value::Array(items)).into_response()
}

async fn species(
    State(upstream): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let name = params.get("scientific_name").cloned().unwrap_or_default();
    match upstream.families.get(&name) {
        Some(family) => Json(json!({ "taxonomy": { "family_common": family } })).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_upstream(upstream: Shared) -> SocketAddr {
    let router = Router::new()
        .route("/api/v2/detections", get(detections))
        .route("/api/v2/detections/recent", get(recent))
        .route("/api/v2/species", get(species))
        .with_state(upstream);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .expect("serve");
    });
    addr
}

struct Proxy {
    context: Arc<AppContext>,
    router: Router,
    _dir: tempfile::TempDir,
}

impl Proxy {
    async fn start(upstream: Shared) -> Self {
        let addr = spawn_upstream(upstream).await;
        let dir = tempfile::tempdir().unwrap();
        let mut settings = ProxySettings::default();
        settings.upstream.base_url = format!("http://{addr}/api/v2/");
        settings.upstream.timeout_ms = 2_000;
        settings.storage.data_dir = dir.path().to_path_buf();
        let context = Arc::new(AppContext::new(settings).expect("context"));
        context.bootstrap().await;
        let state = ServeState::new(Arc::clone(&context), Arc::new(ServeHealth::new()));
        Self {
            context,
            router: build_app(state),
            _dir: dir,
        }
    }

    async fn get(&self, uri: &str) -> (StatusCode, axum::http::HeaderMap, Value) {
        let response = self
            .router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }
}

fn record(id: usize, scientific: &str, common: &str, minutes_ago: i64) -> Value {
    let at = Utc::now() - ChronoDuration::minutes(minutes_ago);
    json!({
        "id": id,
        "commonName": common,
        "scientificName": scientific,
        "confidence": 0.87,
        "timestamp": at.to_rfc3339(),
    })
}

#[tokio::test]
async fn recent_outage_is_served_from_snapshot() {
    let upstream = Arc::new(Upstream {
        detections: (0..50)
            .map(|i| record(i, "Turdus merula", "Eurasian Blackbird", i as i64))
            .collect(),
        ..Upstream::default()
    });
    let proxy = Proxy::start(Arc::clone(&upstream)).await;
    proxy.context.recent().refresh().await.unwrap();
    assert_eq!(proxy.context.recent().cached().unwrap().len(), 50);

    upstream.recent_down.store(true, Ordering::SeqCst);
    let (status, headers, body) = proxy.get("/api/v2/detections/recent?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-detections-cache"], "stale");
    assert_eq!(headers["x-detections-fallback"], "upstream-503");
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 10);
    let ids: Vec<&str> = items.iter().map(|item| item["id"].as_str().unwrap()).collect();
    assert_eq!(ids, ["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"]);
    assert_eq!(items[0]["commonName"], "Eurasian Blackbird");
}

#[tokio::test]
async fn healthy_recent_endpoint_is_relayed_live() {
    let upstream = Arc::new(Upstream {
        detections: (0..3)
            .map(|i| record(i, "Parus major", "Great Tit", i as i64))
            .collect(),
        ..Upstream::default()
    });
    let proxy = Proxy::start(upstream).await;
    let (status, headers, body) = proxy.get("/api/v2/detections/recent?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-detections-cache"], "live");
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn summary_covers_every_paginated_record() {
    let mut detections: Vec<Value> = (0..300)
        .map(|i| record(i, "Turdus merula", "Eurasian Blackbird", (i % 600) as i64))
        .collect();
    detections.extend((300..501).map(|i| record(i, "Parus major", "Great Tit", (i * 7) as i64)));
    let upstream = Arc::new(Upstream {
        detections,
        ..Upstream::default()
    });
    let proxy = Proxy::start(Arc::clone(&upstream)).await;

    let (status, headers, body) = proxy.get("/api/v2/summary/30d").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(headers["x-summary-cache"], "warming");
    assert_eq!(body["pending"], true);

    proxy.context.summary().rebuild().await.unwrap();
    let (status, headers, body) = proxy.get("/api/v2/summary/30d").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-summary-cache"], "fresh");

    let stats = &body["stats"];
    assert_eq!(stats["total_detections"], 501);
    assert_eq!(stats["unique_species"], 2);
    assert_eq!(stats["top_species"][0]["scientific_name"], "Turdus merula");
    assert_eq!(stats["top_species"][0]["count"], 300);
    let hourly: u64 = stats["hourly_bins"]
        .as_array()
        .unwrap()
        .iter()
        .map(|bin| bin.as_u64().unwrap())
        .sum();
    assert_eq!(hourly, 501);
    assert_eq!(stats["avg_confidence"], 87.0);
    assert!(body["archive"]["groups"][0]["last_seen_at"].is_string());
    assert!(upstream.page_calls.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn family_matches_resolve_through_species_endpoint() {
    let upstream = Arc::new(Upstream {
        detections: vec![
            record(1, "Turdus merula", "Eurasian Blackbird", 1),
            record(2, "Turdus merula", "Eurasian Blackbird", 2),
            record(3, "Cyanistes caeruleus", "Blue Tit", 3),
            record(4, "Turdus philomelos", "Song Thrush", 4),
        ],
        families: HashMap::from([
            ("Turdus merula".to_string(), "Thrushes and Allies".to_string()),
            ("Turdus philomelos".to_string(), "Thrushes".to_string()),
            ("Cyanistes caeruleus".to_string(), "Tits, Chickadees".to_string()),
        ]),
        ..Upstream::default()
    });
    let proxy = Proxy::start(upstream).await;

    let (status, _, body) = proxy.get("/api/v2/family-matches?familyCommon=Thrushes").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["pending"], true);

    proxy.context.summary().rebuild().await.unwrap();
    let (status, headers, body) = proxy
        .get("/api/v2/family-matches?familyCommon=Thrushes&scientificName=Turdus%20philomelos")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["x-family-cache"], "fresh");
    assert_eq!(body["complete"], true);
    let names: Vec<&str> = body["matches"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["scientific_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Turdus merula"]);
}

#[tokio::test]
async fn proxy_serves_over_tcp_with_hardening_headers() {
    let upstream = Arc::new(Upstream {
        detections: vec![record(1, "Erithacus rubecula", "European Robin", 1)],
        ..Upstream::default()
    });
    let proxy = Proxy::start(upstream).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
    let addr = listener.local_addr().expect("proxy addr");
    let router = proxy.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .expect("serve proxy");
    });

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("client");
    let response = client
        .get(format!("http://{addr}/api/v2/detections?numResults=5"))
        .header("Origin", "http://dashboard.local")
        .send()
        .await
        .expect("request");
    assert!(response.status().is_success());
    let headers = response.headers().clone();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["access-control-allow-origin"], "*");
    assert_eq!(headers["x-detections-cache"], "live");
    let body: Value = response.json().await.expect("json body");
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["scientificName"], "Erithacus rubecula");

    let health: Value = client
        .get(format!("http://{addr}/healthz"))
        .send()
        .await
        .expect("healthz")
        .json()
        .await
        .expect("health body");
    assert_eq!(health["status"], "ok");
}
