use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use birdboard_detection_client::{
    DetectionApi, HttpUpstream, PageQuery, ProxyEndpoint, SpeciesLookup, UpstreamConfig,
    UpstreamError,
};
use chrono::NaiveDate;
use serde_json::json;
use std::collections::HashMap;
use tokio::net::TcpListener;

async fn spawn_upstream(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .await
            .expect("serve");
    });
    addr
}

fn client_for(addr: SocketAddr, timeout: Duration) -> HttpUpstream {
    HttpUpstream::new(UpstreamConfig {
        base_url: format!("http://{addr}/api/v2"),
        timeout,
    })
    .expect("client")
}

async fn detections(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    let offset: usize = params["offset"].parse().unwrap();
    let items: Vec<_> = (0..2)
        .map(|i| {
            json!({
                "id": offset + i,
                "commonName": "Robin",
                "scientificName": "Erithacus rubecula",
                "confidence": 0.9,
                "timestamp": "2024-05-01T06:00:00Z",
            })
        })
        .collect();
    Json(json!({ "data": items, "total": 2, "echo": params }))
}

async fn species(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    match params.get("scientific_name").map(String::as_str) {
        Some("Turdus merula") => (
            StatusCode::OK,
            Json(json!({ "taxonomy": { "family_common": "Thrushes" } })),
        )
            .into_response(),
        Some("Busy bird") => StatusCode::TOO_MANY_REQUESTS.into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

#[tokio::test]
async fn fetches_pages_and_classifies_species_lookups() {
    let router = Router::new()
        .route("/api/v2/detections", get(detections))
        .route("/api/v2/species", get(species));
    let addr = spawn_upstream(router).await;
    let client = client_for(addr, Duration::from_secs(2));

    let page = client
        .fetch_detection_page(&PageQuery {
            start_date: NaiveDate::from_ymd_opt(2024, 4, 2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            limit: 500,
            offset: 10,
        })
        .await
        .expect("page");
    assert_eq!(page.total, Some(2));
    assert_eq!(page.records[0].id, "10");
    assert_eq!(page.records[0].confidence, 90.0);

    assert_eq!(
        client.lookup_species("Turdus merula").await.unwrap(),
        SpeciesLookup::Found {
            family_common: Some("Thrushes".into())
        }
    );
    assert_eq!(
        client.lookup_species("Nobody").await.unwrap(),
        SpeciesLookup::NotFound
    );
    assert!(matches!(
        client.lookup_species("Busy bird").await,
        Err(UpstreamError::RateLimited)
    ));
}

#[tokio::test]
async fn forward_passes_any_status_through() {
    let router = Router::new().route(
        "/api/v2/detections/recent",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "engine restarting") }),
    );
    let addr = spawn_upstream(router).await;
    let client = client_for(addr, Duration::from_secs(2));

    let forwarded = client
        .forward(ProxyEndpoint::Recent, &[("limit".into(), "5".into())])
        .await
        .expect("forwarded");
    assert_eq!(forwarded.status, 503);
    assert!(forwarded.is_server_error());
    assert_eq!(forwarded.body, b"engine restarting".to_vec());

    let err = client.fetch_recent(5).await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(err.is_transient());
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let router = Router::new().route(
        "/api/v2/detections/recent",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Json(json!([]))
        }),
    );
    let addr = spawn_upstream(router).await;
    let client = client_for(addr, Duration::from_millis(50));

    let err = client.fetch_recent(5).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Timeout(_)));
    assert!(err.is_transient());
}
