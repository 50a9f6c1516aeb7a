use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use crate::metrics;
use crate::server::ServeState;

pub(crate) fn router() -> Router<ServeState> {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/readyz", get(ready_handler))
        .route("/cachez", get(cache_handler))
        .route("/metrics", get(metrics_handler))
}

async fn health_handler(State(state): State<ServeState>) -> Json<Value> {
    let snapshot = state.health_snapshot();
    Json(json!({
        "status": "ok",
        "live": snapshot.live,
        "ready": snapshot.ready,
        "task_failures": snapshot.task_failures,
        "last_task_failure": snapshot.last_task_failure,
    }))
}

async fn ready_handler(State(state): State<ServeState>) -> impl IntoResponse {
    let readiness = state.readiness();
    let snapshot = state.health_snapshot();
    let status = if readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": readiness.is_ready(),
            "summary": readiness.summary,
            "recent": readiness.recent,
            "last_ready_check_ts": snapshot.last_ready_check,
            "last_error": snapshot.last_error,
        })),
    )
}

/// Everything an operator wants to know about the caches in one document.
async fn cache_handler(State(state): State<ServeState>) -> Json<Value> {
    let context = state.context();
    Json(json!({
        "summary": context.summary().status(),
        "recent": context.recent().status(),
        "family": context.family().status(),
        "health": state.health_snapshot(),
        "build": {
            "version": env!("CARGO_PKG_VERSION"),
            "git_hash": env!("BIRDBOARD_GIT_HASH"),
            "build_date": env!("BIRDBOARD_BUILD_DATE"),
        },
    }))
}

async fn metrics_handler() -> Response {
    metrics::render()
}
