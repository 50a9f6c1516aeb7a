use axum::{
    extract::State,
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::{error, instrument};

use super::{cache_control, cache_state_value, no_store};
use crate::freshness::CacheState;
use crate::server::ServeState;

const SUMMARY_CACHE: &str = "x-summary-cache";

pub(crate) fn router() -> Router<ServeState> {
    Router::new().route("/api/v2/summary/30d", get(summary_handler))
}

/// Serves whatever summary is on hand. Never waits for a rebuild.
#[instrument(name = "birdboard.summary.read", skip(state))]
async fn summary_handler(State(state): State<ServeState>) -> Response {
    let engine = state.context().summary();
    let read = engine.read();
    if let Some(snapshot) = read.snapshot.as_deref() {
        return (
            StatusCode::OK,
            [
                (HeaderName::from_static(SUMMARY_CACHE), cache_state_value(read.state)),
                (header::CACHE_CONTROL, cache_control(read.state, read.remaining)),
            ],
            Json(snapshot),
        )
            .into_response();
    }

    if let Some(err) = engine.last_error().filter(|err| err.is_contract_violation()) {
        error!(%err, "summary unavailable: upstream contract violated");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CACHE_CONTROL, no_store())],
            Json(json!({ "error": err.to_string() })),
        )
            .into_response();
    }

    (
        StatusCode::ACCEPTED,
        [
            (HeaderName::from_static(SUMMARY_CACHE), cache_state_value(CacheState::Warming)),
            (header::CACHE_CONTROL, no_store()),
        ],
        Json(json!({ "pending": true })),
    )
        .into_response()
}
