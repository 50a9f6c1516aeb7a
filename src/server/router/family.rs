use axum::{
    extract::{Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, instrument};

use super::{cache_control, cache_state_value, no_store};
use crate::errors::FamilyError;
use crate::family::FamilyQuery;
use crate::freshness::CacheState;
use crate::server::ServeState;

const FAMILY_CACHE: &str = "x-family-cache";

pub(crate) fn router() -> Router<ServeState> {
    Router::new().route("/api/v2/family-matches", get(family_matches_handler))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FamilyMatchParams {
    family_common: Option<String>,
    scientific_name: Option<String>,
    /// Kept as text so a malformed limit falls back to the default.
    limit: Option<String>,
}

impl From<FamilyMatchParams> for FamilyQuery {
    fn from(params: FamilyMatchParams) -> Self {
        FamilyQuery {
            family_common: params.family_common.unwrap_or_default(),
            scientific_name: params
                .scientific_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            limit: params
                .limit
                .and_then(|raw| raw.trim().parse::<usize>().ok()),
        }
    }
}

#[instrument(name = "birdboard.family.matches", skip(state))]
async fn family_matches_handler(
    State(state): State<ServeState>,
    Query(params): Query<FamilyMatchParams>,
) -> Response {
    match state.context().family().matches(params.into()).await {
        Ok(read) => (
            StatusCode::OK,
            [
                (HeaderName::from_static(FAMILY_CACHE), cache_state_value(read.state)),
                (header::CACHE_CONTROL, cache_control(read.state, read.remaining)),
            ],
            Json(read.payload),
        )
            .into_response(),
        Err(FamilyError::NotReady) => (
            StatusCode::ACCEPTED,
            [
                (
                    HeaderName::from_static(FAMILY_CACHE),
                    cache_state_value(CacheState::Warming),
                ),
                (header::CACHE_CONTROL, no_store()),
            ],
            Json(json!({ "pending": true })),
        )
            .into_response(),
        Err(err) => {
            error!(%err, "family match resolution failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CACHE_CONTROL, no_store())],
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}
