use std::time::Duration;

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::freshness::CacheState;

mod detections;
mod family;
mod ops;
mod summary;

pub(crate) use detections::router as detection_routes;
pub(crate) use family::router as family_routes;
pub(crate) use ops::router as ops_routes;
pub(crate) use summary::router as summary_routes;

use super::state::ServeState;

const CONTENT_SECURITY_POLICY: &str = "default-src 'none'; frame-ancestors 'none'";
const STRICT_TRANSPORT_SECURITY: &str = "max-age=63072000; includeSubDomains";

pub(crate) fn no_store() -> HeaderValue {
    HeaderValue::from_static("no-store")
}

pub(crate) fn no_cache() -> HeaderValue {
    HeaderValue::from_static("no-cache")
}

/// Every route, without state or middleware.
pub fn build_router() -> Router<ServeState> {
    Router::new()
        .merge(summary_routes())
        .merge(detection_routes())
        .merge(family_routes())
        .merge(ops_routes())
}

/// The served application: routes, security headers, tracing and CORS.
pub fn build_app(state: ServeState) -> Router {
    build_router()
        .layer(security_header(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(security_header(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(STRICT_TRANSPORT_SECURITY),
        ))
        .layer(security_header(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(security_header(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(security_header(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

fn security_header(name: HeaderName, value: HeaderValue) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(name, value)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
}

/// `Cache-Control` for a three-state cached payload.
pub(crate) fn cache_control(state: CacheState, remaining: Duration) -> HeaderValue {
    match state {
        CacheState::Fresh => HeaderValue::from_str(&format!(
            "public, max-age={}",
            remaining.as_secs()
        ))
        .unwrap_or_else(|_| no_cache()),
        CacheState::Stale => no_cache(),
        CacheState::Warming => no_store(),
    }
}

pub(crate) fn cache_state_value(state: CacheState) -> HeaderValue {
    HeaderValue::from_static(state.as_str())
}
