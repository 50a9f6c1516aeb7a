use std::time::Duration;

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{histogram_opts, Encoder, Histogram, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::{debug, error};

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();
static UPSTREAM_REQUESTS: OnceCell<IntCounterVec> = OnceCell::new();
static CACHE_EVENTS: OnceCell<IntCounterVec> = OnceCell::new();
static FAMILY_LOOKUPS: OnceCell<IntCounterVec> = OnceCell::new();
static SKIPPED_RECORDS: OnceCell<IntCounterVec> = OnceCell::new();
static SUMMARY_REBUILD_SECONDS: OnceCell<Histogram> = OnceCell::new();

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        register_upstream_metrics(registry);
        register_cache_metrics(registry);
        register_summary_metrics(registry);
    });
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

fn register_upstream_metrics(registry: &Registry) {
    let requests = IntCounterVec::new(
        Opts::new(
            "birdboard_upstream_requests_total",
            "Upstream detection API calls grouped by endpoint/outcome",
        ),
        &["endpoint", "outcome"],
    )
    .expect("create upstream request counter");
    if let Err(err) = registry.register(Box::new(requests.clone())) {
        error!(?err, "failed to register upstream request counter");
    }
    let _ = UPSTREAM_REQUESTS.set(requests);

    let skipped = IntCounterVec::new(
        Opts::new(
            "birdboard_skipped_records_total",
            "Upstream detection rows dropped as unreadable, by endpoint",
        ),
        &["endpoint"],
    )
    .expect("create skipped record counter");
    if let Err(err) = registry.register(Box::new(skipped.clone())) {
        error!(?err, "failed to register skipped record counter");
    }
    let _ = SKIPPED_RECORDS.set(skipped);

    let lookups = IntCounterVec::new(
        Opts::new(
            "birdboard_family_lookups_total",
            "Species family lookups grouped by outcome",
        ),
        &["outcome"],
    )
    .expect("create family lookup counter");
    if let Err(err) = registry.register(Box::new(lookups.clone())) {
        error!(?err, "failed to register family lookup counter");
    }
    let _ = FAMILY_LOOKUPS.set(lookups);
}

fn register_cache_metrics(registry: &Registry) {
    let events = IntCounterVec::new(
        Opts::new(
            "birdboard_cache_events_total",
            "Cache reads and writes grouped by cache/event",
        ),
        &["cache", "event"],
    )
    .expect("create cache event counter");
    if let Err(err) = registry.register(Box::new(events.clone())) {
        error!(?err, "failed to register cache event counter");
    }
    let _ = CACHE_EVENTS.set(events);
}

fn register_summary_metrics(registry: &Registry) {
    let rebuild = Histogram::with_opts(histogram_opts!(
        "birdboard_summary_rebuild_seconds",
        "Wall time of full 30-day summary rebuilds",
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ))
    .expect("create summary rebuild histogram");
    if let Err(err) = registry.register(Box::new(rebuild.clone())) {
        error!(?err, "failed to register summary rebuild histogram");
    }
    let _ = SUMMARY_REBUILD_SECONDS.set(rebuild);
}

pub fn record_upstream_request(endpoint: &str, outcome: &str) {
    register_metrics();
    if let Some(counter) = UPSTREAM_REQUESTS.get() {
        counter.with_label_values(&[endpoint, outcome]).inc();
    }
}

pub fn record_skipped_records(endpoint: &str, count: usize) {
    if count == 0 {
        return;
    }
    register_metrics();
    if let Some(counter) = SKIPPED_RECORDS.get() {
        counter.with_label_values(&[endpoint]).inc_by(count as u64);
    }
}

#[cfg(test)]
pub(crate) fn skipped_records(endpoint: &str) -> u64 {
    register_metrics();
    SKIPPED_RECORDS
        .get()
        .map_or(0, |counter| counter.with_label_values(&[endpoint]).get())
}

pub fn record_cache_event(cache: &str, event: &str) {
    register_metrics();
    if let Some(counter) = CACHE_EVENTS.get() {
        counter.with_label_values(&[cache, event]).inc();
    }
    debug!(target: "cache", %cache, %event, "cache metric");
}

pub fn record_family_lookup(outcome: &str) {
    register_metrics();
    if let Some(counter) = FAMILY_LOOKUPS.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn observe_summary_rebuild(elapsed: Duration) {
    register_metrics();
    if let Some(histogram) = SUMMARY_REBUILD_SECONDS.get() {
        histogram.observe(elapsed.as_secs_f64());
    }
}

/// Prometheus text exposition of the global registry.
pub fn render() -> Response {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&global_registry().gather(), &mut buffer) {
        error!(?err, "failed to encode prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response();
    }

    match String::from_utf8(buffer) {
        Ok(body) => match HeaderValue::from_str(encoder.format_type()) {
            Ok(content_type) => {
                ([(axum::http::header::CONTENT_TYPE, content_type)], body).into_response()
            }
            Err(err) => {
                error!(?err, "failed to build content-type header for metrics");
                (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response()
            }
        },
        Err(err) => {
            error!(?err, "failed to convert prometheus metrics to utf8");
            (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response()
        }
    }
}
