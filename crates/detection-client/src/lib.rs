//! Client for the upstream detection engine.
//!
//! The client performs exactly one HTTP call per method and never retries;
//! callers decide whether a failure means "fall back", "back off" or "give up".

pub mod client;
pub mod errors;
pub mod payload;

pub use client::{
    DetectionApi, ForwardedResponse, HttpUpstream, PageQuery, ProxyEndpoint, SpeciesLookup,
    UpstreamConfig,
};
pub use errors::{PayloadError, UpstreamError, UpstreamResult};
pub use payload::{parse_detection_page, parse_species_family, DetectionPage};
