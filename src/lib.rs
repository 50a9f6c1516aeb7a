//! Birdboard proxy library
//!
//! Caching and aggregation layer between the dashboard and the upstream
//! detection API. Exposes modules for the binary and integration tests.

pub mod app_context;
pub mod background;
pub mod cli;
pub mod config;
pub mod errors;
pub mod family;
pub mod freshness;
pub mod metrics;
pub mod recent;
pub mod server;
pub mod summary;

#[cfg(test)]
pub(crate) mod test_support;

pub use app_context::{AppContext, BootstrapReport};
pub use config::ProxySettings;
pub use freshness::CacheState;
