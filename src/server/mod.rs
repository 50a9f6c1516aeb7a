//! HTTP façade over the caches.

mod router;
mod state;

pub use router::{build_app, build_router};
pub use state::{ServeHealth, ServeState, TaskFailure};
