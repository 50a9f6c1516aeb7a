//! Rolling 30-day summary built from the paginated `detections` endpoint.

mod accumulator;
mod engine;

pub use engine::{RebuildOutcome, SharedRebuild, SummaryEngine, SummaryRead, SummaryStatus};
