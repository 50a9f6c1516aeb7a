//! Disk persistence primitive shared by every Birdboard cache layer.
//!
//! A snapshot is a whole JSON document written atomically to a fixed path.
//! Readers either get the last complete document or nothing at all.

pub mod api;
pub mod errors;
pub mod fs;

pub use api::{load, save, SnapshotFile};
pub use errors::SnapError;
