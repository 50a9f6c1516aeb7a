//! Shared primitives for the Birdboard caching proxy.
//!
//! Everything that crosses a crate boundary or lands on disk lives here:
//! detection records, the 30-day summary, the recent-detections fallback
//! snapshot and the family-match cache entries.

pub mod detection;
pub mod family;
pub mod recent;
pub mod summary;

pub use detection::{normalize_confidence, DetectionRecord};
pub use family::{
    family_cache_key, has_family_intersection, tokenize_family, FamilyCacheEntry,
    FamilyCacheFile, FamilyMatch, FamilyMatchPayload, SpeciesFamilyInfo,
};
pub use recent::RecentSnapshot;
pub use summary::{
    ArchiveGroup, SpeciesCount, SummaryArchive, SummarySnapshot, SummaryStats, HOURS_PER_DAY,
};

use chrono::{DateTime, Utc};

/// Anything persisted as a wholesale snapshot carries the instant it was built.
pub trait Timestamped {
    fn generated_at(&self) -> DateTime<Utc>;
}

impl Timestamped for SummarySnapshot {
    fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }
}

impl Timestamped for RecentSnapshot {
    fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }
}

impl Timestamped for FamilyCacheFile {
    fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }
}

/// Elapsed time since `then`; timestamps in the future count as zero age.
pub fn age_of(then: DateTime<Utc>, now: DateTime<Utc>) -> std::time::Duration {
    now.signed_duration_since(then)
        .to_std()
        .unwrap_or_default()
}
