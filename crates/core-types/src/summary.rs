use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const HOURS_PER_DAY: usize = 24;

/// Rolling 30-day statistical summary, rebuilt and persisted wholesale.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SummarySnapshot {
    pub generated_at: DateTime<Utc>,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub stats: SummaryStats,
    pub archive: SummaryArchive,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_detections: u64,
    pub unique_species: u64,
    pub avg_confidence: f64,
    pub hourly_bins: Vec<u64>,
    pub top_species: Vec<SpeciesCount>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesCount {
    pub scientific_name: String,
    pub common_name: String,
    pub count: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryArchive {
    pub groups: Vec<ArchiveGroup>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveGroup {
    pub scientific_name: String,
    pub common_name: String,
    pub count: u64,
    pub last_seen_at: DateTime<Utc>,
}

impl SummarySnapshot {
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.generated_at)
    }

    /// True when `stats` and `archive` match, ignoring when each was built.
    pub fn same_content(&self, other: &SummarySnapshot) -> bool {
        self.stats == other.stats && self.archive == other.archive
    }
}
