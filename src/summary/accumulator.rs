use std::cmp::Ordering;
use std::collections::HashMap;

use birdboard_core_types::{
    ArchiveGroup, DetectionRecord, SpeciesCount, SummaryArchive, SummarySnapshot, SummaryStats,
    HOURS_PER_DAY,
};
use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug)]
struct SpeciesTally {
    scientific_name: String,
    common_name: String,
    count: u64,
}

#[derive(Debug)]
struct WindowTally {
    tally: SpeciesTally,
    last_seen_at: DateTime<Utc>,
}

/// Streaming aggregate over every record of a summary scan.
#[derive(Debug)]
pub(crate) struct SummaryAccumulator {
    window_start: NaiveDate,
    window_end: NaiveDate,
    hourly: [u64; HOURS_PER_DAY],
    total: u64,
    confidence_sum: f64,
    species: HashMap<String, SpeciesTally>,
    window: HashMap<String, WindowTally>,
}

impl SummaryAccumulator {
    pub(crate) fn new(window_start: NaiveDate, window_end: NaiveDate) -> Self {
        Self {
            window_start,
            window_end,
            hourly: [0; HOURS_PER_DAY],
            total: 0,
            confidence_sum: 0.0,
            species: HashMap::new(),
            window: HashMap::new(),
        }
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    pub(crate) fn ingest(&mut self, record: &DetectionRecord) {
        let key = record.species_key();
        if key.is_empty() {
            return;
        }
        self.total += 1;
        self.hourly[record.utc_hour()] += 1;
        self.confidence_sum += record.confidence;

        self.species
            .entry(key.to_string())
            .or_insert_with(|| SpeciesTally::for_record(record))
            .bump(record);

        let day = record.timestamp.date_naive();
        if day < self.window_start || day > self.window_end {
            return;
        }
        self.window
            .entry(key.to_string())
            .and_modify(|entry| {
                entry.tally.bump(record);
                if record.timestamp > entry.last_seen_at {
                    entry.last_seen_at = record.timestamp;
                }
            })
            .or_insert_with(|| {
                let mut tally = SpeciesTally::for_record(record);
                tally.bump(record);
                WindowTally {
                    tally,
                    last_seen_at: record.timestamp,
                }
            });
    }

    pub(crate) fn finish(self, generated_at: DateTime<Utc>, top_n: usize) -> SummarySnapshot {
        let avg_confidence = if self.total == 0 {
            0.0
        } else {
            round2(self.confidence_sum / self.total as f64)
        };

        let mut top: Vec<SpeciesTally> = self.species.into_values().collect();
        top.sort_by(by_count_then_name);
        let unique_species = top.len() as u64;
        let top_species = top
            .into_iter()
            .take(top_n)
            .map(|tally| SpeciesCount {
                scientific_name: tally.scientific_name,
                common_name: tally.common_name,
                count: tally.count,
            })
            .collect();

        let mut groups: Vec<WindowTally> = self.window.into_values().collect();
        groups.sort_by(|a, b| by_count_then_name(&a.tally, &b.tally));
        let groups = groups
            .into_iter()
            .map(|entry| ArchiveGroup {
                scientific_name: entry.tally.scientific_name,
                common_name: entry.tally.common_name,
                count: entry.tally.count,
                last_seen_at: entry.last_seen_at,
            })
            .collect();

        SummarySnapshot {
            generated_at,
            window_start: self.window_start,
            window_end: self.window_end,
            stats: SummaryStats {
                total_detections: self.total,
                unique_species,
                avg_confidence,
                hourly_bins: self.hourly.to_vec(),
                top_species,
            },
            archive: SummaryArchive { groups },
        }
    }
}

impl SpeciesTally {
    fn for_record(record: &DetectionRecord) -> Self {
        Self {
            scientific_name: record.scientific_name.trim().to_string(),
            common_name: record.common_name.trim().to_string(),
            count: 0,
        }
    }

    fn bump(&mut self, record: &DetectionRecord) {
        self.count += 1;
        if self.common_name.is_empty() {
            self.common_name = record.common_name.trim().to_string();
        }
    }
}

fn by_count_then_name(a: &SpeciesTally, b: &SpeciesTally) -> Ordering {
    b.count
        .cmp(&a.count)
        .then_with(|| a.scientific_name.cmp(&b.scientific_name))
        .then_with(|| a.common_name.cmp(&b.common_name))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
