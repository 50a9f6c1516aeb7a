use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// A single acoustic detection as reported by the upstream engine.
///
/// Serialized in the upstream's camelCase shape so that fallback responses
/// are indistinguishable from live ones for the browser.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionRecord {
    pub id: String,
    pub common_name: String,
    pub scientific_name: String,
    /// Always 0..=100 once ingested.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl DetectionRecord {
    pub fn new(
        id: impl Into<String>,
        common_name: impl Into<String>,
        scientific_name: impl Into<String>,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            common_name: common_name.into(),
            scientific_name: scientific_name.into(),
            confidence: normalize_confidence(confidence),
            timestamp,
        }
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub fn utc_hour(&self) -> usize {
        self.timestamp.hour() as usize
    }

    /// Grouping key: the scientific name, or the common name when upstream
    /// left the scientific name blank.
    pub fn species_key(&self) -> &str {
        if self.scientific_name.trim().is_empty() {
            self.common_name.trim()
        } else {
            self.scientific_name.trim()
        }
    }

    /// Exact, case-insensitive match on either name. A blank needle matches all.
    pub fn matches_species(&self, needle: &str) -> bool {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return true;
        }
        [&self.common_name, &self.scientific_name]
            .into_iter()
            .any(|name| name.trim().to_lowercase() == needle)
    }
}

/// Upstream reports confidence either as a 0..1 fraction or as a percentage.
/// Anything above 1 is taken to be a percentage already.
pub fn normalize_confidence(raw: f64) -> f64 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0.0;
    }
    let percent = if raw <= 1.0 { raw * 100.0 } else { raw };
    percent.min(100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fractions_become_percentages() {
        assert_eq!(normalize_confidence(0.5), 50.0);
        assert_eq!(normalize_confidence(1.0), 100.0);
        assert_eq!(normalize_confidence(87.0), 87.0);
        assert_eq!(normalize_confidence(-3.0), 0.0);
        assert_eq!(normalize_confidence(f64::NAN), 0.0);
        assert_eq!(normalize_confidence(250.0), 100.0);
    }

    #[test]
    fn species_key_falls_back_to_common_name() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 6, 30, 0).unwrap();
        let record = DetectionRecord::new("1", "Robin", "  ", 0.9, ts);
        assert_eq!(record.species_key(), "Robin");
        assert_eq!(record.utc_hour(), 6);
        assert_eq!(record.confidence, 90.0);
    }

    #[test]
    fn species_filter_needs_a_whole_name() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 6, 30, 0).unwrap();
        let record = DetectionRecord::new("3", "Eurasian Blackbird", "Turdus merula", 0.8, ts);
        assert!(record.matches_species("eurasian blackbird"));
        assert!(record.matches_species(" TURDUS MERULA "));
        assert!(record.matches_species(""));
        assert!(!record.matches_species("blackbird"));
        assert!(!record.matches_species("Turdus"));
    }

    #[test]
    fn serializes_in_camel_case() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 6, 30, 0).unwrap();
        let record = DetectionRecord::new("7", "Robin", "Erithacus rubecula", 91.0, ts);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["commonName"], "Robin");
        assert_eq!(value["scientificName"], "Erithacus rubecula");
        assert_eq!(value["timestamp"], "2024-05-01T06:30:00Z");
    }
}
