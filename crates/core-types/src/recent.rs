use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DetectionRecord;

/// Last-resort copy of the most recent detections, newest first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecentSnapshot {
    pub generated_at: DateTime<Utc>,
    pub detections: Vec<DetectionRecord>,
}

impl RecentSnapshot {
    /// Sorts newest-first and keeps at most `cap` records.
    pub fn new(generated_at: DateTime<Utc>, mut detections: Vec<DetectionRecord>, cap: usize) -> Self {
        detections.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        detections.truncate(cap);
        Self {
            generated_at,
            detections,
        }
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
