use std::time::Duration;

use birdboard_core_types::age_of;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Three-state read policy shared by the summary and family caches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    Fresh,
    Stale,
    Warming,
}

impl CacheState {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheState::Fresh => "fresh",
            CacheState::Stale => "stale",
            CacheState::Warming => "warming",
        }
    }

    /// Fresh or stale for a payload built at `generated_at`.
    pub fn classify(generated_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> Self {
        if age_of(generated_at, now) < ttl {
            CacheState::Fresh
        } else {
            CacheState::Stale
        }
    }
}

/// Time left before a payload built at `generated_at` stops being fresh.
pub fn remaining_ttl(generated_at: DateTime<Utc>, now: DateTime<Utc>, ttl: Duration) -> Duration {
    ttl.saturating_sub(age_of(generated_at, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn classify_uses_strict_ttl_boundary() {
        let built = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let ttl = Duration::from_secs(3600);
        assert_eq!(
            CacheState::classify(built, built + chrono::Duration::minutes(59), ttl),
            CacheState::Fresh
        );
        assert_eq!(
            CacheState::classify(built, built + chrono::Duration::minutes(60), ttl),
            CacheState::Stale
        );
        assert_eq!(
            remaining_ttl(built, built + chrono::Duration::minutes(45), ttl),
            Duration::from_secs(900)
        );
        assert_eq!(
            remaining_ttl(built, built + chrono::Duration::hours(3), ttl),
            Duration::ZERO
        );
    }
}
