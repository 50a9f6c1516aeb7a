/// Outcome of resolving one memo miss against the `species` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LookupOutcome {
    Tokens(Vec<String>),
    RateLimited,
    Failed,
}

/// Everything that can leave a family resolution short of the full answer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LookupProgress {
    pub(crate) lookups: usize,
    pub(crate) rate_limited: bool,
    pub(crate) cooldown_skip: bool,
    pub(crate) over_budget: bool,
    pub(crate) failed: bool,
}

impl LookupProgress {
    /// A result that hit the build limit is complete no matter what was
    /// skipped; otherwise every candidate must have been examined.
    pub(crate) fn is_complete(&self, limit_reached: bool) -> bool {
        limit_reached
            || !(self.rate_limited || self.cooldown_skip || self.over_budget || self.failed)
    }

    pub(crate) fn record(&mut self, outcome: &LookupOutcome) {
        self.lookups += 1;
        match outcome {
            LookupOutcome::Tokens(_) => {}
            LookupOutcome::RateLimited => self.rate_limited = true,
            LookupOutcome::Failed => self.failed = true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_reached_overrides_every_shortfall() {
        let progress = LookupProgress {
            rate_limited: true,
            over_budget: true,
            ..LookupProgress::default()
        };
        assert!(progress.is_complete(true));
        assert!(!progress.is_complete(false));
    }

    #[test]
    fn each_shortfall_marks_incomplete() {
        for outcome in [LookupOutcome::RateLimited, LookupOutcome::Failed] {
            let mut progress = LookupProgress::default();
            progress.record(&outcome);
            assert!(!progress.is_complete(false), "{outcome:?}");
        }
        let skipped = LookupProgress {
            cooldown_skip: true,
            ..LookupProgress::default()
        };
        assert!(!skipped.is_complete(false));

        let mut clean = LookupProgress::default();
        clean.record(&LookupOutcome::Tokens(vec!["thrushes".into()]));
        assert!(clean.is_complete(false));
        assert_eq!(clean.lookups, 1);
    }
}
