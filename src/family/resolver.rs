use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use birdboard_core_types::{
    age_of, family_cache_key, has_family_intersection, tokenize_family, ArchiveGroup,
    FamilyCacheEntry, FamilyCacheFile, FamilyMatch, FamilyMatchPayload, SpeciesFamilyInfo,
    SummarySnapshot,
};
use birdboard_detection_client::{DetectionApi, SpeciesLookup, UpstreamError};
use birdboard_snapshot_store::SnapshotFile;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use super::progress::{LookupOutcome, LookupProgress};
use crate::config::FamilySettings;
use crate::errors::FamilyError;
use crate::freshness::CacheState;
use crate::metrics;
use crate::summary::SummaryEngine;

type ResolveOutcome = Result<Arc<FamilyCacheEntry>, FamilyError>;
type SharedResolve = Shared<BoxFuture<'static, ResolveOutcome>>;

#[derive(Clone, Debug, Default)]
pub struct FamilyQuery {
    pub family_common: String,
    /// The asking species, removed from its own match list.
    pub scientific_name: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct FamilyRead {
    pub state: CacheState,
    pub payload: FamilyMatchPayload,
    pub remaining: Duration,
}

#[derive(Clone, Debug, Serialize)]
pub struct FamilyStatus {
    pub entries: usize,
    pub partial_entries: usize,
    pub memoized_species: usize,
    pub resolving: usize,
    pub cooldown_remaining_secs: Option<u64>,
}

pub struct FamilyResolver {
    upstream: Arc<dyn DetectionApi>,
    summary: Arc<SummaryEngine>,
    store: SnapshotFile<FamilyCacheFile>,
    settings: FamilySettings,
    memo: DashMap<String, SpeciesFamilyInfo>,
    entries: DashMap<String, Arc<FamilyCacheEntry>>,
    inflight: Mutex<HashMap<String, SharedResolve>>,
    cooldown_until: Mutex<Option<Instant>>,
    persist_lock: AsyncMutex<()>,
}

impl FamilyResolver {
    pub fn new(
        upstream: Arc<dyn DetectionApi>,
        summary: Arc<SummaryEngine>,
        store: SnapshotFile<FamilyCacheFile>,
        settings: FamilySettings,
    ) -> Self {
        Self {
            upstream,
            summary,
            store,
            settings,
            memo: DashMap::new(),
            entries: DashMap::new(),
            inflight: Mutex::new(HashMap::new()),
            cooldown_until: Mutex::new(None),
            persist_lock: AsyncMutex::new(()),
        }
    }

    /// Restores persisted entries within the retention window. Those past
    /// their TTL are served stale until re-resolved.
    pub async fn bootstrap(&self) -> usize {
        let Some(file) = self.store.load().await else {
            return 0;
        };
        let now = Utc::now();
        let retention = self.settings.retention();
        let mut dropped = 0usize;
        for (key, entry) in file.entries {
            if age_of(entry.generated_at, now) >= retention {
                dropped += 1;
                continue;
            }
            self.entries.entry(key).or_insert_with(|| Arc::new(entry));
        }
        dropped += self.prune(now);
        debug!(entries = self.entries.len(), dropped, "family cache loaded from disk");
        self.entries.len()
    }

    pub async fn matches(
        self: &Arc<Self>,
        query: FamilyQuery,
    ) -> Result<FamilyRead, FamilyError> {
        let limit = self.settings.clamp_limit(query.limit);
        let label = query.family_common.trim().to_string();
        let tokens = tokenize_family(&label);
        if tokens.is_empty() {
            return Ok(FamilyRead {
                state: CacheState::Fresh,
                payload: FamilyMatchPayload {
                    family_common: label,
                    matches: Vec::new(),
                    complete: true,
                },
                remaining: self.settings.family_ttl(),
            });
        }

        let key = family_cache_key(&tokens);
        let exclude = query.scientific_name.as_deref();
        let now = Utc::now();
        let cached = self.entries.get(&key).map(|entry| Arc::clone(entry.value()));
        if let Some(entry) = cached {
            if entry.is_fresh(now, self.settings.family_ttl(), self.settings.partial_ttl()) {
                metrics::record_cache_event("family", "fresh");
                return Ok(FamilyRead {
                    state: CacheState::Fresh,
                    payload: entry.view_for(exclude, limit),
                    remaining: self.remaining(&entry, now),
                });
            }
            metrics::record_cache_event("family", "stale");
            if let Some(summary) = self.summary.read().snapshot {
                let _ = self.resolve_shared(key, tokens, label, summary);
            }
            return Ok(FamilyRead {
                state: CacheState::Stale,
                payload: entry.view_for(exclude, limit),
                remaining: Duration::ZERO,
            });
        }

        let Some(summary) = self.summary.read().snapshot else {
            metrics::record_cache_event("family", "warming");
            return Err(FamilyError::NotReady);
        };
        metrics::record_cache_event("family", "miss");
        let entry = self.resolve_shared(key, tokens, label, summary).await?;
        Ok(FamilyRead {
            state: CacheState::Fresh,
            payload: entry.view_for(exclude, limit),
            remaining: self.remaining(&entry, Utc::now()),
        })
    }

    pub fn status(&self) -> FamilyStatus {
        FamilyStatus {
            entries: self.entries.len(),
            partial_entries: self
                .entries
                .iter()
                .filter(|entry| !entry.value().payload.complete)
                .count(),
            memoized_species: self.memo.len(),
            resolving: self.inflight.lock().len(),
            cooldown_remaining_secs: self
                .cooldown_remaining(Instant::now())
                .map(|left| left.as_secs()),
        }
    }

    fn remaining(&self, entry: &FamilyCacheEntry, now: DateTime<Utc>) -> Duration {
        let ttl = if entry.payload.complete {
            self.settings.family_ttl()
        } else {
            self.settings.partial_ttl()
        };
        ttl.saturating_sub(age_of(entry.generated_at, now))
    }

    /// One resolution per cache key; later callers join the running one.
    fn resolve_shared(
        self: &Arc<Self>,
        key: String,
        tokens: Vec<String>,
        label: String,
        summary: Arc<SummarySnapshot>,
    ) -> SharedResolve {
        let mut inflight = self.inflight.lock();
        if let Some(existing) = inflight.get(&key) {
            return existing.clone();
        }

        let resolver = Arc::clone(self);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let entry = Arc::new(resolver.resolve(&task_key, &tokens, &label, &summary).await);
            resolver
                .entries
                .insert(task_key.clone(), Arc::clone(&entry));
            resolver.inflight.lock().remove(&task_key);
            resolver.persist().await;
            Ok::<_, FamilyError>(entry)
        });
        let shared = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(err) => Err(FamilyError::Aborted(err.to_string())),
            }
        }
        .boxed()
        .shared();
        inflight.insert(key, shared.clone());
        shared
    }

    async fn resolve(
        &self,
        key: &str,
        tokens: &[String],
        label: &str,
        summary: &SummarySnapshot,
    ) -> FamilyCacheEntry {
        let build_limit = self.settings.max_limit + 1;
        let candidates: Vec<&ArchiveGroup> = summary
            .archive
            .groups
            .iter()
            .take(self.settings.candidate_limit)
            .collect();
        let now = Utc::now();
        let mut known: Vec<Option<Vec<String>>> = candidates
            .iter()
            .map(|candidate| self.memoized_tokens(&candidate.scientific_name, now))
            .collect();
        let misses: Vec<usize> = known
            .iter()
            .enumerate()
            .filter(|(_, tokens)| tokens.is_none())
            .map(|(index, _)| index)
            .collect();

        let mut progress = LookupProgress::default();
        if count_matches(&known, tokens) < build_limit && !misses.is_empty() {
            let budget = self.settings.lookup_budget.min(misses.len());
            let (within, beyond) = misses.split_at(budget);
            progress.over_budget = !beyond.is_empty();

            for batch in within.chunks(self.settings.lookup_concurrency.max(1)) {
                if count_matches(&known, tokens) >= build_limit {
                    break;
                }
                if self.cooldown_remaining(Instant::now()).is_some() {
                    progress.cooldown_skip = true;
                    break;
                }
                let outcomes = join_all(
                    batch
                        .iter()
                        .map(|&index| self.lookup(&candidates[index].scientific_name)),
                )
                .await;
                for (&index, outcome) in batch.iter().zip(outcomes) {
                    progress.record(&outcome);
                    if let LookupOutcome::Tokens(resolved) = outcome {
                        known[index] = Some(resolved);
                    }
                }
                if progress.rate_limited {
                    self.start_cooldown();
                    break;
                }
            }
        }

        let matches: Vec<FamilyMatch> = candidates
            .iter()
            .zip(&known)
            .filter(|(_, resolved)| {
                resolved
                    .as_deref()
                    .is_some_and(|resolved| has_family_intersection(resolved, tokens))
            })
            .take(build_limit)
            .map(|(candidate, _)| FamilyMatch {
                scientific_name: candidate.scientific_name.clone(),
                common_name: candidate.common_name.clone(),
            })
            .collect();
        let limit_reached = matches.len() >= build_limit;
        let complete = progress.is_complete(limit_reached);

        info!(
            family = key,
            candidates = candidates.len(),
            matches = matches.len(),
            lookups = progress.lookups,
            rate_limited = progress.rate_limited,
            cooldown_skip = progress.cooldown_skip,
            over_budget = progress.over_budget,
            complete,
            "family matches resolved"
        );

        FamilyCacheEntry {
            cache_key: key.to_string(),
            generated_at: Utc::now(),
            payload: FamilyMatchPayload {
                family_common: label.to_string(),
                matches,
                complete,
            },
        }
    }

    fn memoized_tokens(&self, scientific_name: &str, now: DateTime<Utc>) -> Option<Vec<String>> {
        let memo_key = memo_key(scientific_name);
        if memo_key.is_empty() {
            return Some(Vec::new());
        }
        self.memo
            .get(&memo_key)
            .filter(|info| info.is_fresh(now, self.settings.species_ttl()))
            .map(|info| info.family_tokens.clone())
    }

    async fn lookup(&self, scientific_name: &str) -> LookupOutcome {
        let outcome = match self.upstream.lookup_species(scientific_name).await {
            Ok(SpeciesLookup::Found { family_common }) => {
                metrics::record_family_lookup("found");
                let tokens = family_common
                    .as_deref()
                    .map(tokenize_family)
                    .unwrap_or_default();
                LookupOutcome::Tokens(tokens)
            }
            Ok(SpeciesLookup::NotFound) => {
                metrics::record_family_lookup("not_found");
                LookupOutcome::Tokens(Vec::new())
            }
            Err(UpstreamError::RateLimited) => {
                metrics::record_family_lookup("rate_limited");
                return LookupOutcome::RateLimited;
            }
            Err(err) => {
                metrics::record_family_lookup(err.label());
                warn!(%err, scientific_name, "species lookup failed");
                return LookupOutcome::Failed;
            }
        };
        if let LookupOutcome::Tokens(tokens) = &outcome {
            self.memo.insert(
                memo_key(scientific_name),
                SpeciesFamilyInfo::new(tokens.clone(), Utc::now()),
            );
        }
        outcome
    }

    fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        let until = (*self.cooldown_until.lock())?;
        until.checked_duration_since(now).filter(|left| !left.is_zero())
    }

    fn start_cooldown(&self) {
        let until = Instant::now() + self.settings.cooldown();
        *self.cooldown_until.lock() = Some(until);
        warn!(
            cooldown_secs = self.settings.cooldown().as_secs(),
            "species endpoint rate limited; pausing lookups"
        );
    }

    /// Drops entries past retention, then the oldest beyond `max_entries`.
    fn prune(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let retention = self.settings.retention();
        self.entries.retain(|_, entry| age_of(entry.generated_at, now) < retention);

        let overflow = self.entries.len().saturating_sub(self.settings.max_entries);
        if overflow > 0 {
            let mut by_age: Vec<(DateTime<Utc>, String)> = self
                .entries
                .iter()
                .map(|entry| (entry.value().generated_at, entry.key().clone()))
                .collect();
            by_age.sort();
            for (_, key) in by_age.into_iter().take(overflow) {
                self.entries.remove(&key);
            }
        }

        let evicted = before.saturating_sub(self.entries.len());
        if evicted > 0 {
            metrics::record_cache_event("family", "evicted");
            debug!(evicted, remaining = self.entries.len(), "family cache pruned");
        }
        evicted
    }

    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        self.prune(Utc::now());
        let entries: BTreeMap<String, FamilyCacheEntry> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().as_ref().clone()))
            .collect();
        let file = FamilyCacheFile {
            generated_at: Utc::now(),
            entries,
        };
        if let Err(err) = self.store.save(&file).await {
            warn!(%err, path = %self.store.path().display(), "failed to persist family cache");
            metrics::record_cache_event("family", "persist_failed");
        }
    }
}

fn memo_key(scientific_name: &str) -> String {
    scientific_name.trim().to_lowercase()
}

fn count_matches(known: &[Option<Vec<String>>], target: &[String]) -> usize {
    known
        .iter()
        .flatten()
        .filter(|tokens| has_family_intersection(tokens, target))
        .count()
}
