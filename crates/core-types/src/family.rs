use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::age_of;

/// Canonical, order-independent token set for a family label.
///
/// Lowercases, strips diacritics, then splits on `,` `/` `;` `&` and the
/// conjunctions "and"/"und". The result is sorted and deduplicated, so
/// `"Eisvögel, eisvogel"` and `"eisvogel"` produce the same tokens.
pub fn tokenize_family(label: &str) -> Vec<String> {
    let folded = fold_diacritics(&label.to_lowercase());
    let mut tokens = BTreeSet::new();
    for piece in folded.split(|ch| matches!(ch, ',' | '/' | ';' | '&')) {
        let mut words: Vec<&str> = Vec::new();
        for word in piece.split_whitespace() {
            if word == "and" || word == "und" {
                push_token(&mut tokens, &words);
                words.clear();
            } else {
                words.push(word);
            }
        }
        push_token(&mut tokens, &words);
    }
    tokens.into_iter().collect()
}

fn push_token(tokens: &mut BTreeSet<String>, words: &[&str]) {
    let joined = words.join(" ");
    let trimmed = joined.trim_matches(|ch: char| !ch.is_alphanumeric());
    if !trimmed.is_empty() {
        tokens.insert(trimmed.to_string());
    }
}

fn fold_diacritics(value: &str) -> String {
    value
        .nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .collect()
}

/// Cache key for a tokenized family label.
pub fn family_cache_key(tokens: &[String]) -> String {
    tokens.join("|")
}

pub fn has_family_intersection(left: &[String], right: &[String]) -> bool {
    if left.is_empty() || right.is_empty() {
        return false;
    }
    left.iter().any(|token| right.contains(token))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyMatch {
    pub scientific_name: String,
    pub common_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyMatchPayload {
    pub family_common: String,
    pub matches: Vec<FamilyMatch>,
    pub complete: bool,
}

/// One resolved family, shared by every species that asks about it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyCacheEntry {
    pub cache_key: String,
    pub generated_at: DateTime<Utc>,
    pub payload: FamilyMatchPayload,
}

impl FamilyCacheEntry {
    /// Partial entries expire after `partial_ttl` so they get retried soon.
    pub fn is_fresh(&self, now: DateTime<Utc>, complete_ttl: Duration, partial_ttl: Duration) -> bool {
        let ttl = if self.payload.complete {
            complete_ttl
        } else {
            partial_ttl
        };
        age_of(self.generated_at, now) < ttl
    }

    /// The caller's view: its own species removed, truncated to `limit`.
    pub fn view_for(&self, exclude_scientific: Option<&str>, limit: usize) -> FamilyMatchPayload {
        let exclude = exclude_scientific
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let matches = self
            .payload
            .matches
            .iter()
            .filter(|candidate| match exclude {
                Some(name) => !candidate.scientific_name.eq_ignore_ascii_case(name),
                None => true,
            })
            .take(limit)
            .cloned()
            .collect();
        FamilyMatchPayload {
            family_common: self.payload.family_common.clone(),
            matches,
            complete: self.payload.complete,
        }
    }
}

/// Memoized family tokens for one scientific name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesFamilyInfo {
    pub family_tokens: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl SpeciesFamilyInfo {
    pub fn new(family_tokens: Vec<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            family_tokens,
            updated_at,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        age_of(self.updated_at, now) < ttl
    }
}

/// On-disk form of the family cache.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FamilyCacheFile {
    pub generated_at: DateTime<Utc>,
    pub entries: BTreeMap<String, FamilyCacheEntry>,
}
