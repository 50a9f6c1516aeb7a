//! Proxy configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional file,
//! then `BIRDBOARD_*` environment variables (`__` separates nested keys, e.g.
//! `BIRDBOARD_SUMMARY__TTL_SECS=600`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "BIRDBOARD";

pub const DEFAULT_BIND: &str = "127.0.0.1:8790";
pub const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8080/api/v2/";
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 12_000;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_SUMMARY_FILE: &str = "summary-30d.json";
pub const DEFAULT_RECENT_FILE: &str = "recent-detections.json";
pub const DEFAULT_FAMILY_FILE: &str = "family-matches.json";

pub const DEFAULT_SUMMARY_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_WINDOW_DAYS: u32 = 30;
pub const DEFAULT_PAGE_SIZE: usize = 500;
pub const DEFAULT_PAGE_CONCURRENCY: usize = 4;
pub const DEFAULT_MAX_PAGES: usize = 5_000;
pub const DEFAULT_TOP_SPECIES: usize = 10;
pub const DEFAULT_SUMMARY_CHECK_SECS: u64 = 5 * 60;

pub const DEFAULT_RECENT_CAP: usize = 2_000;
pub const DEFAULT_RECENT_REFRESH_SECS: u64 = 15 * 60;
pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const DEFAULT_DETECTIONS_LIMIT: usize = 100;
pub const MAX_DETECTIONS_LIMIT: usize = 1_000;

pub const DEFAULT_FAMILY_LIMIT: usize = 12;
pub const MAX_FAMILY_LIMIT: usize = 50;
pub const DEFAULT_CANDIDATE_LIMIT: usize = 120;
pub const DEFAULT_LOOKUP_BUDGET: usize = 50;
pub const DEFAULT_LOOKUP_CONCURRENCY: usize = 2;
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;
pub const DEFAULT_FAMILY_TTL_SECS: u64 = 6 * 60 * 60;
pub const DEFAULT_PARTIAL_TTL_SECS: u64 = 2 * 60;
pub const DEFAULT_SPECIES_TTL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_FAMILY_RETENTION_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_FAMILY_MAX_ENTRIES: usize = 256;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub server: ServerSettings,
    pub upstream: UpstreamSettings,
    pub storage: StorageSettings,
    pub summary: SummarySettings,
    pub recent: RecentSettings,
    pub family: FamilySettings,
    pub log: LogSettings,
}

impl ProxySettings {
    /// Defaults, then `path` (if given), then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&ProxySettings::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings: ProxySettings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings.normalized())
    }

    /// Replaces nonsensical zero values with their defaults.
    pub fn normalized(mut self) -> Self {
        fn nonzero(value: usize, default: usize) -> usize {
            if value == 0 {
                default
            } else {
                value
            }
        }
        self.summary.page_size = nonzero(self.summary.page_size, DEFAULT_PAGE_SIZE);
        self.summary.concurrency = nonzero(self.summary.concurrency, DEFAULT_PAGE_CONCURRENCY);
        self.summary.max_pages = nonzero(self.summary.max_pages, DEFAULT_MAX_PAGES);
        self.summary.top_species = nonzero(self.summary.top_species, DEFAULT_TOP_SPECIES);
        if self.summary.window_days == 0 {
            self.summary.window_days = DEFAULT_WINDOW_DAYS;
        }
        self.recent.cap = nonzero(self.recent.cap, DEFAULT_RECENT_CAP);
        self.family.max_limit =
            nonzero(self.family.max_limit, MAX_FAMILY_LIMIT).min(MAX_FAMILY_LIMIT);
        self.family.default_limit = nonzero(self.family.default_limit, DEFAULT_FAMILY_LIMIT)
            .min(self.family.max_limit);
        self.family.lookup_concurrency =
            nonzero(self.family.lookup_concurrency, DEFAULT_LOOKUP_CONCURRENCY);
        self.family.max_entries = nonzero(self.family.max_entries, DEFAULT_FAMILY_MAX_ENTRIES);
        self.family.retention_secs = self.family.retention_secs.max(self.family.family_ttl_secs);
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTREAM_URL.to_string(),
            timeout_ms: DEFAULT_UPSTREAM_TIMEOUT_MS,
        }
    }
}

impl UpstreamSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: PathBuf,
    pub summary_file: String,
    pub recent_file: String,
    pub family_file: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            summary_file: DEFAULT_SUMMARY_FILE.to_string(),
            recent_file: DEFAULT_RECENT_FILE.to_string(),
            family_file: DEFAULT_FAMILY_FILE.to_string(),
        }
    }
}

impl StorageSettings {
    pub fn summary_path(&self) -> PathBuf {
        self.data_dir.join(&self.summary_file)
    }

    pub fn recent_path(&self) -> PathBuf {
        self.data_dir.join(&self.recent_file)
    }

    pub fn family_path(&self) -> PathBuf {
        self.data_dir.join(&self.family_file)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarySettings {
    pub ttl_secs: u64,
    pub window_days: u32,
    pub page_size: usize,
    pub concurrency: usize,
    pub max_pages: usize,
    pub top_species: usize,
    /// How often the background ticker checks whether a rebuild is due.
    pub check_interval_secs: u64,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SUMMARY_TTL_SECS,
            window_days: DEFAULT_WINDOW_DAYS,
            page_size: DEFAULT_PAGE_SIZE,
            concurrency: DEFAULT_PAGE_CONCURRENCY,
            max_pages: DEFAULT_MAX_PAGES,
            top_species: DEFAULT_TOP_SPECIES,
            check_interval_secs: DEFAULT_SUMMARY_CHECK_SECS,
        }
    }
}

impl SummarySettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecentSettings {
    pub cap: usize,
    pub refresh_interval_secs: u64,
    pub default_limit: usize,
}

impl Default for RecentSettings {
    fn default() -> Self {
        Self {
            cap: DEFAULT_RECENT_CAP,
            refresh_interval_secs: DEFAULT_RECENT_REFRESH_SECS,
            default_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

impl RecentSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilySettings {
    pub default_limit: usize,
    pub max_limit: usize,
    pub candidate_limit: usize,
    pub lookup_budget: usize,
    pub lookup_concurrency: usize,
    pub cooldown_secs: u64,
    pub family_ttl_secs: u64,
    pub partial_ttl_secs: u64,
    pub species_ttl_secs: u64,
    /// Entries older than this are dropped rather than served stale.
    pub retention_secs: u64,
    pub max_entries: usize,
}

impl Default for FamilySettings {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_FAMILY_LIMIT,
            max_limit: MAX_FAMILY_LIMIT,
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
            lookup_budget: DEFAULT_LOOKUP_BUDGET,
            lookup_concurrency: DEFAULT_LOOKUP_CONCURRENCY,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            family_ttl_secs: DEFAULT_FAMILY_TTL_SECS,
            partial_ttl_secs: DEFAULT_PARTIAL_TTL_SECS,
            species_ttl_secs: DEFAULT_SPECIES_TTL_SECS,
            retention_secs: DEFAULT_FAMILY_RETENTION_SECS,
            max_entries: DEFAULT_FAMILY_MAX_ENTRIES,
        }
    }
}

impl FamilySettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn family_ttl(&self) -> Duration {
        Duration::from_secs(self.family_ttl_secs)
    }

    pub fn partial_ttl(&self) -> Duration {
        Duration::from_secs(self.partial_ttl_secs)
    }

    pub fn species_ttl(&self) -> Duration {
        Duration::from_secs(self.species_ttl_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Clamps a requested match count to `1..=max_limit`.
    pub fn clamp_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
