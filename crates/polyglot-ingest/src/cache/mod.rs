//! Persistent temporal cache.
//!
//! Results are cached per relay set and time window in three namespaces:
//!
//! | namespace        | payload                        | key                                      | ttl |
//! |------------------|--------------------------------|------------------------------------------|-----|
//! | `language_index` | per-user language scores       | `langIndex:<relays>:<since>:<until>`     | 30d |
//! | `records`        | raw records (with language)    | same as the language index entry         | 30d |
//! | `metrics`        | series for every language      | `metrics:<relays>:<since>:<until>:<win>` | 7d  |
//!
//! Every payload carries a `_meta` object with the relay set and window it
//! was computed for. Lookups match the relay set exactly and then look for
//! an entry that covers the requested window, or failing that one that
//! overlaps it, so only the uncovered gaps need fetching.

mod clock;
pub mod key;
mod range;
mod schema;
mod store;

use std::sync::Arc;

use metrics::counter;
use polyglot_core::{MetricSeries, Record, UserLanguageScores};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use clock::{Clock, FixedClock, SystemClock};
pub use range::TimeRange;
pub use store::{CacheConfig, CacheStore, Namespace, StoredEntry};

use crate::Result;

/// Window and relay set a payload was computed for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub relays: Vec<String>,
    pub since: u64,
    pub until: u64,
    #[serde(rename = "windowDays", default, skip_serializing_if = "Option::is_none")]
    pub window_days: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct LanguageIndexPayload {
    #[serde(rename = "userLanguages")]
    user_languages: UserLanguageScores,
    #[serde(rename = "_meta", default)]
    meta: Option<EntryMeta>,
}

#[derive(Serialize, Deserialize)]
struct RecordsPayload {
    events: Vec<Record>,
    #[serde(rename = "_meta", default)]
    meta: Option<EntryMeta>,
}

#[derive(Serialize, Deserialize)]
struct MetricsPayload {
    series: MetricSeries,
    #[serde(rename = "_meta", default)]
    meta: Option<EntryMeta>,
}

/// A live language index entry for a relay set.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedIndex {
    pub key: String,
    pub relays: Vec<String>,
    pub range: TimeRange,
    pub scores: UserLanguageScores,
    /// Write time, unix milliseconds.
    pub generated_at: i64,
}

/// What the cache can contribute to a request.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// An entry covers the whole requested window.
    FullHit(CachedIndex),
    /// An entry overlaps the window; `gaps` still need fetching.
    Partial {
        base: CachedIndex,
        gaps: Vec<TimeRange>,
    },
    Miss,
}

/// Choose how to serve `requested` from `candidates`.
///
/// The first covering entry wins. Without one, the first overlapping entry
/// becomes the base of a partial hit.
pub fn plan_lookup(candidates: &[CachedIndex], requested: TimeRange) -> CacheLookup {
    if let Some(hit) = candidates.iter().find(|c| c.range.covers(&requested)) {
        return CacheLookup::FullHit(hit.clone());
    }
    if let Some(base) = candidates.iter().find(|c| c.range.overlaps(&requested)) {
        return CacheLookup::Partial {
            gaps: base.range.gaps(&requested),
            base: base.clone(),
        };
    }
    CacheLookup::Miss
}

/// Typed access to the three namespaces.
pub struct TemporalCache {
    store: CacheStore,
    config: CacheConfig,
}

impl TemporalCache {
    /// Open the cache at `config.path` on the system clock.
    pub fn open(config: CacheConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = CacheStore::open(&config.path, clock)?;
        Ok(Self { store, config })
    }

    /// In-memory cache with default TTLs (for testing).
    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            store: CacheStore::open_in_memory(clock)?,
            config: CacheConfig::default(),
        })
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Live language index entries whose relay set equals `relays` as a set.
    ///
    /// Entries without readable metadata, or with a zero bound, are skipped
    /// and counted as corrupt.
    pub fn find_by_relays<S: AsRef<str>>(&self, relays: &[S]) -> Result<Vec<CachedIndex>> {
        let wanted = key::sorted_relays(relays);
        let mut matches = Vec::new();

        for entry in self.store.scan(Namespace::LanguageIndex)? {
            let payload: LanguageIndexPayload = match serde_json::from_str(&entry.data) {
                Ok(payload) => payload,
                Err(e) => {
                    skip_corrupt(&entry.key, &e.to_string());
                    continue;
                }
            };
            let Some(meta) = payload.meta else {
                skip_corrupt(&entry.key, "missing _meta");
                continue;
            };
            if meta.since == 0 || meta.until == 0 {
                skip_corrupt(&entry.key, "zero window bound");
                continue;
            }
            if key::sorted_relays(meta.relays.as_slice()) != wanted {
                continue;
            }
            matches.push(CachedIndex {
                key: entry.key,
                relays: wanted.clone(),
                range: TimeRange::new(meta.since, meta.until),
                scores: payload.user_languages,
                generated_at: entry.generated_at,
            });
        }

        debug!(relays = wanted.len(), entries = matches.len(), "language index scan");
        Ok(matches)
    }

    /// Find candidates for `relays` and plan how to serve `requested`.
    pub fn lookup<S: AsRef<str>>(&self, relays: &[S], requested: TimeRange) -> Result<CacheLookup> {
        let candidates = self.find_by_relays(relays)?;
        Ok(plan_lookup(&candidates, requested))
    }

    /// Store language scores. Returns the entry key.
    pub fn save_language_index<S: AsRef<str>>(
        &self,
        relays: &[S],
        range: TimeRange,
        scores: &UserLanguageScores,
    ) -> Result<String> {
        let key = key::language_index_key(relays, range.since, range.until);
        let payload = LanguageIndexPayload {
            user_languages: scores.clone(),
            meta: Some(meta_for(relays, range, None)),
        };
        self.put_json(Namespace::LanguageIndex, &key, &payload)?;
        Ok(key)
    }

    /// Store the records behind a language index entry, under its key.
    pub fn save_records<S: AsRef<str>>(
        &self,
        key: &str,
        relays: &[S],
        range: TimeRange,
        records: &[Record],
    ) -> Result<()> {
        let payload = RecordsPayload {
            events: records.to_vec(),
            meta: Some(meta_for(relays, range, None)),
        };
        self.put_json(Namespace::Records, key, &payload)
    }

    /// Records stored under a language index key, if still present and readable.
    pub fn load_records(&self, key: &str) -> Result<Option<Vec<Record>>> {
        Ok(self
            .get_json::<RecordsPayload>(Namespace::Records, key)?
            .map(|payload| payload.events))
    }

    pub fn get_metrics<S: AsRef<str>>(
        &self,
        relays: &[S],
        range: TimeRange,
        window_days: u32,
    ) -> Result<Option<MetricSeries>> {
        let key = key::metrics_key(relays, range.since, range.until, window_days);
        Ok(self
            .get_json::<MetricsPayload>(Namespace::Metrics, &key)?
            .map(|payload| payload.series))
    }

    pub fn save_metrics<S: AsRef<str>>(
        &self,
        relays: &[S],
        range: TimeRange,
        window_days: u32,
        series: &MetricSeries,
    ) -> Result<()> {
        let key = key::metrics_key(relays, range.since, range.until, window_days);
        let payload = MetricsPayload {
            series: series.clone(),
            meta: Some(meta_for(relays, range, Some(window_days))),
        };
        self.put_json(Namespace::Metrics, &key, &payload)
    }

    /// Empty every namespace.
    pub fn clear_all(&self) -> Result<usize> {
        self.store.clear_all()
    }

    fn put_json<T: Serialize>(&self, namespace: Namespace, key: &str, payload: &T) -> Result<()> {
        let data = serde_json::to_string(payload)?;
        self.store
            .put(namespace, key, &data, self.config.ttl_ms(namespace))
    }

    fn get_json<T: DeserializeOwned>(&self, namespace: Namespace, key: &str) -> Result<Option<T>> {
        let Some(entry) = self.store.get(namespace, key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&entry.data) {
            Ok(payload) => Ok(Some(payload)),
            Err(e) => {
                skip_corrupt(key, &e.to_string());
                Ok(None)
            }
        }
    }
}

fn meta_for<S: AsRef<str>>(relays: &[S], range: TimeRange, window_days: Option<u32>) -> EntryMeta {
    EntryMeta {
        relays: key::sorted_relays(relays),
        since: range.since,
        until: range.until,
        window_days,
    }
}

fn skip_corrupt(key: &str, reason: &str) {
    counter!("cache_corrupt_total").increment(1);
    warn!(key, reason, "skipping unreadable cache entry");
}
