//! Cache-aware analysis runs.
//!
//! ```text
//! validate ─► normalize relays ─► cache lookup
//!                                   │
//!          ┌────────────────────────┼──────────────────────────┐
//!          ▼                        ▼                          ▼
//!      full hit               partial hit                    miss
//!   (cached scores +     fetch + classify each gap,    fetch + classify
//!    cached records)     merge into the cached base     the whole window
//!          │                        └───────────┬──────────────┘
//!          │                                    ▼
//!          │            persist index + records (only if a relay answered)
//!          └──────────────┬─────────────────────┘
//!                         ▼
//!        assign languages ─► metrics per window (cached superset,
//!                            filtered to requested languages)
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use metrics::{counter, gauge};
use polyglot_core::{
    MetricKind, MetricSeries, Record, UserLanguageScores, filter_languages,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{CacheLookup, TemporalCache, TimeRange, plan_lookup};
use crate::engine::{AnalysisEngine, LanguageIndex};
use crate::fetch::{ChunkedFetcher, FetchConfig, FetchStatus, ProgressCallback, RelayProgress};
use crate::relay::{DEFAULT_LIMIT, NormalizeOptions, RelayTransport, normalize_relay_set};
use crate::{Error, Result};

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Record kinds requested from relays.
    pub kinds: Vec<u32>,
    pub chunk_size_days: u32,
    /// Minimum classifier confidence for a language to count.
    pub confidence_threshold: f32,
    pub max_langs_per_user: u8,
    pub normalize: NormalizeOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            kinds: vec![1, 42],
            chunk_size_days: 1,
            confidence_threshold: 0.5,
            max_langs_per_user: 5,
            normalize: NormalizeOptions::default(),
        }
    }
}

/// One analysis request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub relays: Vec<String>,
    pub languages: Vec<String>,
    pub since: u64,
    pub until: u64,
    pub metrics: Vec<MetricKind>,
}

impl AnalysisRequest {
    /// Reject requests that can't produce a result.
    pub fn validate(&self) -> Result<()> {
        if self.relays.is_empty() {
            return Err(Error::Config("at least one relay is required".to_string()));
        }
        if self.languages.is_empty() {
            return Err(Error::Config("at least one language is required".to_string()));
        }
        if self.metrics.is_empty() {
            return Err(Error::Config("at least one metric is required".to_string()));
        }
        // Cached windows need non-zero bounds to be found again.
        if self.since == 0 {
            return Err(Error::Config("since must be after the unix epoch".to_string()));
        }
        if self.since > self.until {
            return Err(Error::Config(format!(
                "since ({}) is after until ({})",
                self.since, self.until
            )));
        }
        Ok(())
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.since, self.until)
    }
}

/// How the cache contributed to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheOutcome {
    FullHit { key: String },
    PartialHit { base_key: String, gaps: Vec<TimeRange> },
    Miss,
}

/// Coarse run stage, reported to the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    CheckingCache,
    Fetching(TimeRange),
    Classifying,
    ComputingMetrics(MetricKind),
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Stage(Stage),
    Relay(RelayProgress),
}

/// Receives stage changes and per-relay fetch progress.
pub type Observer = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub relays: Vec<String>,
    pub since: u64,
    pub until: u64,
    pub records_count: usize,
    pub users: usize,
    /// Authors per language, across all languages found.
    pub language_summary: BTreeMap<String, u32>,
    /// Requested metrics, restricted to the requested languages.
    pub series: BTreeMap<MetricKind, MetricSeries>,
    pub cache: CacheOutcome,
    /// Per-relay fetch summary; empty when nothing was fetched.
    pub fetch: Vec<RelayProgress>,
    /// Whether this run's results were written to the cache.
    pub persisted: bool,
    #[serde(skip)]
    pub records: Vec<Record>,
}

/// Scores and records for the requested window, before persistence.
struct Resolved {
    scores: UserLanguageScores,
    records: Vec<Record>,
    outcome: CacheOutcome,
    fetch: Vec<RelayProgress>,
    /// Every fetched range had at least one relay finish without error.
    complete: bool,
}

/// Runs analysis requests against relays, the cache and an engine.
pub struct Orchestrator<T: RelayTransport, E: AnalysisEngine> {
    fetcher: ChunkedFetcher<T>,
    cache: Arc<TemporalCache>,
    engine: E,
    config: OrchestratorConfig,
}

impl<T: RelayTransport, E: AnalysisEngine> Orchestrator<T, E> {
    pub fn new(
        transport: Arc<T>,
        cache: Arc<TemporalCache>,
        engine: E,
        config: OrchestratorConfig,
    ) -> Self {
        let fetcher = ChunkedFetcher::new(
            transport,
            FetchConfig {
                chunk_size_days: config.chunk_size_days,
                limit: DEFAULT_LIMIT,
                kinds: Some(config.kinds.clone()),
            },
        );
        Self {
            fetcher,
            cache,
            engine,
            config,
        }
    }

    pub fn cache(&self) -> &TemporalCache {
        &self.cache
    }

    /// Run one request. Invalid requests fail before any network or
    /// storage access.
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        observer: Option<Observer>,
    ) -> Result<AnalysisReport> {
        request.validate()?;
        let relays = normalize_relay_set(&request.relays, &self.config.normalize)?;
        let requested = request.range();

        emit(&observer, Stage::CheckingCache);
        let Resolved {
            scores,
            mut records,
            outcome,
            fetch,
            complete,
        } = self.resolve(&relays, requested, &observer).await?;

        records.retain(|r| r.created_at >= requested.since && r.created_at <= requested.until);
        assign_languages(&mut records, &scores);

        let fetched = !matches!(outcome, CacheOutcome::FullHit { .. });
        if fetched && complete {
            let key = self.cache.save_language_index(&relays, requested, &scores)?;
            self.cache.save_records(&key, &relays, requested, &records)?;
            debug!(key = %key, records = records.len(), users = scores.len(), "cached language index");
        } else if !complete {
            warn!(
                since = requested.since,
                until = requested.until,
                "every relay failed for a fetched range, results not cached"
            );
        }

        let kinds: BTreeSet<MetricKind> = request.metrics.iter().copied().collect();
        let mut series = BTreeMap::new();
        for kind in kinds {
            emit(&observer, Stage::ComputingMetrics(kind));
            let all = self.metric_series(&relays, requested, kind, &records, &scores, complete)?;
            series.insert(kind, filter_languages(&all, &request.languages));
        }

        counter!("analysis_runs_total").increment(1);
        gauge!("analysis_records").set(records.len() as f64);
        info!(
            relays = relays.len(),
            since = requested.since,
            until = requested.until,
            records = records.len(),
            users = scores.len(),
            cache = ?outcome,
            "analysis complete"
        );
        emit(&observer, Stage::Done);

        Ok(AnalysisReport {
            since: requested.since,
            until: requested.until,
            records_count: records.len(),
            users: scores.len(),
            language_summary: scores.authors_per_language(),
            series,
            cache: outcome,
            fetch,
            persisted: fetched && complete,
            relays,
            records,
        })
    }

    /// Produce scores and records for `requested` from the cache and relays.
    ///
    /// A cached index whose records are gone is dropped from consideration
    /// and the lookup is re-planned without it.
    async fn resolve(
        &self,
        relays: &[String],
        requested: TimeRange,
        observer: &Option<Observer>,
    ) -> Result<Resolved> {
        let mut candidates = self.cache.find_by_relays(relays)?;

        loop {
            match plan_lookup(&candidates, requested) {
                CacheLookup::FullHit(hit) => {
                    let Some(records) = self.cache.load_records(&hit.key)? else {
                        warn!(key = %hit.key, "cached index has no records, ignoring it");
                        candidates.retain(|c| c.key != hit.key);
                        continue;
                    };
                    info!(key = %hit.key, "serving from cache");
                    return Ok(Resolved {
                        scores: hit.scores,
                        records,
                        outcome: CacheOutcome::FullHit { key: hit.key },
                        fetch: Vec::new(),
                        complete: true,
                    });
                }
                CacheLookup::Partial { base, gaps } => {
                    let Some(mut records) = self.cache.load_records(&base.key)? else {
                        warn!(key = %base.key, "cached index has no records, ignoring it");
                        candidates.retain(|c| c.key != base.key);
                        continue;
                    };
                    info!(key = %base.key, gaps = gaps.len(), "partial cache hit");

                    let mut scores = base.scores;
                    let mut seen: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
                    let mut fetch = Vec::new();
                    let mut complete = true;

                    for gap in &gaps {
                        let (fresh, index, summary) =
                            self.fetch_and_classify(relays, *gap, observer).await?;
                        complete &= any_relay_completed(&summary);
                        scores.merge_max(&index.scores);
                        records.extend(fresh.into_iter().filter(|r| seen.insert(r.id.clone())));
                        fetch.extend(summary);
                    }

                    return Ok(Resolved {
                        scores,
                        records,
                        outcome: CacheOutcome::PartialHit {
                            base_key: base.key,
                            gaps,
                        },
                        fetch,
                        complete,
                    });
                }
                CacheLookup::Miss => {
                    info!("cache miss, fetching whole window");
                    let (records, index, fetch) =
                        self.fetch_and_classify(relays, requested, observer).await?;
                    return Ok(Resolved {
                        scores: index.scores,
                        records,
                        outcome: CacheOutcome::Miss,
                        complete: any_relay_completed(&fetch),
                        fetch,
                    });
                }
            }
        }
    }

    async fn fetch_and_classify(
        &self,
        relays: &[String],
        range: TimeRange,
        observer: &Option<Observer>,
    ) -> Result<(Vec<Record>, LanguageIndex, Vec<RelayProgress>)> {
        emit(observer, Stage::Fetching(range));
        let on_progress: Option<ProgressCallback> = observer.clone().map(|observer| {
            Arc::new(move |progress: &RelayProgress| {
                observer(&ProgressEvent::Relay(progress.clone()))
            }) as ProgressCallback
        });

        let outcome = self
            .fetcher
            .fetch(relays, range.since, range.until, on_progress)
            .await?;

        emit(observer, Stage::Classifying);
        let index = self
            .engine
            .classify_and_index(
                &outcome.records,
                self.config.confidence_threshold,
                self.config.max_langs_per_user,
            )?
            .into_language_index()?;

        Ok((outcome.records, index, outcome.relays))
    }

    /// Series for every language in `scores`, from the cache or the engine.
    /// Computed series are cached only when `persist` is set.
    fn metric_series(
        &self,
        relays: &[String],
        range: TimeRange,
        kind: MetricKind,
        records: &[Record],
        scores: &UserLanguageScores,
        persist: bool,
    ) -> Result<MetricSeries> {
        let window_days = kind.window_days();
        if let Some(series) = self.cache.get_metrics(relays, range, window_days)? {
            debug!(metric = %kind, "metrics served from cache");
            return Ok(series);
        }

        let languages: Vec<String> = scores.languages().into_iter().collect();
        let series = self
            .engine
            .compute_activity_metrics(
                records,
                scores,
                &languages,
                range.since,
                range.until,
                window_days,
            )?
            .into_metric_series()?;
        if persist {
            self.cache.save_metrics(relays, range, window_days, &series)?;
        }
        Ok(series)
    }
}

/// Give every record without a language its author's top language.
pub fn assign_languages(records: &mut [Record], scores: &UserLanguageScores) {
    for record in records.iter_mut().filter(|r| r.detected_language.is_none()) {
        record.detected_language = scores.top_language(record.author_key()).map(str::to_string);
    }
}

fn any_relay_completed(progress: &[RelayProgress]) -> bool {
    progress.iter().any(|p| p.status != FetchStatus::Error)
}

fn emit(observer: &Option<Observer>, stage: Stage) {
    if let Some(observer) = observer {
        observer(&ProgressEvent::Stage(stage));
    }
}
