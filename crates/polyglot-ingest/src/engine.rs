//! Analysis engine seam.
//!
//! Classification and metric computation live behind [`AnalysisEngine`].
//! Engines hand back loosely shaped JSON ([`EngineOutput`]): associative
//! containers may arrive either as objects or as arrays of `[key, value]`
//! pairs. [`EngineOutput`] is the one place those shapes are collapsed into
//! the canonical ordered maps; nothing downstream sees the raw form.
//!
//! [`BuiltinEngine`] is the default. It classifies authors from their
//! self-declared language labels and computes sliding-window distinct
//! active user counts.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use polyglot_core::{
    EpochDay, MetricPoint, MetricSeries, Record, UserLanguageScores, timestamp_to_epoch_day,
};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::{Error, Result};

/// External analysis engine.
pub trait AnalysisEngine: Send + Sync {
    /// Score each author's languages from their records.
    ///
    /// Scores below `threshold` are discarded and each author keeps at most
    /// `max_langs` languages.
    fn classify_and_index(
        &self,
        records: &[Record],
        threshold: f32,
        max_langs: u8,
    ) -> Result<EngineOutput>;

    /// Daily distinct-active-author counts per language over
    /// `[since, until]`, each day counting the trailing `window_days` days.
    fn compute_activity_metrics(
        &self,
        records: &[Record],
        scores: &UserLanguageScores,
        languages: &[String],
        since: u64,
        until: u64,
        window_days: u32,
    ) -> Result<EngineOutput>;
}

/// Language scores plus classification counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LanguageIndex {
    pub scores: UserLanguageScores,
    pub records_processed: u32,
    pub records_with_language: u32,
}

impl LanguageIndex {
    /// Authors per language.
    pub fn summary(&self) -> BTreeMap<String, u32> {
        self.scores.authors_per_language()
    }
}

/// Raw engine output, not yet normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput(pub Value);

impl EngineOutput {
    /// Read a classification result:
    /// `{"userLanguages": map<author, map<lang, f32>>, "eventsProcessed"?, "eventsWithLanguage"?}`.
    pub fn into_language_index(self) -> Result<LanguageIndex> {
        let Value::Object(mut root) = self.0 else {
            return Err(Error::Engine("classification output is not an object".to_string()));
        };

        let users = into_map(
            root.remove("userLanguages").unwrap_or(Value::Null),
            "userLanguages",
        )?;
        let mut scores = UserLanguageScores::new();
        for (author, languages) in users {
            for (language, confidence) in into_map(languages, &author)? {
                let confidence = confidence.as_f64().ok_or_else(|| {
                    Error::Engine(format!("{}/{}: confidence is not a number", author, language))
                })?;
                scores.insert(&author, &language, confidence as f32);
            }
        }

        let counter = |field: &str| root.get(field).and_then(Value::as_u64).unwrap_or(0) as u32;
        Ok(LanguageIndex {
            records_processed: counter("eventsProcessed"),
            records_with_language: counter("eventsWithLanguage"),
            scores,
        })
    }

    /// Read a metric result: `map<lang, [{epoch_day, count}]>`.
    pub fn into_metric_series(self) -> Result<MetricSeries> {
        into_map(self.0, "series")?
            .into_iter()
            .map(|(language, points)| {
                let points: Vec<MetricPoint> = serde_json::from_value(points).map_err(|e| {
                    Error::Engine(format!("{}: invalid series points: {}", language, e))
                })?;
                Ok((language, points))
            })
            .collect()
    }
}

/// Accept an object or an array of `[key, value]` pairs as a map.
fn into_map(value: Value, context: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Array(pair) if pair.len() == 2 => {
                    let mut pair = pair.into_iter();
                    match (pair.next(), pair.next()) {
                        (Some(Value::String(key)), Some(value)) => Ok((key, value)),
                        _ => Err(Error::Engine(format!("{}: pair key is not a string", context))),
                    }
                }
                _ => Err(Error::Engine(format!(
                    "{}: expected [key, value] pairs",
                    context
                ))),
            })
            .collect(),
        other => Err(Error::Engine(format!(
            "{}: expected a map, got {}",
            context,
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Label-based classifier and sliding-window metric engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEngine;

/// Confidence given to a self-declared language label.
const LABEL_CONFIDENCE: f32 = 1.0;

impl AnalysisEngine for BuiltinEngine {
    fn classify_and_index(
        &self,
        records: &[Record],
        threshold: f32,
        max_langs: u8,
    ) -> Result<EngineOutput> {
        let mut scores = UserLanguageScores::new();
        let mut with_language = 0u32;

        // Labels carry a fixed confidence, so the threshold is all-or-nothing.
        if LABEL_CONFIDENCE >= threshold {
            for record in records {
                let mut labelled = false;
                for code in record.language_labels() {
                    let code = code.trim().to_ascii_lowercase();
                    if code.is_empty() {
                        continue;
                    }
                    scores.insert_capped(record.author_key(), &code, LABEL_CONFIDENCE, max_langs);
                    labelled = true;
                }
                if labelled {
                    with_language += 1;
                }
            }
        }

        debug!(
            records = records.len(),
            with_language,
            users = scores.len(),
            "classified records"
        );

        Ok(EngineOutput(json!({
            "userLanguages": scores,
            "eventsProcessed": records.len(),
            "eventsWithLanguage": with_language,
        })))
    }

    fn compute_activity_metrics(
        &self,
        records: &[Record],
        scores: &UserLanguageScores,
        languages: &[String],
        since: u64,
        until: u64,
        window_days: u32,
    ) -> Result<EngineOutput> {
        if since > until {
            return Err(Error::Engine(format!(
                "since ({}) is after until ({})",
                since, until
            )));
        }
        if window_days == 0 {
            return Err(Error::Engine("window must be at least one day".to_string()));
        }

        let start_day = timestamp_to_epoch_day(since);
        let end_day = timestamp_to_epoch_day(until);

        let mut series = MetricSeries::new();
        for language in languages {
            let eligible = scores.authors_for_language(language);

            let mut activity: BTreeMap<EpochDay, HashSet<&str>> = BTreeMap::new();
            for record in records {
                if eligible.contains(record.author_key()) {
                    activity
                        .entry(record.epoch_day())
                        .or_default()
                        .insert(record.author_key());
                }
            }

            let points = sliding_window(&activity, start_day, end_day, window_days);
            series.insert(language.clone(), points);
        }

        Ok(EngineOutput(serde_json::to_value(&series)?))
    }
}

/// Distinct active authors over the trailing `window_days` for each day.
fn sliding_window(
    activity: &BTreeMap<EpochDay, HashSet<&str>>,
    start_day: EpochDay,
    end_day: EpochDay,
    window_days: u32,
) -> Vec<MetricPoint> {
    let mut window: VecDeque<(EpochDay, &HashSet<&str>)> = VecDeque::new();
    let mut active: HashMap<&str, u32> = HashMap::new();
    let mut points = Vec::with_capacity((end_day - start_day + 1) as usize);

    for day in start_day..=end_day {
        if let Some(authors) = activity.get(&day) {
            window.push_back((day, authors));
            for author in authors {
                *active.entry(*author).or_insert(0) += 1;
            }
        }

        while let Some(&(oldest, authors)) = window.front() {
            if day < oldest + window_days {
                break;
            }
            window.pop_front();
            for author in authors {
                if let Some(count) = active.get_mut(author) {
                    *count -= 1;
                    if *count == 0 {
                        active.remove(author);
                    }
                }
            }
        }

        points.push(MetricPoint {
            epoch_day: day,
            count: active.len() as u32,
        });
    }

    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::mock::record;
    use polyglot_core::SECONDS_PER_DAY as DAY;

    fn labelled(n: u64, author: &str, created_at: u64, language: &str) -> Record {
        let mut r = record(n, author, created_at);
        r.tags
            .push(vec!["l".into(), language.into(), "ISO-639-1".into()]);
        r
    }

    #[test]
    fn test_objects_and_pair_arrays_normalize_identically() {
        let object = EngineOutput(json!({
            "userLanguages": {"u1": {"en": 0.9, "ja": 0.6}},
            "eventsProcessed": 3
        }));
        let pairs = EngineOutput(json!({
            "userLanguages": [["u1", [["en", 0.9], ["ja", 0.6]]]],
            "eventsProcessed": 3
        }));

        let a = object.into_language_index().unwrap();
        let b = pairs.into_language_index().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.records_processed, 3);
        assert_eq!(a.scores.top_language("u1"), Some("en"));
    }

    #[test]
    fn test_series_normalizes_pair_arrays() {
        let series = EngineOutput(json!([["en", [{"epoch_day": 1, "count": 2}]]]))
            .into_metric_series()
            .unwrap();
        assert_eq!(
            series["en"],
            vec![MetricPoint {
                epoch_day: 1,
                count: 2
            }]
        );
    }

    #[test]
    fn test_malformed_output_is_an_engine_error() {
        for output in [
            json!("nope"),
            json!({"userLanguages": 7}),
            json!({"userLanguages": [["u1"]]}),
            json!({"userLanguages": {"u1": {"en": "high"}}}),
        ] {
            let err = EngineOutput(output).into_language_index().unwrap_err();
            assert!(matches!(err, Error::Engine(_)));
        }
        assert!(EngineOutput(json!({"en": 5})).into_metric_series().is_err());
    }

    #[test]
    fn test_builtin_classifies_from_labels() {
        let records = vec![
            labelled(1, "alice", 10, "EN"),
            labelled(2, "alice", 20, "ja"),
            labelled(3, "bob", 30, "ja"),
            record(4, "carol", 40),
        ];
        let index = BuiltinEngine
            .classify_and_index(&records, 0.5, 5)
            .unwrap()
            .into_language_index()
            .unwrap();

        assert_eq!(index.records_processed, 4);
        assert_eq!(index.records_with_language, 3);
        assert_eq!(index.scores.len(), 2);
        let summary = index.summary();
        assert_eq!(summary["ja"], 2);
        assert_eq!(summary["en"], 1);
    }

    #[test]
    fn test_builtin_respects_language_cap() {
        let records = vec![
            labelled(1, "alice", 10, "en"),
            labelled(2, "alice", 20, "ja"),
            labelled(3, "alice", 30, "de"),
        ];
        let index = BuiltinEngine
            .classify_and_index(&records, 0.5, 2)
            .unwrap()
            .into_language_index()
            .unwrap();
        let alice = index.scores.iter().next().unwrap().1;
        assert_eq!(alice.len(), 2);
    }

    #[test]
    fn test_sliding_window_counts() {
        // alice active on days 0 and 2, bob on day 1.
        let records = vec![
            record(1, "alice", 10),
            record(2, "bob", DAY + 10),
            record(3, "alice", 2 * DAY + 10),
            record(4, "alice", 2 * DAY + 20),
        ];
        let mut scores = UserLanguageScores::new();
        scores.insert(records[0].author_key(), "en", 1.0);
        scores.insert(records[1].author_key(), "en", 1.0);

        let languages = vec!["en".to_string(), "ja".to_string()];
        let run = |window| {
            BuiltinEngine
                .compute_activity_metrics(&records, &scores, &languages, 0, 3 * DAY, window)
                .unwrap()
                .into_metric_series()
                .unwrap()
        };

        let counts = |series: &MetricSeries, lang: &str| -> Vec<u32> {
            series[lang].iter().map(|p| p.count).collect()
        };

        let daily = run(1);
        assert_eq!(counts(&daily, "en"), vec![1, 1, 1, 0]);
        assert_eq!(counts(&daily, "ja"), vec![0, 0, 0, 0]);

        let weekly = run(7);
        assert_eq!(counts(&weekly, "en"), vec![1, 2, 2, 2]);

        let two_day = run(2);
        assert_eq!(counts(&two_day, "en"), vec![1, 2, 2, 1]);
    }

    #[test]
    fn test_metrics_reject_inverted_window() {
        let err = BuiltinEngine
            .compute_activity_metrics(&[], &UserLanguageScores::new(), &[], 10, 5, 1)
            .unwrap_err();
        assert!(matches!(err, Error::Engine(_)));
    }
}
