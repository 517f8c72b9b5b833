//! Per-author language scores.
//!
//! The analysis engine produces, for every author key, a map of language code
//! to confidence. Scores from different time ranges are combined by keeping
//! the maximum confidence per `(author, language)` pair.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// ISO 639-1 language code.
pub type LanguageCode = String;

/// Language code to confidence (0.0 - 1.0) for a single author.
pub type LanguageScores = BTreeMap<LanguageCode, f32>;

/// Author key to language scores.
///
/// Serializes as a plain nested JSON object, which is the canonical shape
/// stored in the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserLanguageScores(BTreeMap<String, LanguageScores>);

impl UserLanguageScores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of authors with at least one score entry.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Scores for one author.
    pub fn get(&self, author: &str) -> Option<&LanguageScores> {
        self.0.get(author)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LanguageScores)> {
        self.0.iter()
    }

    /// Record a confidence, keeping the higher of the existing and new value.
    pub fn insert(&mut self, author: &str, language: &str, confidence: f32) {
        let scores = self.0.entry(author.to_string()).or_default();
        scores
            .entry(language.to_string())
            .and_modify(|c| *c = c.max(confidence))
            .or_insert(confidence);
    }

    /// Like [`insert`](Self::insert), then trims the author's map down to the
    /// `max_langs` highest-confidence languages.
    pub fn insert_capped(&mut self, author: &str, language: &str, confidence: f32, max_langs: u8) {
        self.insert(author, language, confidence);

        let Some(scores) = self.0.get_mut(author) else {
            return;
        };
        if scores.len() <= max_langs as usize {
            return;
        }

        let mut ranked: Vec<(LanguageCode, f32)> =
            scores.iter().map(|(k, v)| (k.clone(), *v)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(max_langs as usize);
        *scores = ranked.into_iter().collect();
    }

    /// Merge `other` into `self`, keeping the maximum confidence per
    /// `(author, language)`.
    pub fn merge_max(&mut self, other: &UserLanguageScores) {
        for (author, scores) in other.iter() {
            for (language, confidence) in scores {
                self.insert(author, language, *confidence);
            }
        }
    }

    /// Highest-confidence language for an author.
    ///
    /// Ties are broken by language code so the result is deterministic.
    pub fn top_language(&self, author: &str) -> Option<&str> {
        self.0
            .get(author)?
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(language, _)| language.as_str())
    }

    /// Every language that appears for at least one author.
    pub fn languages(&self) -> BTreeSet<LanguageCode> {
        self.0
            .values()
            .flat_map(|scores| scores.keys().cloned())
            .collect()
    }

    /// Authors that have any score for `language`.
    pub fn authors_for_language(&self, language: &str) -> BTreeSet<&str> {
        self.0
            .iter()
            .filter(|(_, scores)| scores.contains_key(language))
            .map(|(author, _)| author.as_str())
            .collect()
    }

    /// Number of authors per language.
    pub fn authors_per_language(&self) -> BTreeMap<LanguageCode, u32> {
        let mut counts = BTreeMap::new();
        for scores in self.0.values() {
            for language in scores.keys() {
                *counts.entry(language.clone()).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl FromIterator<(String, LanguageScores)> for UserLanguageScores {
    fn from_iter<I: IntoIterator<Item = (String, LanguageScores)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
