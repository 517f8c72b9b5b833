//! Activity metric kinds and their per-language time series.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::record::EpochDay;

/// Rolling active-user metrics, named after the trailing window they count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Daily active users (1-day window).
    Dau,
    /// Weekly active users (7-day window).
    Wau,
    /// Monthly active users (30-day window).
    Mau,
    /// Yearly active users (365-day window).
    Yau,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [Self::Dau, Self::Wau, Self::Mau, Self::Yau];

    /// Window size in days.
    pub fn window_days(self) -> u32 {
        match self {
            Self::Dau => 1,
            Self::Wau => 7,
            Self::Mau => 30,
            Self::Yau => 365,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dau => "dau",
            Self::Wau => "wau",
            Self::Mau => "mau",
            Self::Yau => "yau",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dau" => Ok(Self::Dau),
            "wau" => Ok(Self::Wau),
            "mau" => Ok(Self::Mau),
            "yau" => Ok(Self::Yau),
            other => Err(Error::UnknownMetric(other.to_string())),
        }
    }
}

/// One point of a daily series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub epoch_day: EpochDay,
    pub count: u32,
}

/// Language code to daily series.
pub type MetricSeries = BTreeMap<String, Vec<MetricPoint>>;

/// Keep only the requested languages of a series.
///
/// Languages that are requested but absent from the series are skipped, not
/// filled with zeros.
pub fn filter_languages(series: &MetricSeries, languages: &[String]) -> MetricSeries {
    languages
        .iter()
        .filter_map(|lang| series.get(lang).map(|points| (lang.clone(), points.clone())))
        .collect()
}
