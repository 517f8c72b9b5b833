//! Core types and shared utilities for the polyglot relay analytics pipeline.
//!
//! This crate provides:
//! - [`Record`], the activity item harvested from relays, and its validation
//! - [`UserLanguageScores`] with the max-confidence merge rule
//! - Metric kinds and per-language daily series
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
pub mod language;
pub mod metrics;
mod record;
pub mod series;

/// Seconds in one UTC day.
pub const SECONDS_PER_DAY: u64 = 86_400;

/// Milliseconds in one UTC day, used for cache TTLs.
pub const MILLIS_PER_DAY: i64 = 86_400_000;

pub use error::{Error, Result};
pub use language::{LanguageCode, LanguageScores, UserLanguageScores};
pub use record::{EpochDay, Record, timestamp_to_epoch_day, validate_record};
pub use series::{MetricKind, MetricPoint, MetricSeries, filter_languages};
