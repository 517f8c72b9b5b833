//! Tunables loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::pipeline::OrchestratorConfig;
use crate::relay::PoolConfig;
use crate::{Error, Result};

/// Settings that have no command-line flag.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub pool: PoolConfig,
    pub cache: CacheConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// All optional; unset variables keep their defaults:
    /// - `POLYGLOT_CONNECT_TIMEOUT_SECS` (10)
    /// - `POLYGLOT_SUBSCRIPTION_TIMEOUT_SECS` (30)
    /// - `POLYGLOT_IDLE_TIMEOUT_SECS` (300)
    /// - `POLYGLOT_LANGUAGE_INDEX_TTL_DAYS` (30)
    /// - `POLYGLOT_RECORDS_TTL_DAYS` (30)
    /// - `POLYGLOT_METRICS_TTL_DAYS` (7)
    /// - `POLYGLOT_CONFIDENCE_THRESHOLD` (0.5, within `[0, 1]`)
    /// - `POLYGLOT_MAX_LANGS_PER_USER` (5, at least 1)
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();

        if let Some(secs) = env_var::<u64>("POLYGLOT_CONNECT_TIMEOUT_SECS")? {
            settings.pool.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_var::<u64>("POLYGLOT_SUBSCRIPTION_TIMEOUT_SECS")? {
            settings.pool.subscription_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_var::<u64>("POLYGLOT_IDLE_TIMEOUT_SECS")? {
            settings.pool.idle_timeout = Duration::from_secs(secs);
        }

        if let Some(days) = env_var("POLYGLOT_LANGUAGE_INDEX_TTL_DAYS")? {
            settings.cache.language_index_ttl_days = days;
        }
        if let Some(days) = env_var("POLYGLOT_RECORDS_TTL_DAYS")? {
            settings.cache.records_ttl_days = days;
        }
        if let Some(days) = env_var("POLYGLOT_METRICS_TTL_DAYS")? {
            settings.cache.metrics_ttl_days = days;
        }

        if let Some(threshold) = env_var::<f32>("POLYGLOT_CONFIDENCE_THRESHOLD")? {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(Error::Config(format!(
                    "POLYGLOT_CONFIDENCE_THRESHOLD must be within [0, 1], got {threshold}"
                )));
            }
            settings.orchestrator.confidence_threshold = threshold;
        }
        if let Some(max) = env_var::<u8>("POLYGLOT_MAX_LANGS_PER_USER")? {
            if max == 0 {
                return Err(Error::Config(
                    "POLYGLOT_MAX_LANGS_PER_USER must be at least 1".to_string(),
                ));
            }
            settings.orchestrator.max_langs_per_user = max;
        }

        tracing::debug!(
            connect_timeout = ?settings.pool.connect_timeout,
            subscription_timeout = ?settings.pool.subscription_timeout,
            confidence_threshold = settings.orchestrator.confidence_threshold,
            max_langs_per_user = settings.orchestrator.max_langs_per_user,
            "settings loaded"
        );

        Ok(settings)
    }
}

fn env_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {name}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}
