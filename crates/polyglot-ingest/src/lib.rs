//! Polyglot relay harvesting and analysis.
//!
//! This crate pulls activity records from sets of Nostr relays over time
//! windows, caches what it learns, and turns it into per-language activity
//! series.
//!
//! # Modules
//!
//! - [`relay`] - Wire messages, URL normalization and the connection pool
//! - [`fetch`] - Chunked multi-relay fetching with per-relay progress
//! - [`cache`] - SQLite-backed temporal cache with gap planning
//! - [`engine`] - Classification and metric computation seam
//! - [`pipeline`] - The orchestrator tying the above together
//! - [`config`] - Environment-driven tunables
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Orchestrator   │  validate, plan against cache, fetch gaps
//! └──┬──────────┬───┘
//!    │          │
//!    ▼          ▼
//! ┌──────────┐ ┌────────────────┐
//! │ Temporal │ │ ChunkedFetcher │  chunks in sequence, relays in parallel
//! │  Cache   │ └───────┬────────┘
//! │ (SQLite) │         ▼
//! └──────────┘ ┌────────────────┐
//!              │ ConnectionPool │  one socket per relay, many subscriptions
//!              └────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod relay;

pub use error::{Error, Result};

pub use cache::{CacheConfig, CacheLookup, TemporalCache, TimeRange};
pub use config::Settings;
pub use engine::{AnalysisEngine, BuiltinEngine, EngineOutput, LanguageIndex};
pub use fetch::{ChunkedFetcher, FetchConfig, FetchOutcome, FetchStatus, RelayProgress};
pub use pipeline::{
    AnalysisReport, AnalysisRequest, CacheOutcome, Observer, Orchestrator, OrchestratorConfig,
    ProgressEvent, Stage,
};
pub use relay::{ConnectionPool, PoolConfig, RelayTransport};
