//! End-to-end analysis runs.
//!
//! The [`Orchestrator`] is the only component that knows about all the
//! others: it plans against the [`TemporalCache`](crate::cache::TemporalCache),
//! fetches what is missing through the
//! [`ChunkedFetcher`](crate::fetch::ChunkedFetcher), and hands records to an
//! [`AnalysisEngine`](crate::engine::AnalysisEngine).

mod orchestrator;

pub use orchestrator::{
    AnalysisReport, AnalysisRequest, CacheOutcome, Observer, Orchestrator, OrchestratorConfig,
    ProgressEvent, Stage, assign_languages,
};
