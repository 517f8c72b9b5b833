//! Chunked multi-relay fetching.
//!
//! A time window is split into consecutive chunks. Chunks run strictly one
//! after another; within a chunk every relay is queried concurrently and the
//! join never fails, so one bad relay only costs its own contribution.
//!
//! ```text
//! [since ─────────────────────────────────────────── until]
//!   chunk 1          chunk 2          chunk 3
//!   ├ relay A ┐      ├ relay A ┐      ├ relay A ┐
//!   ├ relay B ┼ join ├ relay B ┼ join ├ relay B ┼ join ──► dedupe by id
//!   └ relay C ┘      └ relay C ┘      └ relay C ┘
//! ```

mod progress;

#[cfg(test)]
pub(crate) mod scripted;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use metrics::{counter, histogram};
use polyglot_core::{Record, SECONDS_PER_DAY};
use tracing::{debug, info, warn};

use crate::relay::{DEFAULT_LIMIT, Filter, RelayTransport, SubscriptionEnd, SubscriptionResult};
use crate::{Error, Result};

pub use progress::{FetchStatus, ProgressCallback, RelayProgress};
use progress::ProgressTracker;

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Width of one chunk in days.
    pub chunk_size_days: u32,
    /// Per-subscription record limit.
    pub limit: usize,
    /// Record kinds to request; `None` requests all kinds.
    pub kinds: Option<Vec<u32>>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            chunk_size_days: 1,
            limit: DEFAULT_LIMIT,
            kinds: None,
        }
    }
}

/// Result of a fetch across all relays and chunks.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Unique records, in arrival order.
    pub records: Vec<Record>,
    /// Final progress snapshot per relay, in request order.
    pub relays: Vec<RelayProgress>,
    /// Number of chunks fetched.
    pub chunks: usize,
    /// Records dropped because their id was already seen.
    pub duplicates: usize,
}

/// Split `[since, until]` into chunks of `chunk_secs` seconds.
///
/// Chunk N covers `[start, min(start + chunk_secs, until)]`; the next chunk
/// starts at `start + chunk_secs`. A zero-length window yields one chunk.
pub fn chunk_ranges(since: u64, until: u64, chunk_secs: u64) -> Vec<(u64, u64)> {
    if since == until {
        return vec![(since, until)];
    }
    let step = chunk_secs.max(1);
    let mut chunks = Vec::new();
    let mut start = since;
    while start < until {
        chunks.push((start, start.saturating_add(step).min(until)));
        start = start.saturating_add(step);
    }
    chunks
}

/// Fetches a time window from many relays, chunk by chunk.
pub struct ChunkedFetcher<T: RelayTransport> {
    transport: Arc<T>,
    config: FetchConfig,
}

impl<T: RelayTransport> ChunkedFetcher<T> {
    pub fn new(transport: Arc<T>, config: FetchConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch `[since, until]` from every relay.
    ///
    /// Fails only on invalid arguments. Per-relay failures are reported
    /// through [`RelayProgress`] and the fetch carries on.
    pub async fn fetch(
        &self,
        relays: &[String],
        since: u64,
        until: u64,
        on_progress: Option<ProgressCallback>,
    ) -> Result<FetchOutcome> {
        if since > until {
            return Err(Error::Config(format!(
                "since ({}) is after until ({})",
                since, until
            )));
        }
        if relays.is_empty() {
            return Err(Error::Config("no relays to fetch from".to_string()));
        }
        if self.config.chunk_size_days == 0 {
            return Err(Error::Config("chunk size must be at least one day".to_string()));
        }

        let chunks = chunk_ranges(
            since,
            until,
            self.config.chunk_size_days as u64 * SECONDS_PER_DAY,
        );
        let tracker = ProgressTracker::new(relays, since, until, on_progress);

        let mut seen: HashSet<String> = HashSet::new();
        let mut records = Vec::new();
        let mut duplicates = 0;

        for (index, &(chunk_since, chunk_until)) in chunks.iter().enumerate() {
            let started = Instant::now();
            let filter = Filter::new(chunk_since, chunk_until)
                .kinds(self.config.kinds.clone())
                .limit(self.config.limit);

            let results = join_all(
                relays
                    .iter()
                    .map(|relay| self.fetch_from_relay(relay, &filter, &tracker)),
            )
            .await;

            let mut fresh = 0;
            for (relay, result) in relays.iter().zip(results) {
                match result {
                    Ok(SubscriptionResult { records: delivered, end }) => {
                        let count = delivered.len();
                        for record in delivered {
                            if seen.insert(record.id.clone()) {
                                records.push(record);
                                fresh += 1;
                            } else {
                                duplicates += 1;
                            }
                        }
                        tracker.chunk_done(relay, chunk_until, count, end == SubscriptionEnd::Timeout);
                    }
                    Err(reason) => tracker.chunk_failed(relay, chunk_until, reason),
                }
            }

            counter!("fetch_chunks_total").increment(1);
            counter!("fetch_records_total").increment(fresh as u64);
            histogram!("fetch_chunk_duration_seconds").record(started.elapsed().as_secs_f64());
            debug!(
                chunk = index + 1,
                of = chunks.len(),
                since = chunk_since,
                until = chunk_until,
                new = fresh,
                total = records.len(),
                "chunk fetched"
            );
        }

        counter!("fetch_records_duplicate_total").increment(duplicates as u64);
        let relays = tracker.finish();
        info!(
            records = records.len(),
            duplicates,
            chunks = chunks.len(),
            failed_relays = relays.iter().filter(|r| r.status == FetchStatus::Error).count(),
            "fetch complete"
        );

        Ok(FetchOutcome {
            records,
            relays,
            chunks: chunks.len(),
            duplicates,
        })
    }

    /// One relay's share of a chunk. Never fails; errors become a reason string.
    async fn fetch_from_relay(
        &self,
        relay: &str,
        filter: &Filter,
        tracker: &ProgressTracker,
    ) -> std::result::Result<SubscriptionResult, String> {
        tracker.connecting(relay, filter.since);
        let pending = match self.transport.open_subscription(relay, filter).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(relay, since = filter.since, until = filter.until, error = %e, "chunk failed");
                return Err(e.to_string());
            }
        };
        tracker.fetching(relay);

        let result = pending.await;
        if result.end != SubscriptionEnd::EndOfStoredEvents {
            debug!(
                relay,
                end = ?result.end,
                records = result.records.len(),
                "chunk ended early, keeping partial results"
            );
        }
        Ok(result)
    }
}
