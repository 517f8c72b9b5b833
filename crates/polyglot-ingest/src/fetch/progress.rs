//! Per-relay fetch progress.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Where a relay is in the fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    Pending,
    Connecting,
    Fetching,
    Completed,
    Error,
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Connecting => "connecting",
            Self::Fetching => "fetching",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Progress snapshot for one relay. The final snapshot doubles as the
/// relay's fetch summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayProgress {
    pub relay: String,
    /// Share of the requested window processed, 0..=100.
    pub percent: u8,
    /// Records delivered by this relay so far, duplicates included.
    pub fetched: usize,
    pub status: FetchStatus,
    /// Chunks that settled by timeout instead of end-of-stored-events.
    pub timeouts: usize,
    /// Chunks that failed to start.
    pub errors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Receives a snapshot every time a relay's progress changes.
pub type ProgressCallback = Arc<dyn Fn(&RelayProgress) + Send + Sync>;

pub(crate) struct ProgressTracker {
    since: u64,
    total_secs: u64,
    relays: Mutex<Vec<RelayProgress>>,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(relays: &[String], since: u64, until: u64, callback: Option<ProgressCallback>) -> Self {
        let tracker = Self {
            since,
            total_secs: until.saturating_sub(since),
            relays: Mutex::new(
                relays
                    .iter()
                    .map(|relay| RelayProgress {
                        relay: relay.clone(),
                        percent: 0,
                        fetched: 0,
                        status: FetchStatus::Pending,
                        timeouts: 0,
                        errors: 0,
                        last_error: None,
                    })
                    .collect(),
            ),
            callback,
        };
        for relay in relays {
            tracker.update(relay, |_| {});
        }
        tracker
    }

    fn percent_at(&self, at: u64) -> u8 {
        if self.total_secs == 0 {
            return 0;
        }
        let done = at.saturating_sub(self.since).min(self.total_secs);
        ((done as u128 * 100) / self.total_secs as u128) as u8
    }

    fn update(&self, relay: &str, apply: impl FnOnce(&mut RelayProgress)) {
        let snapshot = {
            let mut relays = self.relays.lock();
            let Some(progress) = relays.iter_mut().find(|p| p.relay == relay) else {
                return;
            };
            apply(progress);
            progress.clone()
        };
        if let Some(callback) = &self.callback {
            callback(&snapshot);
        }
    }

    pub fn connecting(&self, relay: &str, chunk_since: u64) {
        let percent = self.percent_at(chunk_since);
        self.update(relay, |p| {
            p.status = FetchStatus::Connecting;
            p.percent = percent;
        });
    }

    pub fn fetching(&self, relay: &str) {
        self.update(relay, |p| p.status = FetchStatus::Fetching);
    }

    pub fn chunk_done(&self, relay: &str, chunk_until: u64, delivered: usize, timed_out: bool) {
        let percent = self.percent_at(chunk_until);
        self.update(relay, |p| {
            p.status = FetchStatus::Fetching;
            p.percent = percent;
            p.fetched += delivered;
            if timed_out {
                p.timeouts += 1;
            }
        });
    }

    pub fn chunk_failed(&self, relay: &str, chunk_until: u64, reason: String) {
        let percent = self.percent_at(chunk_until);
        self.update(relay, |p| {
            p.status = FetchStatus::Error;
            p.percent = percent;
            p.errors += 1;
            p.last_error = Some(reason);
        });
    }

    /// Settle every relay: `error` if its last chunk failed, else `completed`.
    pub fn finish(&self) -> Vec<RelayProgress> {
        let names: Vec<String> = self.relays.lock().iter().map(|p| p.relay.clone()).collect();
        for relay in &names {
            self.update(relay, |p| {
                p.percent = 100;
                if p.status != FetchStatus::Error {
                    p.status = FetchStatus::Completed;
                }
            });
        }
        self.relays.lock().clone()
    }
}
