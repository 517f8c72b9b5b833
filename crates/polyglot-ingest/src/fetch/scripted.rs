//! In-memory transport that answers subscriptions from fixed record lists.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use polyglot_core::Record;

use crate::relay::{
    Filter, PendingSubscription, RelayTransport, SubscriptionEnd, SubscriptionResult,
};
use crate::{Error, Result};

/// Subscription lifecycle step, in the order the transport saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    Opened { relay: String, since: u64 },
    Settled { relay: String, since: u64 },
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    records: HashMap<String, Vec<Record>>,
    failures: HashSet<(String, u64)>,
    delays: HashMap<(String, u64), Duration>,
    calls: Mutex<Vec<(String, Filter)>>,
    steps: Arc<Mutex<Vec<Step>>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_relay(mut self, relay: &str, records: Vec<Record>) -> Self {
        self.records.insert(relay.to_string(), records);
        self
    }

    /// Fail the subscription to `relay` whose filter starts at `since`.
    pub fn fail_at(mut self, relay: &str, since: u64) -> Self {
        self.failures.insert((relay.to_string(), since));
        self
    }

    /// Hold the subscription to `relay` starting at `since` open for `delay`.
    pub fn delay_at(mut self, relay: &str, since: u64, delay: Duration) -> Self {
        self.delays.insert((relay.to_string(), since), delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, Filter)> {
        self.calls.lock().clone()
    }

    pub fn steps(&self) -> Vec<Step> {
        self.steps.lock().clone()
    }
}

#[async_trait]
impl RelayTransport for ScriptedTransport {
    async fn open_subscription(
        &self,
        relay: &str,
        filter: &Filter,
    ) -> Result<PendingSubscription> {
        self.calls.lock().push((relay.to_string(), filter.clone()));

        if self.failures.contains(&(relay.to_string(), filter.since)) {
            return Err(Error::ConnectFailure {
                relay: relay.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let records: Vec<Record> = self
            .records
            .get(relay)
            .map(|all| all.iter().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default();

        let key = (relay.to_string(), filter.since);
        self.steps.lock().push(Step::Opened {
            relay: key.0.clone(),
            since: key.1,
        });
        let delay = self.delays.get(&key).copied();
        let steps = Arc::clone(&self.steps);

        Ok(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            steps.lock().push(Step::Settled {
                relay: key.0,
                since: key.1,
            });
            SubscriptionResult {
                records,
                end: SubscriptionEnd::EndOfStoredEvents,
            }
        }
        .boxed())
    }
}
