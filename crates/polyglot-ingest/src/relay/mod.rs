//! Relay connectivity.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        ConnectionPool                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  - One socket per relay, reused across subscriptions            │
//! │  - Subscription table per socket, keyed by subscription id      │
//! │  - Settles on EOSE, timeout or close with partial results       │
//! │  - Background reaper closes idle sockets                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Higher layers talk to relays only through [`RelayTransport`], so the
//! fetcher can be driven by a scripted transport in tests.

pub mod message;
mod pool;
pub mod url;

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

pub use message::{ClientMessage, DEFAULT_LIMIT, Filter, RelayMessage};
pub use pool::{
    Connection, ConnectionPool, PoolConfig, SubscriptionEnd, SubscriptionHandle,
    SubscriptionResult, next_subscription_id,
};
pub use url::{NormalizeOptions, normalize_relay_set, normalize_relay_url};

use crate::Result;

/// A subscription that has been sent and will settle later.
pub type PendingSubscription = BoxFuture<'static, SubscriptionResult>;

/// Opens subscriptions against relays.
///
/// `open_subscription` fails only when the subscription could not be
/// started (connect failure or timeout, send failure). Once started, the
/// returned future always resolves with whatever was accumulated.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    async fn open_subscription(&self, relay: &str, filter: &Filter)
    -> Result<PendingSubscription>;
}

#[async_trait]
impl RelayTransport for ConnectionPool {
    async fn open_subscription(
        &self,
        relay: &str,
        filter: &Filter,
    ) -> Result<PendingSubscription> {
        let conn = self.acquire(relay).await?;
        let handle = conn
            .subscribe(filter, self.config().subscription_timeout)
            .await?;
        Ok(handle.wait().boxed())
    }
}
