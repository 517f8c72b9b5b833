//! Relay connection pool.
//!
//! The pool owns one long-lived WebSocket per relay and multiplexes many
//! logical subscriptions over it. Each [`Connection`] is a session object:
//! it holds the write half of the socket, a reader task that demultiplexes
//! incoming frames, and a table of in-flight subscriptions keyed by id.
//!
//! # Lifecycle
//!
//! ```text
//! ConnectionPool::new ──► start_reaper ──► acquire / subscribe ... ──► shutdown
//!                              │                                        │
//!                              └── every 60s: close idle (>5 min) ◄─────┘ aborted
//!                                  connections with 0 subscriptions
//! ```
//!
//! A subscription settles exactly once, on whichever comes first:
//! - `EOSE` from the relay
//! - the per-subscription timeout
//! - the socket closing (or the relay sending `CLOSED`)
//!
//! All three deliver whatever records were accumulated.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use polyglot_core::Record;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use super::message::{ClientMessage, Filter, RelayMessage};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// How long to wait for a close handshake before dropping the socket.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum time to open a socket.
    pub connect_timeout: Duration,
    /// Maximum time a subscription waits for `EOSE`.
    pub subscription_timeout: Duration,
    /// Connections idle longer than this (and with no subscriptions) are reaped.
    pub idle_timeout: Duration,
    /// How often the reaper runs.
    pub reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            subscription_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(5 * 60),
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// Why a subscription stopped accumulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEnd {
    /// The relay sent `EOSE`.
    EndOfStoredEvents,
    /// No `EOSE` arrived within the subscription timeout.
    Timeout,
    /// The socket closed or the relay sent `CLOSED`.
    Closed,
}

/// Records delivered by one subscription and how it ended.
#[derive(Debug, Clone)]
pub struct SubscriptionResult {
    pub records: Vec<Record>,
    pub end: SubscriptionEnd,
}

impl SubscriptionResult {
    fn new(records: Vec<Record>, end: SubscriptionEnd) -> Self {
        Self { records, end }
    }
}

static SUBSCRIPTION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a process-unique subscription id.
///
/// Combines wall-clock millis, a process-wide sequence number and a random
/// suffix, so ids don't collide across connections or across processes
/// sharing a relay.
pub fn next_subscription_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let seq = SUBSCRIPTION_SEQ.fetch_add(1, Ordering::Relaxed);
    let suffix: u32 = rand::random();
    format!("sub-{}-{}-{:08x}", millis, seq, suffix)
}

/// Accumulator for one in-flight subscription.
struct SubscriptionSlot {
    records: Vec<Record>,
    done: oneshot::Sender<SubscriptionResult>,
}

/// A single relay socket and the subscriptions multiplexed over it.
pub struct Connection {
    relay: String,
    sink: tokio::sync::Mutex<WsSink>,
    subscriptions: Mutex<HashMap<String, SubscriptionSlot>>,
    last_used: Mutex<Instant>,
    open: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("relay", &self.relay)
            .field("open", &self.is_open())
            .field("subscriptions", &self.active_subscriptions())
            .finish()
    }
}

impl Connection {
    /// Open a socket to `relay` and start its reader task.
    pub async fn open(relay: &str, connect_timeout: Duration) -> Result<Arc<Self>> {
        debug!(relay, "connecting");
        let connect = tokio_tungstenite::connect_async(relay);
        let (stream, _response) = match tokio::time::timeout(connect_timeout, connect).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                return Err(Error::ConnectFailure {
                    relay: relay.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(Error::ConnectTimeout {
                    relay: relay.to_string(),
                    timeout: connect_timeout,
                });
            }
        };

        let (sink, source) = stream.split();
        let conn = Arc::new(Self {
            relay: relay.to_string(),
            sink: tokio::sync::Mutex::new(sink),
            subscriptions: Mutex::new(HashMap::new()),
            last_used: Mutex::new(Instant::now()),
            open: AtomicBool::new(true),
            reader: Mutex::new(None),
        });

        let reader = tokio::spawn(read_loop(Arc::clone(&conn), source));
        *conn.reader.lock() = Some(reader);

        info!(relay, "connected");
        Ok(conn)
    }

    pub fn relay(&self) -> &str {
        &self.relay
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of subscriptions that have not settled yet.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Time since the connection was last used, measured from `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_used.lock())
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    /// Send a `REQ` and register its accumulator.
    pub async fn subscribe(
        self: &Arc<Self>,
        filter: &Filter,
        timeout: Duration,
    ) -> Result<SubscriptionHandle> {
        let id = next_subscription_id();
        let frame = ClientMessage::Req {
            subscription_id: &id,
            filter,
        }
        .to_json()?;

        let (done, rx) = oneshot::channel();
        self.subscriptions.lock().insert(
            id.clone(),
            SubscriptionSlot {
                records: Vec::new(),
                done,
            },
        );
        self.touch();

        if let Err(e) = self.send(frame).await {
            self.subscriptions.lock().remove(&id);
            return Err(e);
        }

        counter!("relay_subscriptions_total").increment(1);
        trace!(relay = %self.relay, subscription = %id, "subscribed");

        Ok(SubscriptionHandle {
            id,
            connection: Arc::clone(self),
            rx,
            timeout,
        })
    }

    async fn send(&self, frame: String) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed(self.relay.clone()));
        }
        let sent = {
            let mut sink = self.sink.lock().await;
            sink.send(Message::text(frame)).await
        };
        if let Err(e) = sent {
            warn!(relay = %self.relay, error = %e, "send failed, marking connection closed");
            self.mark_closed();
            return Err(e.into());
        }
        Ok(())
    }

    /// Send `CLOSE` for a subscription without waiting for acknowledgement.
    async fn send_close(&self, subscription_id: &str) {
        let frame = match (ClientMessage::Close { subscription_id }).to_json() {
            Ok(frame) => frame,
            Err(_) => return,
        };
        if let Err(e) = self.send(frame).await {
            trace!(relay = %self.relay, error = %e, "CLOSE not sent");
        }
    }

    fn take_subscription(&self, subscription_id: &str) -> Option<SubscriptionSlot> {
        self.subscriptions.lock().remove(subscription_id)
    }

    fn settle(&self, subscription_id: &str, end: SubscriptionEnd) {
        if let Some(SubscriptionSlot { records, done }) = self.take_subscription(subscription_id) {
            trace!(
                relay = %self.relay,
                subscription = subscription_id,
                records = records.len(),
                ?end,
                "subscription settled"
            );
            let _ = done.send(SubscriptionResult::new(records, end));
        }
    }

    /// Settle every in-flight subscription as closed.
    fn settle_all(&self) {
        let drained: Vec<SubscriptionSlot> =
            self.subscriptions.lock().drain().map(|(_, slot)| slot).collect();
        for SubscriptionSlot { records, done } in drained {
            let _ = done.send(SubscriptionResult::new(records, SubscriptionEnd::Closed));
        }
    }

    fn handle_frame(&self, text: &str) {
        self.touch();
        match RelayMessage::from_json(text) {
            Ok(RelayMessage::Event {
                subscription_id,
                record,
            }) => {
                let mut subscriptions = self.subscriptions.lock();
                match subscriptions.get_mut(&subscription_id) {
                    Some(slot) => slot.records.push(record),
                    None => {
                        counter!("relay_messages_malformed_total").increment(1);
                        trace!(
                            relay = %self.relay,
                            subscription = %subscription_id,
                            "event for unknown subscription"
                        );
                    }
                }
            }
            Ok(RelayMessage::EndOfStoredEvents { subscription_id }) => {
                self.settle(&subscription_id, SubscriptionEnd::EndOfStoredEvents);
            }
            Ok(RelayMessage::Closed {
                subscription_id,
                message,
            }) => {
                debug!(relay = %self.relay, subscription = %subscription_id, %message, "relay closed subscription");
                self.settle(&subscription_id, SubscriptionEnd::Closed);
            }
            Ok(RelayMessage::Notice { message }) => {
                debug!(relay = %self.relay, %message, "relay notice");
            }
            Err(e) => {
                counter!("relay_messages_malformed_total").increment(1);
                debug!(relay = %self.relay, error = %e, "dropping frame");
            }
        }
    }

    /// Mark the socket dead and release every waiter.
    fn mark_closed(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!(relay = %self.relay, "connection closed");
        }
        self.settle_all();
    }

    /// Close the socket, stop the reader and settle all subscriptions.
    pub async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        {
            let mut sink = self.sink.lock().await;
            let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        self.settle_all();
    }
}

async fn read_loop(conn: Arc<Connection>, mut source: WsSource) {
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => conn.handle_frame(text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(relay = %conn.relay, error = %e, "socket error");
                break;
            }
        }
    }
    conn.mark_closed();
}

/// A subscription waiting to settle.
pub struct SubscriptionHandle {
    id: String,
    connection: Arc<Connection>,
    rx: oneshot::Receiver<SubscriptionResult>,
    timeout: Duration,
}

impl SubscriptionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for `EOSE`, the timeout, or the socket closing.
    ///
    /// Never fails: every outcome carries the records accumulated so far.
    pub async fn wait(mut self) -> SubscriptionResult {
        match tokio::time::timeout(self.timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => SubscriptionResult::new(Vec::new(), SubscriptionEnd::Closed),
            Err(_) => {
                let slot = self.connection.take_subscription(&self.id);
                match slot {
                    Some(SubscriptionSlot { records, .. }) => {
                        counter!("relay_subscription_timeouts_total").increment(1);
                        debug!(
                            relay = %self.connection.relay,
                            subscription = %self.id,
                            records = records.len(),
                            "subscription timed out, keeping partial results"
                        );
                        self.connection.send_close(&self.id).await;
                        SubscriptionResult::new(records, SubscriptionEnd::Timeout)
                    }
                    // Settled between the timer firing and the table lock.
                    None => self.rx.try_recv().unwrap_or_else(|_| {
                        SubscriptionResult::new(Vec::new(), SubscriptionEnd::Closed)
                    }),
                }
            }
        }
    }
}

/// Pool of relay connections, one per relay address.
pub struct ConnectionPool {
    config: PoolConfig,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
            reaper: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of connections currently held.
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return an open connection to `relay`, opening one if needed.
    ///
    /// A held connection that is no longer open is closed and replaced.
    pub async fn acquire(&self, relay: &str) -> Result<Arc<Connection>> {
        let stale = {
            let mut connections = self.connections.lock();
            match connections.get(relay).cloned() {
                Some(conn) if conn.is_open() => {
                    conn.touch();
                    return Ok(conn);
                }
                Some(_) => connections.remove(relay),
                None => None,
            }
        };
        if let Some(stale) = stale {
            debug!(relay, "replacing stale connection");
            stale.close().await;
        }

        let fresh = match Connection::open(relay, self.config.connect_timeout).await {
            Ok(conn) => conn,
            Err(e) => {
                counter!("relay_connect_failures_total", "relay" => relay.to_string()).increment(1);
                warn!(relay, error = %e, "connect failed");
                return Err(e);
            }
        };

        // Another caller may have connected to the same relay meanwhile.
        let (conn, redundant) = {
            let mut connections = self.connections.lock();
            let existing = connections.get(relay).filter(|c| c.is_open()).cloned();
            let chosen = match existing {
                Some(existing) => (existing, Some(Arc::clone(&fresh))),
                None => {
                    connections.insert(relay.to_string(), Arc::clone(&fresh));
                    (fresh, None)
                }
            };
            gauge!("relay_connections_open").set(connections.len() as f64);
            chosen
        };
        if let Some(redundant) = redundant {
            redundant.close().await;
        }

        Ok(conn)
    }

    /// Close connections idle past the idle timeout with no subscriptions,
    /// plus any that are already dead. Returns how many were removed.
    pub async fn reap_idle(&self, now: Instant) -> usize {
        let victims: Vec<Arc<Connection>> = {
            let mut connections = self.connections.lock();
            let keys: Vec<String> = connections
                .iter()
                .filter(|(_, conn)| {
                    !conn.is_open()
                        || (conn.active_subscriptions() == 0
                            && conn.idle_for(now) > self.config.idle_timeout)
                })
                .map(|(relay, _)| relay.clone())
                .collect();
            let victims = keys
                .iter()
                .filter_map(|relay| connections.remove(relay))
                .collect();
            gauge!("relay_connections_open").set(connections.len() as f64);
            victims
        };

        for conn in &victims {
            info!(relay = %conn.relay, "closing idle connection");
            conn.close().await;
        }
        if !victims.is_empty() {
            counter!("relay_connections_reaped_total").increment(victims.len() as u64);
        }
        victims.len()
    }

    /// Start the background reaper. Calling this twice replaces the first task.
    pub fn start_reaper(self: &Arc<Self>) {
        let pool: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.reap_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let reaped = pool.reap_idle(Instant::now()).await;
                if reaped > 0 {
                    debug!(reaped, "reaper pass");
                }
            }
        });

        if let Some(previous) = self.reaper.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stop the reaper and close every connection.
    pub async fn shutdown(&self) {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
        let all: Vec<Arc<Connection>> = self
            .connections
            .lock()
            .drain()
            .map(|(_, conn)| conn)
            .collect();
        for conn in &all {
            conn.close().await;
        }
        gauge!("relay_connections_open").set(0.0);
        info!(closed = all.len(), "connection pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::mock::{Behavior, MockRelay, record};
    use std::collections::HashSet;

    fn fast_config() -> PoolConfig {
        PoolConfig {
            connect_timeout: Duration::from_millis(500),
            subscription_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_acquire_reuses_open_connection() {
        let relay = MockRelay::spawn(vec![], Behavior::Serve).await;
        let pool = ConnectionPool::new(fast_config());

        let a = pool.acquire(&relay.url).await.unwrap();
        let b = pool.acquire(&relay.url).await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.len(), 1);
        assert_eq!(relay.connection_count(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscription_settles_on_eose() {
        let relay = MockRelay::spawn(
            vec![record(1, "alice", 150), record(2, "bob", 500)],
            Behavior::Serve,
        )
        .await;
        let pool = ConnectionPool::new(fast_config());
        let conn = pool.acquire(&relay.url).await.unwrap();

        let handle = conn
            .subscribe(&Filter::new(100, 200), Duration::from_secs(5))
            .await
            .unwrap();
        let result = handle.wait().await;

        assert_eq!(result.end, SubscriptionEnd::EndOfStoredEvents);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].created_at, 150);
        assert_eq!(conn.active_subscriptions(), 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_returns_partial_results() {
        let relay = MockRelay::spawn(vec![record(1, "alice", 150)], Behavior::Silent).await;
        let pool = ConnectionPool::new(fast_config());
        let conn = pool.acquire(&relay.url).await.unwrap();

        let handle = conn
            .subscribe(&Filter::new(0, 1000), Duration::from_millis(300))
            .await
            .unwrap();
        let result = handle.wait().await;

        assert_eq!(result.end, SubscriptionEnd::Timeout);
        assert_eq!(result.records.len(), 1);
        assert_eq!(conn.active_subscriptions(), 0);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_socket_close_returns_partial_results() {
        let relay = MockRelay::spawn(
            vec![record(1, "alice", 150), record(2, "bob", 160)],
            Behavior::CloseAfterEvents,
        )
        .await;
        let pool = ConnectionPool::new(fast_config());
        let conn = pool.acquire(&relay.url).await.unwrap();

        let result = conn
            .subscribe(&Filter::new(0, 1000), Duration::from_secs(5))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(result.end, SubscriptionEnd::Closed);
        assert_eq!(result.records.len(), 2);
        assert!(!conn.is_open());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_stale_connection_is_replaced() {
        let relay = MockRelay::spawn(vec![], Behavior::CloseAfterEvents).await;
        let pool = ConnectionPool::new(fast_config());

        let first = pool.acquire(&relay.url).await.unwrap();
        let _ = first
            .subscribe(&Filter::new(0, 10), Duration::from_secs(5))
            .await
            .unwrap()
            .wait()
            .await;
        assert!(!first.is_open());

        let second = pool.acquire(&relay.url).await.unwrap();
        assert!(second.is_open());
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(relay.connection_count(), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let relay = MockRelay::spawn(vec![record(1, "alice", 150)], Behavior::Garbage).await;
        let pool = ConnectionPool::new(fast_config());
        let conn = pool.acquire(&relay.url).await.unwrap();

        let result = conn
            .subscribe(&Filter::new(0, 1000), Duration::from_secs(5))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(result.end, SubscriptionEnd::EndOfStoredEvents);
        assert_eq!(result.records.len(), 1);
        assert!(conn.is_open());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_records_are_dropped() {
        let mut bad = record(2, "bob", 160);
        bad.pubkey = "not-hex".to_string();
        let relay = MockRelay::spawn(vec![record(1, "alice", 150), bad], Behavior::Serve).await;
        let pool = ConnectionPool::new(fast_config());
        let conn = pool.acquire(&relay.url).await.unwrap();

        let result = conn
            .subscribe(&Filter::new(0, 1000), Duration::from_secs(5))
            .await
            .unwrap()
            .wait()
            .await;

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].id, record(1, "alice", 150).id);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_connection_debug_shows_relay_and_state() {
        let relay = MockRelay::spawn(Vec::new(), Behavior::Serve).await;
        let pool = ConnectionPool::new(fast_config());
        let conn = pool.acquire(&relay.url).await.unwrap();

        let shown = format!("{:?}", conn);
        assert!(shown.contains(&relay.url));
        assert!(shown.contains("open: true"));
        assert!(shown.contains("subscriptions: 0"));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_failure() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let pool = ConnectionPool::new(fast_config());
        let err = pool.acquire(&format!("ws://{}", addr)).await.unwrap_err();
        assert!(matches!(err, Error::ConnectFailure { .. }));
        assert!(pool.is_empty());
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // Accepts TCP but never completes the WebSocket handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let pool = ConnectionPool::new(PoolConfig {
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        });
        let err = pool.acquire(&format!("ws://{}", addr)).await.unwrap_err();
        assert!(matches!(err, Error::ConnectTimeout { .. }));
    }

    #[tokio::test]
    async fn test_reaper_skips_connections_with_live_subscriptions() {
        let busy = MockRelay::spawn(vec![], Behavior::Silent).await;
        let idle = MockRelay::spawn(vec![], Behavior::Serve).await;
        let pool = ConnectionPool::new(fast_config());

        let busy_conn = pool.acquire(&busy.url).await.unwrap();
        let _pending = busy_conn
            .subscribe(&Filter::new(0, 10), Duration::from_secs(60))
            .await
            .unwrap();
        pool.acquire(&idle.url).await.unwrap();

        let later = Instant::now() + Duration::from_secs(6 * 60);
        let reaped = pool.reap_idle(later).await;

        assert_eq!(reaped, 1);
        assert_eq!(pool.len(), 1);
        assert!(busy_conn.is_open());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_reaper_keeps_recently_used_connections() {
        let relay = MockRelay::spawn(vec![], Behavior::Serve).await;
        let pool = ConnectionPool::new(fast_config());
        pool.acquire(&relay.url).await.unwrap();

        let reaped = pool.reap_idle(Instant::now() + Duration::from_secs(60)).await;
        assert_eq!(reaped, 0);
        assert_eq!(pool.len(), 1);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_settles_in_flight_subscriptions() {
        let relay = MockRelay::spawn(vec![record(1, "alice", 5)], Behavior::Silent).await;
        let pool = Arc::new(ConnectionPool::new(fast_config()));
        pool.start_reaper();
        let conn = pool.acquire(&relay.url).await.unwrap();
        let handle = conn
            .subscribe(&Filter::new(0, 10), Duration::from_secs(60))
            .await
            .unwrap();

        // Let the EVENT frame arrive before closing.
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.shutdown().await;
        let result = handle.wait().await;

        assert_eq!(result.end, SubscriptionEnd::Closed);
        assert_eq!(result.records.len(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_subscription_ids_are_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| next_subscription_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.len() <= 64));
    }
}
