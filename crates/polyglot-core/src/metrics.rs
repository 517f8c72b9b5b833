//! Prometheus metrics helpers for polyglot.
//!
//! # Usage
//!
//! ```rust,ignore
//! use polyglot_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     metrics::counter!("fetch_chunks_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component name (`relay_`, `fetch_`, `cache_`, `analysis_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: only `relay` and `namespace`, both low-cardinality

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Serve `/metrics` on the given port from a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics server stopped");
        }
    });

    Ok(())
}

/// Register descriptions for the metrics recorded across polyglot.
fn register_common_metrics() {
    // =========================================================================
    // Connection Pool
    // =========================================================================

    describe_gauge!("relay_connections_open", "Relay sockets currently held by the pool");
    describe_counter!(
        "relay_connect_failures_total",
        "Relay connect attempts that failed or timed out (label: relay)"
    );
    describe_counter!("relay_subscriptions_total", "REQ subscriptions opened");
    describe_counter!(
        "relay_subscription_timeouts_total",
        "Subscriptions settled by timeout instead of EOSE"
    );
    describe_counter!(
        "relay_messages_malformed_total",
        "Relay frames dropped because they could not be parsed"
    );
    describe_counter!(
        "relay_connections_reaped_total",
        "Idle connections closed by the reaper"
    );

    // =========================================================================
    // Chunked Fetcher
    // =========================================================================

    describe_counter!("fetch_chunks_total", "Time chunks fetched across all relays");
    describe_counter!("fetch_records_total", "Unique records collected by fetches");
    describe_counter!(
        "fetch_records_duplicate_total",
        "Records dropped because another relay or chunk already delivered them"
    );
    describe_histogram!("fetch_chunk_duration_seconds", "Wall time per chunk");

    // =========================================================================
    // Temporal Cache
    // =========================================================================

    describe_counter!("cache_hits_total", "Cache reads that returned a live entry (label: namespace)");
    describe_counter!("cache_misses_total", "Cache reads that found nothing (label: namespace)");
    describe_counter!(
        "cache_expired_total",
        "Entries deleted because their TTL elapsed (label: namespace)"
    );
    describe_counter!(
        "cache_corrupt_total",
        "Entries skipped because their metadata was missing or unreadable"
    );

    // =========================================================================
    // Analysis
    // =========================================================================

    describe_gauge!("polyglot_running", "1 while the runner is active");
    describe_counter!("analysis_runs_total", "Completed analysis runs");
    describe_gauge!("analysis_records", "Records used by the last analysis run");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();

        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_register_common_metrics_does_not_panic() {
        ensure_metrics_init();
        register_common_metrics();
        register_common_metrics();
    }
}
