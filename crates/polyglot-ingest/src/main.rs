//! Polyglot command-line runner.
//!
//! Fetches activity from a relay set over a time window (reusing whatever
//! the cache already holds) and prints per-language activity series as JSON.
//!
//! # Usage
//!
//! ```bash
//! # Last 90 days, default languages and metrics
//! polyglot --relays wss://relay.damus.io,wss://nos.lol
//!
//! # Explicit window and metrics, relays from the environment
//! POLYGLOT_RELAYS=wss://nos.lol polyglot \
//!     --since 1735689600 --until 1738368000 \
//!     --languages en,ja,de --metrics dau,mau
//!
//! # Drop everything cached
//! polyglot --clear-cache
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use metrics::gauge;
use polyglot_core::metrics::{init_metrics, start_metrics_server};
use polyglot_core::{MetricKind, SECONDS_PER_DAY};
use polyglot_ingest::relay::NormalizeOptions;
use polyglot_ingest::{
    AnalysisRequest, BuiltinEngine, ConnectionPool, Observer, Orchestrator, ProgressEvent,
    Settings, Stage, TemporalCache,
};
use tracing_subscriber::EnvFilter;

/// Relay language activity analysis.
#[derive(Parser, Debug)]
#[command(name = "polyglot")]
#[command(about = "Per-language activity series from Nostr relays")]
#[command(version)]
struct Args {
    /// Relay URLs (comma-separated)
    #[arg(long, env = "POLYGLOT_RELAYS", value_delimiter = ',')]
    relays: Vec<String>,

    /// Languages to report (comma-separated ISO-639-1 codes)
    #[arg(long, value_delimiter = ',', default_value = "en,ja")]
    languages: Vec<String>,

    /// Metrics to compute (comma-separated: dau, wau, mau)
    #[arg(long, value_delimiter = ',', default_value = "dau,wau,mau")]
    metrics: Vec<MetricKind>,

    /// Window start, unix seconds (default: 90 days before --until)
    #[arg(long)]
    since: Option<u64>,

    /// Window end, unix seconds (default: now)
    #[arg(long)]
    until: Option<u64>,

    /// SQLite cache path
    #[arg(long, env = "POLYGLOT_CACHE_PATH", default_value = "./data/polyglot-cache.db")]
    cache_path: PathBuf,

    /// Width of one fetch chunk in days
    #[arg(long, default_value = "1")]
    chunk_days: u32,

    /// Allow relays on loopback and private networks
    #[arg(long)]
    allow_private_relays: bool,

    /// Empty the cache and exit
    #[arg(long)]
    clear_cache: bool,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "0")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("polyglot_ingest=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::from_env().context("invalid POLYGLOT_* settings")?;
    settings.cache.path = args.cache_path.clone();

    if args.metrics_port > 0 {
        let handle = init_metrics();
        start_metrics_server(args.metrics_port, handle).await?;
        gauge!("polyglot_running").set(1.0);
    }

    let cache = Arc::new(
        TemporalCache::open(settings.cache.clone())
            .with_context(|| format!("failed to open cache at {}", args.cache_path.display()))?,
    );

    if args.clear_cache {
        let removed = cache.clear_all()?;
        tracing::info!(removed, path = %args.cache_path.display(), "cache cleared");
        return Ok(());
    }

    if args.relays.is_empty() {
        bail!("no relays given; pass --relays or set POLYGLOT_RELAYS");
    }

    let until = args
        .until
        .unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as u64);
    let since = args
        .since
        .unwrap_or_else(|| until.saturating_sub(90 * SECONDS_PER_DAY));

    let request = AnalysisRequest {
        relays: args.relays,
        languages: args.languages,
        since,
        until,
        metrics: args.metrics,
    };

    let mut orchestrator_config = settings.orchestrator;
    orchestrator_config.chunk_size_days = args.chunk_days;
    orchestrator_config.normalize = NormalizeOptions {
        allow_private_hosts: args.allow_private_relays,
    };

    tracing::info!("Configuration:");
    tracing::info!("  Cache: {}", args.cache_path.display());
    tracing::info!("  Relays: {}", request.relays.len());
    tracing::info!("  Window: {} .. {}", request.since, request.until);
    tracing::info!("  Chunk: {} day(s)", orchestrator_config.chunk_size_days);

    let pool = Arc::new(ConnectionPool::new(settings.pool));
    pool.start_reaper();

    let orchestrator = Orchestrator::new(
        Arc::clone(&pool),
        cache,
        BuiltinEngine,
        orchestrator_config,
    );

    let result = orchestrator.run(&request, Some(log_observer())).await;
    pool.shutdown().await;
    if args.metrics_port > 0 {
        gauge!("polyglot_running").set(0.0);
    }

    let report = result?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn log_observer() -> Observer {
    Arc::new(|event: &ProgressEvent| match event {
        ProgressEvent::Stage(Stage::Fetching(range)) => {
            tracing::info!(since = range.since, until = range.until, "fetching");
        }
        ProgressEvent::Stage(Stage::ComputingMetrics(kind)) => {
            tracing::info!(metric = %kind, "computing metrics");
        }
        ProgressEvent::Stage(stage) => tracing::debug!(?stage, "stage"),
        ProgressEvent::Relay(progress) => tracing::debug!(
            relay = %progress.relay,
            percent = progress.percent,
            fetched = progress.fetched,
            status = %progress.status,
            "relay progress"
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults_leave_metrics_server_off() {
        let args = Args::try_parse_from(["polyglot", "--relays", "wss://nos.lol,wss://relay.damus.io"])
            .unwrap();
        assert_eq!(args.metrics_port, 0);
        assert_eq!(args.relays.len(), 2);
        assert_eq!(args.languages, vec!["en", "ja"]);
        assert_eq!(args.metrics, vec![MetricKind::Dau, MetricKind::Wau, MetricKind::Mau]);
        assert_eq!(args.chunk_days, 1);
        assert!(!args.clear_cache);
    }

    #[test]
    fn test_unknown_metric_rejected() {
        assert!(Args::try_parse_from(["polyglot", "--metrics", "dau,hourly"]).is_err());
    }
}
