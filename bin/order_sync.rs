//! # Order Sync Service
//!
//! Keeps an in-memory order map current for the trading workers.
//!
//! ## Overview
//!
//! This service:
//! - Hydrates the order map from the healthy indexing sources on start and then every
//!   `sources.hydration_interval_secs`
//! - Folds buffered add/remove events into the map every `orders.flush_interval_ms`
//! - Checks chain liveness through the RPC pool and logs per-endpoint health
//! - Handles graceful shutdown on Ctrl+C, also while a re-hydration round is in flight
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin order_sync -- --config Config.toml
//! cargo run --bin order_sync -- --once
//! ```

use anyhow::Result;
use clap::Parser;
use ethers::providers::Middleware;
use log::{info, warn};
use orderbook_resilience_sdk::{
    metrics,
    order_state::OwnerLimits,
    settings::LogSettings,
    OrderQuery, OrderSync, OrderbooksOwnersProfileMap, RpcPool, Settings, SourceAggregator,
    SubgraphClient,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(name = "order_sync", about = "Order map hydration and reconciliation service")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "Config.toml")]
    config: PathBuf,

    /// Hydrate once, report and exit
    #[arg(long)]
    once: bool,
}

#[cfg(not(feature = "observability"))]
fn init_logging(log: &LogSettings) -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log.level.as_str()))
        .try_init()?;
    Ok(())
}

#[cfg(feature = "observability")]
fn init_logging(log: &LogSettings) -> Result<()> {
    use orderbook_resilience_sdk::settings::LogFormat;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log.level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    match log.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    }
    .map_err(|e| anyhow::anyhow!(e))?;

    metrics_exporter_prometheus::PrometheusBuilder::new().install()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("⚠️ Ctrl+C handler unavailable, running until killed: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown requested");
}

async fn check_chain(pool: &RpcPool) {
    match pool.acquire().await {
        Ok(provider) => match provider.get_block_number().await {
            Ok(block) => info!("⛓️ Chain head {} via {}", block, pool.last_used().unwrap_or_default()),
            Err(e) => warn!("⚠️ eth_blockNumber failed: {}", e),
        },
        Err(e) => warn!("⚠️ No RPC endpoint available: {}", e),
    }
    for stats in pool.endpoint_stats() {
        info!(
            "   {} req={} ok={} failed={} success_rate={} selection_rate={}",
            stats.url,
            stats.requests,
            stats.successes,
            stats.failures,
            stats.success_rate,
            stats.selection_rate
        );
    }
}

async fn watch_chain(pool: &RpcPool, period: Duration) {
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticks.tick().await;
        check_chain(pool).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::from_path(&cli.config)?;
    init_logging(&settings.log)?;
    metrics::describe_metrics();

    info!("🚀 Starting Order Sync Service");

    let pool = RpcPool::from_settings(&settings)?;
    info!("✅ RPC pool created with {} endpoints", pool.endpoint_count());

    let client = Arc::new(SubgraphClient::from_settings(&settings.sources)?);
    let aggregator = SourceAggregator::from_settings(client, &settings.sources);
    let query = OrderQuery::for_orderbooks(settings.orderbook_filter());
    let limits = OwnerLimits {
        default: settings.orders.default_owner_limit,
        overrides: settings.owner_limits(),
    };

    let store = OrderbooksOwnersProfileMap::new(limits);
    let mut sync = OrderSync::new(aggregator, settings.sources.urls.clone(), query, store);
    // A log watcher task takes `sync.event_buffers()` and pushes decoded
    // `OrderLog`s into it; they are applied on the next flush.

    sync.hydrate().await?;
    check_chain(&pool).await;

    if cli.once {
        return Ok(());
    }

    let hydration_interval = settings.sources.hydration_interval();
    tokio::select! {
        _ = sync.run(hydration_interval, settings.orders.flush_interval(), shutdown_signal()) => {}
        _ = watch_chain(&pool, hydration_interval) => {}
    }

    let counts = sync.store().counts();
    info!(
        "👋 Stopped with {} orders known, {} active, {} inactive",
        counts.known, counts.active, counts.inactive
    );
    Ok(())
}
