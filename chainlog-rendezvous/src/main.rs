//! chainlog rendezvous service
//!
//! Keeps short-lived topic → address records so chainlog peers can find
//! each other without a fixed directory.
//!
//! Usage:
//!   chainlog-rendezvous --port 7700
//!
//! Records live in memory only and vanish with their TTL.

use anyhow::{Context, Result};
use chainlog_rendezvous::{RendezvousConfig, RendezvousState, build_router, spawn_purge};
use chainlog_sync::SystemClock;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "chainlog-rendezvous")]
#[command(about = "Topic rendezvous service for chainlog peers")]
struct Args {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// HTTP port
    #[arg(short, long, default_value = "7700")]
    port: u16,

    /// Longest TTL granted to an announcement, in seconds
    #[arg(long, default_value = "600")]
    max_ttl_secs: u64,

    /// Seconds between sweeps of expired records
    #[arg(long, default_value = "30")]
    purge_interval_secs: u64,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    let config = RendezvousConfig {
        max_ttl: Duration::from_secs(args.max_ttl_secs),
        purge_interval: Duration::from_secs(args.purge_interval_secs.max(1)),
    };
    let state = Arc::new(RendezvousState::new(config, Arc::new(SystemClock)));
    let _purge = spawn_purge(Arc::clone(&state), state.config().purge_interval);

    let bind = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(
        %bind,
        max_ttl_secs = args.max_ttl_secs,
        purge_interval_secs = args.purge_interval_secs,
        "rendezvous listening"
    );

    axum::serve(listener, build_router(state))
        .await
        .context("HTTP server failed")?;
    Ok(())
}
