//! Flash-loan arbitrage engine binary
//!
//! Default mode runs a single check cycle: connect, snapshot, search,
//! evaluate, dry-run the top candidate, print a verdict, exit 0.
//! `--continuous` enters the fixed-interval scheduler loop instead.
//! `--live` swaps the in-process ledger for the JSON-RPC substrate and
//! enables real submission; it requires RPC_URL and SIGNER_KEY and a
//! passing health check, all fatal at startup if missing.
//!
//! Usage:
//!   flasharb-bot                       # one check cycle, dry-run
//!   flasharb-bot --continuous          # scheduler loop, dry-run
//!   flasharb-bot --continuous --live   # scheduler loop, real submission

use anyhow::{Context, Result};
use clap::Parser;
use flasharb_bot::config::EngineConfig;
use flasharb_bot::execution::{ExecutionSubstrate, InProcessLedger, RpcSubstrate};
use flasharb_bot::metrics::{EngineMetrics, PROCESS_START};
use flasharb_bot::scheduler::OpportunityScheduler;
use futures::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

/// Flash-loan arbitrage engine
#[derive(Parser)]
#[command(name = "flasharb-bot")]
struct Args {
    /// Path to the engine TOML config
    #[arg(short, long, env = "ENGINE_CONFIG", default_value = "config/engine.toml")]
    config: String,

    /// Run the continuous scheduler loop instead of a single check cycle
    #[arg(long)]
    continuous: bool,

    /// Submit plans for real instead of stopping after simulation
    #[arg(long)]
    live: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    // Pin the uptime origin before any work happens.
    let _ = *PROCESS_START;

    let args = Args::parse();

    info!("===========================================");
    info!("   Flash-Loan Arbitrage Engine");
    info!("===========================================");

    let mut config = EngineConfig::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config))?;
    config.apply_env();
    config.validate().context("invalid configuration")?;

    info!("Config file: {}", args.config);
    info!("Funding asset: {}", config.trading.funding_asset);
    info!("Instruments: {}", config.trading.instruments.len());
    info!("Venues: {}", config.venues.len());
    info!("Max position: {}", config.trading.max_position_size);
    info!("Cycle interval: {:?}", config.cycle_interval());

    let substrate = build_substrate(&config, args.live).await?;
    let mut scheduler = OpportunityScheduler::new(config, substrate)
        .context("failed to assemble the engine")?;

    if args.live {
        scheduler.set_live(true);
    }

    if args.continuous {
        run_continuous(scheduler).await?;
    } else {
        run_check(scheduler).await;
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // LOG_FORMAT=json makes per-cycle records machine-collectable.
    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

/// Pick and probe the execution substrate. Live mode is fatal without
/// credentials and a reachable endpoint; dry-run needs neither.
async fn build_substrate(config: &EngineConfig, live: bool) -> Result<Arc<dyn ExecutionSubstrate>> {
    if !live {
        info!("Execution substrate: in-process ledger (dry-run)");
        return Ok(Arc::new(InProcessLedger::new()));
    }

    let rpc_url = config
        .execution
        .rpc_url
        .clone()
        .filter(|url| !url.is_empty())
        .context("live mode requires RPC_URL (environment) or execution.rpc_url")?;
    let signer_key = config
        .execution
        .signer_key
        .clone()
        .filter(|key| !key.is_empty())
        .context("live mode requires SIGNER_KEY (environment) or execution.signer_key")?;

    let substrate = RpcSubstrate::new(rpc_url, Some(&signer_key))
        .context("failed to build the RPC substrate")?;
    substrate
        .health_check()
        .await
        .context("flash-loan endpoint unreachable")?;

    info!("Execution substrate: {} (health check passed)", substrate.name());
    Ok(Arc::new(substrate))
}

/// Single-shot check mode. Always exits 0; the verdict is for humans.
async fn run_check(mut scheduler: OpportunityScheduler) {
    info!("Check mode: running one cycle");
    let record = scheduler.run_once().await;

    report(&scheduler.metrics()).await;

    if record.aborted {
        warn!("Verdict: cycle aborted, no usable market snapshot");
    } else if record.candidates == 0 {
        info!(
            "Verdict: no viable opportunities across {} instrument(s)",
            record.instruments_scanned
        );
    } else {
        info!(
            "Verdict: {} viable candidate(s), best net {} ({})",
            record.candidates,
            record
                .best_net
                .map_or_else(|| "?".to_string(), |net| net.to_string()),
            record
                .outcome
                .map_or_else(|| "not executed".to_string(), |o| o.to_string()),
        );
    }
}

/// Continuous mode: scheduler loop until SIGINT/SIGTERM.
async fn run_continuous(mut scheduler: OpportunityScheduler) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    tokio::spawn(async move {
        if let Some(signal) = signals.next().await {
            warn!(signal, "Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler.run(shutdown_rx).await;

    report(&scheduler.metrics()).await;
    info!("Scheduler terminated cleanly");
    Ok(())
}

async fn report(metrics: &Arc<RwLock<EngineMetrics>>) {
    let metrics = metrics.read().await;
    info!("\n{}", metrics.report());
    info!("\n{}", metrics.scrape_counters());
}
