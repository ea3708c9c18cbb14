//! Perp Short Bot - Main Entry Point
//!
//! Runs the risk-gated trading cycle on a fixed interval, with subcommands
//! for the manual-order API service and state inspection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use perp_short_bot::api::{self, ApiContext};
use perp_short_bot::config::Config;
use perp_short_bot::cycle::CycleController;
use perp_short_bot::exchange::{BitgetClient, ExchangeApi};
use perp_short_bot::report::Reporter;
use perp_short_bot::state::StateStore;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Perp Short Bot CLI
#[derive(Parser)]
#[command(name = "perp-short-bot")]
#[command(version, about = "Risk-gated short bot for USDT perpetual futures")]
struct Cli {
    /// Run full cycles but never place real orders
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the manual-order HTTP API
    Api {
        #[arg(short, long, default_value = "8432")]
        port: u16,
    },

    /// Show persisted bot state
    Status {
        /// List per-position detail
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging()?;

    match cli.command {
        Some(Commands::Status { verbose }) => show_status(verbose),
        Some(Commands::Api { port }) => run_api(port).await,
        None => run_bot(cli.dry_run).await,
    }
}

/// Stdout plus a daily-rolling file under `logs/`.
fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all("logs").context("Failed to create logs directory")?;
    let file_appender = tracing_appender::rolling::daily("logs", "bot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

async fn run_bot(dry_run: bool) -> Result<()> {
    info!("════════════════════════════════════════════════════════");
    info!("  Perp Short Bot v{}", env!("CARGO_PKG_VERSION"));
    info!("════════════════════════════════════════════════════════");

    if dry_run {
        info!("🔶 DRY RUN MODE - no real orders will be placed");
    } else {
        warn!("🔴 LIVE MODE - real orders will be placed!");
    }

    // Fatal configuration errors exit here, before any cycle runs
    let config = Config::load()?;
    config.validate()?;

    let exchange = BitgetClient::new(&config.exchange, config.execution.leverage)?;
    info!("loading markets...");
    exchange
        .load_markets()
        .await
        .context("Failed to load market metadata")?;

    let store = StateStore::open(&config.state_db)?;
    let state = store.load_or_default()?;
    let reporter = Reporter::new(&config.report_dir)?;

    let cycle_minutes = config.cycle_minutes;
    let mut controller = CycleController::new(config, store, state, reporter, dry_run);

    // Interrupts during a cycle or the sleep must still persist state
    let shutdown = Arc::new(AtomicBool::new(false));
    let notify = Arc::new(Notify::new());
    {
        let shutdown = shutdown.clone();
        let notify = notify.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("🛑 shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
            notify.notify_waiters();
        });
    }

    info!(cycle_minutes, "bot started, press Ctrl+C to stop");

    while !shutdown.load(Ordering::SeqCst) {
        // Unexpected cycle errors are logged with context and do not
        // crash the process; the loop proceeds to the next cycle.
        if let Err(e) = controller.run_cycle(&exchange).await {
            error!(error = %format!("{e:#}"), "cycle error");
        }

        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        info!(cycle_minutes, "sleeping until next cycle");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(cycle_minutes * 60)) => {}
            _ = notify.notified() => {}
        }
    }

    controller
        .persist()
        .context("Failed to persist state on shutdown")?;
    info!("state saved, bot stopped");
    Ok(())
}

async fn run_api(port: u16) -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    let exchange = BitgetClient::new(&config.exchange, config.execution.leverage)?;
    exchange
        .load_markets()
        .await
        .context("Failed to load market metadata")?;

    let ctx = Arc::new(ApiContext {
        config,
        exchange: Arc::new(exchange),
    });
    api::serve(ctx, port).await
}

fn show_status(verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let store = StateStore::open(&config.state_db)?;

    let Some(state) = store.load()? else {
        println!("No saved state found");
        return Ok(());
    };

    println!("Day:            {}", state.day_start_utc);
    println!("Start balance:  {} USDT", state.start_balance);
    println!("Trades today:   {}", state.trades_today);
    println!("{}", state.stats_line());
    println!("Open positions: {}", state.positions.len());

    if verbose {
        for position in state.positions.values() {
            println!(
                "  {} entry={} amount={} margin={} SL={} TP={} trail={} opened={}",
                position.symbol,
                position.entry_price,
                position.amount,
                position.margin,
                position.stop_loss,
                position.take_profit,
                position.current_sl,
                position.opened_at.format("%Y-%m-%d %H:%M UTC"),
            );
        }
    }

    Ok(())
}
