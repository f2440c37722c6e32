//! FX Hedge Tracker - Main Entry Point
//!
//! Paper trading runner: seeds losing originals on the paper broker, hedges
//! them through the tracker and keeps the tracker reconciled until shutdown.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fx_hedge_tracker::broker::{BrokerGateway, OrderSide, PaperBroker};
use fx_hedge_tracker::config::Config;
use fx_hedge_tracker::scheduler::HedgeMonitor;
use fx_hedge_tracker::strategy::{HedgeOutcome, HedgeRequest, RecoveryExecutor};
use fx_hedge_tracker::tracker::HedgeTracker;
use rust_decimal_macros::dec;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// FX Hedge Tracker CLI
#[derive(Parser)]
#[command(name = "fx-hedge-tracker")]
#[command(version, about = "Recovery hedge lifecycle tracking for FX positions")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tracker against the paper broker (default)
    Run {
        /// Stop after this many broker sync cycles
        #[arg(short, long)]
        cycles: Option<u64>,

        /// Paper trading group id for seeded positions
        #[arg(short, long, default_value = "PAPER")]
        group: String,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?;
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Commands::Run { cycles, group }) => {
            init_logging()?;
            run_paper(config, cycles, &group).await
        }
        None => {
            init_logging()?;
            run_paper(config, None, "PAPER").await
        }
    }
}

async fn run_paper(config: Config, cycles: Option<u64>, group_id: &str) -> Result<()> {
    info!(
        "FX Hedge Tracker v{} - paper trading",
        env!("CARGO_PKG_VERSION")
    );
    log_config(&config);

    let paper = Arc::new(PaperBroker::new());
    let broker: Arc<dyn BrokerGateway> = paper.clone();
    let tracker = Arc::new(HedgeTracker::new(broker.clone(), config.tracker.clone()));
    let executor = RecoveryExecutor::new(broker, tracker.clone(), config.recovery.clone());

    // Seed losing originals and hedge each one
    for symbol in &config.paper.seed_symbols {
        let ticket = paper.open_position(symbol, OrderSide::Buy, dec!(0.10)).await;
        paper.set_profit(&ticket, dec!(-25)).await;
        info!(%symbol, %ticket, "📥 [PAPER] Seeded losing original");

        let request = HedgeRequest {
            group_id: group_id.to_string(),
            symbol: symbol.clone(),
            hedge_symbol: config.paper.hedge_symbol.clone(),
            side: OrderSide::Sell,
            volume: None,
        };

        match executor.open_hedge(&request).await {
            HedgeOutcome::Opened { order_id } => {
                info!(%symbol, %order_id, "✅ [PAPER] Recovery hedge opened");
            }
            HedgeOutcome::Skipped { status } => {
                info!(%symbol, %status, "[PAPER] Hedge skipped");
            }
            HedgeOutcome::Failed { reason } => {
                warn!(%symbol, %reason, "⚠️  [PAPER] Hedge failed");
            }
        }
    }

    let monitor = HedgeMonitor::new(
        tracker.clone(),
        config.scheduler.clone(),
        config.tracker.stale_lock_age(),
    );

    // Shutdown signal
    let shutdown = monitor.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown.store(true, Ordering::SeqCst);
    });

    monitor.run(cycles).await;

    tracker.log_status_summary();
    info!("{}", tracker);
    Ok(())
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "hedge-tracker.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer flushing for the life of the process
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("fx_hedge_tracker=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Stale Lock Age: {}h", config.tracker.stale_lock_hours);
    info!(
        "   Empty Snapshot Policy: {:?}",
        config.tracker.empty_snapshot_policy
    );
    info!("   Sync Timeout: {}s", config.tracker.sync_timeout_secs);
    info!("   Sync Interval: {}s", config.scheduler.sync_interval_secs);
    info!(
        "   Cleanup Interval: {}s",
        config.scheduler.cleanup_interval_secs
    );
    info!("   Default Hedge Volume: {} lots", config.recovery.default_volume);
}
