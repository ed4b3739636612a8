//! Bracket Trader - Main Entry Point
//!
//! Paper session replaying CSV bars through the full execution path.

use anyhow::{Context, Result};
use bracket_trader::config::Config;
use bracket_trader::gateway::{event_channel, PaperGateway};
use bracket_trader::runtime::{build_sinks, StrategyRunner};
use bracket_trader::signal::{CsvBarLoader, MovingAverageCross};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Bracket Trader CLI
#[derive(Parser)]
#[command(name = "bracket-trader")]
#[command(version, about = "Bracket order execution and reconciliation engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical bars against the paper gateway
    Paper {
        /// Path to CSV data file (timestamp,open,high,low,close,volume)
        #[arg(short, long)]
        data: String,

        /// Delay between replayed bars
        #[arg(short, long, default_value = "100")]
        interval_ms: u64,
    },

    /// Print the effective configuration and exit
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging()?;

    let cli = Cli::parse();
    let mut config = Config::load()?;
    config.validate()?;

    match cli.command {
        Commands::Paper { data, interval_ms } => run_paper(config, &data, interval_ms).await,
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run_paper(config: Config, data: &str, interval_ms: u64) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║         Bracket Trader v{} - Paper Session               ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");
    log_config(&config);

    let loader = CsvBarLoader::new(data)?;
    info!(bars = loader.len(), path = %data, "📂 [DATA] Bars loaded");
    let (history, live) = loader.split(config.history.bar_count);
    if live.is_empty() {
        warn!("⚠️  [DATA] No bars left after the history window, nothing to replay");
    }

    let (tx, rx) = event_channel();
    let gateway = Arc::new(PaperGateway::new(tx));
    gateway.set_history(&config.bot.symbol, history).await;

    let strategy = MovingAverageCross::new(
        config.signal.fast_period,
        config.signal.slow_period,
        config.signal.take_profit_ranges,
        config.signal.stop_loss_ranges,
    );
    let (trade_log, notifier) = build_sinks(&config)?;
    let symbol = config.bot.symbol.clone();

    let mut runner = StrategyRunner::new(
        config,
        gateway.clone(),
        rx,
        Box::new(strategy),
        trade_log,
        notifier,
    );
    runner.start().await.context("Paper session failed to start")?;

    let (done_tx, done_rx) = oneshot::channel();
    let replay_gateway = gateway.clone();
    tokio::spawn(async move {
        let total = live.len();
        for bar in live {
            replay_gateway.push_bar(&symbol, bar).await;
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
        info!(bars = total, "📼 [REPLAY] Replay finished");
        done_tx.send(()).ok();
    });

    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = done_rx => {}
        }
    };
    let stats = runner.run(shutdown).await?;

    let isolation = runner.engine().isolation_snapshot(runner.identity()).await;
    info!(
        tag = %isolation.tag,
        local_groups = isolation.local_groups,
        gateway_groups = ?isolation.gateway_groups,
        consistent = isolation.consistent,
        "🔍 [ISOLATION] Final order attribution"
    );
    info!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Initialize logging with console and file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    // Create logs directory
    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "bracket-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("bracket_trader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Bot: {} ({})", config.bot.name, config.bot.strategy_name);
    info!(
        "   Instrument: {} {} on {}",
        config.bot.asset_class, config.bot.symbol, config.bot.exchange
    );
    info!("   Timeframe: {}", config.bot.timeframe);
    info!(
        "   Max Concurrent Trades: {}",
        config.bot.max_concurrent_trades
    );
    info!("   Quantity: {}", config.bot.default_quantity);
    info!(
        "   MA Cross: fast {} / slow {}",
        config.signal.fast_period, config.signal.slow_period
    );
    info!("   Cancel Policy: {:?}", config.monitoring.cancel_policy);
    info!(
        "   Gateway: {}:{} (client {})",
        config.gateway.host, config.gateway.port, config.gateway.client_id
    );
}
