//! Backtest runner binary entrypoint.
//!
//! Replays a JSON file of bars through the moving average crossover
//! strategy and prints the result summary.

use anyhow::Context;
use backtester::{
    BacktestResult, BacktestSimulator, CancelSignal, DataQuery, InMemoryDataStore,
    MovingAverageCrossover, PerformanceSummary, RunStatus, SimulatorConfig, TimeResolution,
};
use clap::Parser;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "backtest-runner", about = "Replay historical bars through the risk gate")]
struct Args {
    /// JSON array of bars ({timestamp, open, high, low, close, volume}).
    #[arg(long)]
    bars: PathBuf,

    /// Instrument the bars belong to.
    #[arg(long, default_value = "ASSET")]
    instrument: String,

    /// Fast SMA period.
    #[arg(long, default_value_t = 10)]
    fast: usize,

    /// Slow SMA period.
    #[arg(long, default_value_t = 30)]
    slow: usize,

    /// Simulator config file (TOML/JSON/YAML). Falls back to BACKTEST_* / RISK_* env vars.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bar interval: 1m, 5m, 15m, 1h, 1d, 1w.
    #[arg(long)]
    resolution: Option<TimeResolution>,
}

#[derive(Debug, Serialize)]
struct RunSummary<'a> {
    strategy: &'a str,
    instrument: &'a str,
    status: RunStatus,
    bars_processed: usize,
    starting_balance: Decimal,
    final_equity: Decimal,
    open_position: bool,
    performance: &'a PerformanceSummary,
}

impl<'a> From<&'a BacktestResult> for RunSummary<'a> {
    fn from(result: &'a BacktestResult) -> Self {
        Self {
            strategy: &result.strategy_name,
            instrument: &result.instrument,
            status: result.status,
            bars_processed: result.bars_processed,
            starting_balance: result.starting_balance,
            final_equity: result.final_equity,
            open_position: result.open_position.is_some(),
            performance: &result.performance,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backtest_runner=info,backtester=info,risk_manager=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => trading_core::config::load_file::<SimulatorConfig>(path, "BACKTEST")
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SimulatorConfig::from_env().context("loading config from environment")?,
    };
    config.risk.validate().context("invalid risk limits")?;
    if let Some(resolution) = args.resolution {
        config.resolution = resolution;
    }

    let mut store = InMemoryDataStore::new();
    store
        .load_json(&args.instrument, &args.bars)
        .with_context(|| format!("loading bars from {}", args.bars.display()))?;
    let (start, end) = store
        .data_range(&args.instrument)
        .context("bar file contains no bars")?;

    let mut strategy = MovingAverageCrossover::new(args.fast, args.slow)?;
    let query = DataQuery::range(&args.instrument, start, end).resolution(config.resolution);
    let simulator = BacktestSimulator::new(store, config);

    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at next bar");
            on_interrupt.cancel();
        }
    });

    let result = simulator.run(&mut strategy, &query, &cancel).await?;
    info!(
        trades = result.trades.len(),
        final_equity = %result.final_equity,
        "Run finished"
    );

    println!("{}", serde_json::to_string_pretty(&RunSummary::from(&result))?);
    Ok(())
}
