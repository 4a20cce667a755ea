//! Bar replay simulator with slippage and fee models.
//!
//! Every order a strategy emits goes through a [`RiskEngine`] exactly as it
//! would in live trading. The engine runs on a [`ManualClock`] advanced to
//! each bar's timestamp, so loss windows roll on simulated time.

use chrono::{DateTime, Utc};
use risk_manager::{BreakerKind, FlipPolicy, ManualClock, RiskConfig, RiskEngine};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use trading_core::config::{env_or, load_dotenv};
use trading_core::{Bar, OrderIntent, OrderSide, PositionSide};

use crate::data_store::{DataQuery, HistoricalDataSource, TimeResolution};
use crate::equity::{EquityPoint, EquityTracker};
use crate::error::{BacktestError, Result};
use crate::indicators::AverageTrueRange;
use crate::metrics::PerformanceSummary;
use crate::position::BacktestPosition;
use crate::strategy::{Fill, Strategy, StrategyContext};

/// Configuration for the backtest simulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Initial cash balance.
    pub starting_balance: Decimal,
    /// Fee model to use for trading costs.
    pub fee_model: FeeModel,
    /// Slippage model to use.
    pub slippage_model: SlippageModel,
    /// Lookback for the ATR used in risk-based sizing.
    pub atr_period: usize,
    /// Bar interval of replayed data when no query supplies one.
    pub resolution: TimeResolution,
    /// Overrides the Sharpe annualization factor implied by the resolution.
    pub periods_per_year: Option<f64>,
    /// Limits enforced on every order.
    pub risk: RiskConfig,
    /// Trip a drawdown breaker once bar drawdown exceeds `risk.max_drawdown_pct`.
    pub drawdown_breaker: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            starting_balance: Decimal::new(100_000, 0),
            fee_model: FeeModel::None,
            slippage_model: SlippageModel::None,
            atr_period: 14,
            resolution: TimeResolution::Day,
            periods_per_year: None,
            risk: RiskConfig::default(),
            drawdown_breaker: false,
        }
    }
}

impl SimulatorConfig {
    /// Load from `BACKTEST_*` environment variables, with risk limits from
    /// `RISK_*`.
    pub fn from_env() -> trading_core::Result<Self> {
        load_dotenv();
        let defaults = Self::default();

        let fee_rate: Decimal = env_or("BACKTEST_FEE_RATE", Decimal::ZERO)?;
        let fee_per_trade: Decimal = env_or("BACKTEST_FEE_PER_TRADE", Decimal::ZERO)?;
        let slippage_rate: Decimal = env_or("BACKTEST_SLIPPAGE_RATE", Decimal::ZERO)?;
        let periods_per_year: f64 = env_or("BACKTEST_PERIODS_PER_YEAR", 0.0)?;

        let fee_model = if fee_rate > Decimal::ZERO {
            FeeModel::Fixed(fee_rate)
        } else if fee_per_trade > Decimal::ZERO {
            FeeModel::PerTrade(fee_per_trade)
        } else {
            FeeModel::None
        };
        let slippage_model = if slippage_rate > Decimal::ZERO {
            SlippageModel::Fixed(slippage_rate)
        } else {
            SlippageModel::None
        };

        Ok(Self {
            starting_balance: env_or("BACKTEST_STARTING_BALANCE", defaults.starting_balance)?,
            fee_model,
            slippage_model,
            atr_period: env_or("BACKTEST_ATR_PERIOD", defaults.atr_period)?,
            resolution: env_or("BACKTEST_RESOLUTION", defaults.resolution)?,
            periods_per_year: (periods_per_year > 0.0).then_some(periods_per_year),
            risk: RiskConfig::from_env()?,
            drawdown_breaker: env_or("BACKTEST_DRAWDOWN_BREAKER", defaults.drawdown_breaker)?,
        })
    }

    fn annualization(&self, resolution: TimeResolution) -> f64 {
        self.periods_per_year
            .unwrap_or_else(|| resolution.periods_per_year())
    }
}

/// Fee model for simulating trading costs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeModel {
    /// No fees.
    #[default]
    None,
    /// Fraction of fill notional (e.g., 0.001 for 0.1%).
    Fixed(Decimal),
    /// Flat amount per fill.
    PerTrade(Decimal),
}

impl FeeModel {
    /// Calculate fee for a fill of the given notional.
    pub fn calculate(&self, notional: Decimal) -> Decimal {
        match self {
            FeeModel::None => Decimal::ZERO,
            FeeModel::Fixed(rate) => notional.abs() * rate,
            FeeModel::PerTrade(amount) => *amount,
        }
    }
}

/// Slippage model for simulating execution impact.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlippageModel {
    /// No slippage.
    #[default]
    None,
    /// Fixed fraction of price, always against the order.
    Fixed(Decimal),
}

impl SlippageModel {
    /// Execution price after slippage: buys pay up, sells receive less.
    pub fn apply(&self, price: Decimal, side: OrderSide) -> Decimal {
        match self {
            SlippageModel::None => price,
            SlippageModel::Fixed(pct) => match side {
                OrderSide::Buy => price * (Decimal::ONE + pct),
                OrderSide::Sell => price * (Decimal::ONE - pct),
            },
        }
    }
}

/// Record of a closed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Trade ID.
    pub id: uuid::Uuid,
    pub instrument: String,
    pub side: PositionSide,
    /// Total quantity closed over the round trip.
    pub quantity: Decimal,
    /// Average entry price.
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    /// Quantity-weighted exit price.
    pub exit_price: Decimal,
    pub exit_time: DateTime<Utc>,
    /// Realized P&L net of commission.
    pub pnl: Decimal,
    /// Commission paid on all fills of the round trip.
    pub commission: Decimal,
}

impl TradeRecord {
    fn from_closed(position: BacktestPosition, exit_time: DateTime<Utc>) -> Self {
        let exit_price = position.avg_exit_price().unwrap_or(position.entry_price);
        Self {
            id: uuid::Uuid::new_v4(),
            pnl: position.net_pnl(),
            instrument: position.instrument,
            side: position.side,
            quantity: position.closed_quantity,
            entry_price: position.entry_price,
            entry_time: position.entry_time,
            exit_price,
            exit_time,
            commission: position.commission,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every bar was processed.
    Completed,
    /// Stopped early at a bar boundary.
    Cancelled,
}

/// Result of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Strategy name.
    pub strategy_name: String,
    /// Strategy parameters.
    pub strategy_params: HashMap<String, String>,
    pub instrument: String,
    pub status: RunStatus,
    /// Number of bars fully processed.
    pub bars_processed: usize,
    pub starting_balance: Decimal,
    /// Cash plus unrealized PnL at the last processed close, after that
    /// bar's fill. The last `equity_curve` point is marked before the fill,
    /// so the two differ by any final-bar commission and slippage.
    pub final_equity: Decimal,
    /// Closed round trips in chronological order.
    pub trades: Vec<TradeRecord>,
    /// One point per processed bar.
    pub equity_curve: Vec<EquityPoint>,
    /// Position still open when the run ended; never force-closed.
    pub open_position: Option<BacktestPosition>,
    pub performance: PerformanceSummary,
    /// Computed at timestamp.
    pub completed_at: DateTime<Utc>,
}

impl BacktestResult {
    /// Check if the backtest was profitable.
    pub fn is_profitable(&self) -> bool {
        self.final_equity > self.starting_balance
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == RunStatus::Cancelled
    }
}

/// Cooperative cancellation flag, polled once per bar.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    cancelled: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Internal simulation state.
struct SimulationState {
    cash: Decimal,
    position: Option<BacktestPosition>,
    trades: Vec<TradeRecord>,
    equity: EquityTracker,
}

impl SimulationState {
    fn new(starting_balance: Decimal, bars: usize) -> Self {
        Self {
            cash: starting_balance,
            position: None,
            trades: Vec::new(),
            equity: EquityTracker::with_capacity(bars),
        }
    }

    fn mark_to_market(&self, close: Decimal) -> Decimal {
        self.cash
            + self
                .position
                .as_ref()
                .map_or(Decimal::ZERO, |p| p.unrealized_pnl(close))
    }
}

/// The backtest simulator engine.
pub struct BacktestSimulator {
    config: SimulatorConfig,
    data_source: Arc<dyn HistoricalDataSource>,
}

impl BacktestSimulator {
    /// Create a new backtest simulator.
    pub fn new(data_source: impl HistoricalDataSource + 'static, config: SimulatorConfig) -> Self {
        Self {
            config,
            data_source: Arc::new(data_source),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Fetch bars for `query` and replay them. A data source failure aborts
    /// the run.
    pub async fn run<S: Strategy + ?Sized>(
        &self,
        strategy: &mut S,
        query: &DataQuery,
        cancel: &CancelSignal,
    ) -> Result<BacktestResult> {
        info!(
            strategy = strategy.name(),
            instrument = %query.instrument,
            start = %query.start_time,
            end = %query.end_time,
            "Starting backtest"
        );

        let bars = self.data_source.fetch_bars(query).await?;
        if bars.is_empty() {
            return Err(BacktestError::unavailable(&query.instrument, "data source returned no bars"));
        }

        let periods = self.config.annualization(query.resolution);
        self.replay_bars(&query.instrument, &bars, strategy, cancel, periods)
            .await
    }

    /// Replay an in-memory bar series. Bars must be in non-decreasing time
    /// order.
    pub async fn replay<S: Strategy + ?Sized>(
        &self,
        instrument: &str,
        bars: &[Bar],
        strategy: &mut S,
        cancel: &CancelSignal,
    ) -> Result<BacktestResult> {
        let periods = self.config.annualization(self.config.resolution);
        self.replay_bars(instrument, bars, strategy, cancel, periods)
            .await
    }

    async fn replay_bars<S: Strategy + ?Sized>(
        &self,
        instrument: &str,
        bars: &[Bar],
        strategy: &mut S,
        cancel: &CancelSignal,
        periods_per_year: f64,
    ) -> Result<BacktestResult> {
        if let Some(w) = bars.windows(2).find(|w| w[1].timestamp < w[0].timestamp) {
            return Err(BacktestError::InvalidData(format!(
                "bars out of order: {} after {}",
                w[1].timestamp, w[0].timestamp
            )));
        }

        let clock = ManualClock::new(bars.first().map_or_else(Utc::now, |b| b.timestamp));
        let engine = RiskEngine::with_clock(self.config.risk.clone(), Arc::new(clock.clone()));
        let drawdown_limit = (self.config.risk.max_drawdown_pct / Decimal::ONE_HUNDRED)
            .to_f64()
            .unwrap_or(f64::MAX);

        let mut state = SimulationState::new(self.config.starting_balance, bars.len());
        let mut atr = AverageTrueRange::new(self.config.atr_period);
        let mut status = RunStatus::Completed;
        let mut bars_processed = 0;
        let mut last_close = None;

        for (index, bar) in bars.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(instrument = %instrument, bars_processed, "Backtest cancelled");
                status = RunStatus::Cancelled;
                break;
            }
            clock.set(bar.timestamp);
            let current_atr = atr.update(bar);

            let equity = state.mark_to_market(bar.close);
            let drawdown = state.equity.record(bar.timestamp, equity).drawdown;

            let suggested_quantity = current_atr
                .map(|a| engine.size_for_risk(instrument, a, equity))
                .unwrap_or(Decimal::ZERO);
            let ctx = StrategyContext {
                instrument: instrument.to_string(),
                timestamp: bar.timestamp,
                bar_index: index,
                position: state.position.clone(),
                cash: state.cash,
                equity,
                drawdown,
                atr: current_atr,
                suggested_quantity,
            };

            if let Some(intent) = strategy.on_bar(bar, &ctx)? {
                if intent.instrument != instrument {
                    return Err(BacktestError::Strategy(anyhow::anyhow!(
                        "order for {} in a backtest of {}",
                        intent.instrument,
                        instrument
                    )));
                }
                self.execute(&engine, &mut state, strategy, intent, bar, equity)
                    .await;
            }

            // Breaches block orders from the next bar on.
            if self.config.drawdown_breaker
                && drawdown > drawdown_limit
                && !engine.is_tripped(instrument).await
            {
                engine
                    .trip_breaker(
                        instrument,
                        BreakerKind::Drawdown,
                        format!("drawdown {:.2}% exceeds {}%", drawdown * 100.0, self.config.risk.max_drawdown_pct),
                    )
                    .await;
            }

            bars_processed += 1;
            last_close = Some(bar.close);
        }

        let final_equity = last_close.map_or(state.cash, |close| state.mark_to_market(close));
        let result = self.build_result(
            strategy,
            instrument,
            state,
            final_equity,
            status,
            bars_processed,
            periods_per_year,
        );

        info!(
            strategy = strategy.name(),
            instrument = %instrument,
            status = ?result.status,
            return_pct = result.performance.total_return * 100.0,
            sharpe = result.performance.sharpe_ratio,
            trades = result.performance.total_trades,
            "Backtest completed"
        );

        Ok(result)
    }

    /// Authorize and, if accepted, fill one order at this bar.
    async fn execute<S: Strategy + ?Sized>(
        &self,
        engine: &RiskEngine,
        state: &mut SimulationState,
        strategy: &mut S,
        intent: OrderIntent,
        bar: &Bar,
        equity: Decimal,
    ) {
        let mut priced = intent.clone();
        if priced.effective_price().is_none() {
            priced.reference_price = Some(bar.close);
        }

        if let Err(violation) = engine.authorize(&priced, equity).await {
            warn!(
                instrument = %intent.instrument,
                timestamp = %bar.timestamp,
                kind = %violation.kind(),
                "Order rejected in backtest"
            );
            strategy.on_rejection(&intent, &violation);
            return;
        }

        let side = intent.side.position_side();
        let price = self
            .config
            .slippage_model
            .apply(priced.limit_price.unwrap_or(bar.close), intent.side);

        // Under DiscardExcess only the part that closes the position executes.
        let quantity = match &state.position {
            Some(pos)
                if pos.side != side
                    && intent.quantity > pos.quantity
                    && self.config.risk.flip_policy == FlipPolicy::DiscardExcess =>
            {
                pos.quantity
            }
            _ => intent.quantity,
        };
        let commission = self.config.fee_model.calculate(quantity * price);
        state.cash -= commission;

        engine.on_fill(&intent.instrument, quantity, price, side).await;

        match state.position.take() {
            None => {
                state.position = Some(BacktestPosition::open(
                    &intent.instrument,
                    side,
                    quantity,
                    price,
                    commission,
                    bar.timestamp,
                ));
            }
            Some(mut pos) if pos.side == side => {
                pos.add(quantity, price, commission);
                state.position = Some(pos);
            }
            Some(mut pos) => {
                let closing = quantity.min(pos.quantity);
                let excess = quantity - closing;
                let closing_commission = if excess > Decimal::ZERO {
                    commission * closing / quantity
                } else {
                    commission
                };

                state.cash += pos.reduce(closing, price, closing_commission);

                if pos.is_closed() {
                    let trade = TradeRecord::from_closed(pos, bar.timestamp);
                    engine.record_realized_pnl(trade.pnl).await;
                    debug!(
                        instrument = %trade.instrument,
                        pnl = %trade.pnl,
                        exit_price = %trade.exit_price,
                        "Trade closed"
                    );
                    state.trades.push(trade);

                    if excess > Decimal::ZERO {
                        state.position = Some(BacktestPosition::open(
                            &intent.instrument,
                            side,
                            excess,
                            price,
                            commission - closing_commission,
                            bar.timestamp,
                        ));
                    }
                } else {
                    state.position = Some(pos);
                }
            }
        }

        debug!(
            instrument = %intent.instrument,
            side = ?intent.side,
            quantity = %quantity,
            price = %price,
            commission = %commission,
            "Order filled"
        );

        strategy.on_fill(&Fill {
            intent_id: intent.id,
            instrument: intent.instrument,
            side: intent.side,
            quantity,
            price,
            commission,
            timestamp: bar.timestamp,
        });
    }

    fn build_result<S: Strategy + ?Sized>(
        &self,
        strategy: &S,
        instrument: &str,
        state: SimulationState,
        final_equity: Decimal,
        status: RunStatus,
        bars_processed: usize,
        periods_per_year: f64,
    ) -> BacktestResult {
        let equity_curve = state.equity.into_points();
        let performance = PerformanceSummary::compute_with_final(
            self.config.starting_balance,
            final_equity,
            &equity_curve,
            &state.trades,
            periods_per_year,
        );

        BacktestResult {
            strategy_name: strategy.name().to_string(),
            strategy_params: strategy.parameters(),
            instrument: instrument.to_string(),
            status,
            bars_processed,
            starting_balance: self.config.starting_balance,
            final_equity: performance.final_equity,
            trades: state.trades,
            equity_curve,
            open_position: state.position,
            performance,
            completed_at: Utc::now(),
        }
    }
}
