//! Integration tests for component interactions.
//!
//! These tests verify that the risk engine and the backtester work together
//! correctly.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio_test::{assert_err, assert_ok};

use backtester::{
    BacktestSimulator, CancelSignal, DataQuery, FnStrategy, InMemoryDataStore, MovingAverageCrossover,
    RunStatus, SimulatorConfig, StrategyContext,
};
use risk_manager::{BreakerKind, FillOutcome, ManualClock, RiskConfig, RiskEngine, RiskViolation, ViolationKind};
use trading_core::{Bar, OrderIntent, OrderSide, PositionSide};

fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

fn start() -> DateTime<Utc> {
    // Tuesday
    Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
}

fn daily_flat(closes: &[i64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| Bar::flat(start() + Duration::days(i as i64), dec(*c)))
        .collect()
}

/// Bars spanning close +/- 1 so the ATR is never zero.
fn daily_ranged(closes: &[i64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| {
            Bar::new(
                start() + Duration::days(i as i64),
                dec(*c),
                dec(*c + 1),
                dec(*c - 1),
                dec(*c),
                dec(1_000),
            )
        })
        .collect()
}

fn buy(instrument: &str, qty: i64, price: i64) -> OrderIntent {
    OrderIntent::limit(instrument, OrderSide::Buy, dec(qty), dec(price))
}

/// Test the limits an operator would configure for a small account.
#[tokio::test]
async fn test_position_and_concurrency_limits() {
    let config = RiskConfig {
        max_position_size_pct: dec(10),
        max_daily_loss_pct: dec(2),
        max_concurrent_positions: 1,
        ..Default::default()
    };
    let engine = RiskEngine::new(config);
    let equity = dec(100_000);

    // 15,000 notional = 15% of equity
    let err = assert_err!(engine.authorize(&buy("AAPL", 150, 100), equity).await);
    assert_eq!(err.kind(), ViolationKind::PositionSize);

    // 8,000 notional passes and fills
    assert_ok!(engine.authorize(&buy("AAPL", 80, 100), equity).await);
    let outcome = engine.on_fill("AAPL", dec(80), dec(100), PositionSide::Long).await;
    assert_eq!(outcome, FillOutcome::Opened);

    // A second instrument exceeds the single-position limit
    let err = assert_err!(engine.authorize(&buy("MSFT", 50, 100), equity).await);
    assert_eq!(
        err,
        RiskViolation::ConcurrentPositions {
            instrument: "MSFT".to_string(),
            open_positions: 1,
            limit: 1,
        }
    );

    // Adding to the existing instrument is still allowed
    assert_ok!(engine.authorize(&buy("AAPL", 10, 100), equity).await);
}

/// Test that a losing backtest trade, replayed into an engine, counts
/// against the daily loss window.
#[tokio::test]
async fn test_losing_trade_feeds_engine_loss_window() {
    let simulator = BacktestSimulator::new(InMemoryDataStore::new(), SimulatorConfig::default());
    let mut strategy = FnStrategy::new("round_trip", |bar: &Bar, ctx: &StrategyContext| {
        let order = match (ctx.bar_index, &ctx.position) {
            (0, None) => Some(OrderIntent::market(&ctx.instrument, OrderSide::Buy, dec(10))),
            (1, Some(pos)) => Some(
                OrderIntent::market(&ctx.instrument, OrderSide::Sell, pos.quantity)
                    .with_reference_price(bar.close),
            ),
            _ => None,
        };
        Ok(order)
    });

    let result = assert_ok!(
        simulator
            .replay("AAPL", &daily_flat(&[100, 90]), &mut strategy, &CancelSignal::new())
            .await
    );
    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].pnl, dec(-100));
    assert_eq!(result.performance.win_rate, 0.0);
    assert_eq!(result.performance.profit_factor, 0.0);

    let clock = ManualClock::new(start() + Duration::hours(12));
    let engine = RiskEngine::with_clock(RiskConfig::default(), Arc::new(clock.clone()));
    for trade in &result.trades {
        engine.record_realized_pnl(trade.pnl).await;
    }

    let losses = engine.loss_state().await;
    assert_eq!(losses.daily_loss, dec(100));
    assert_eq!(losses.weekly_loss, dec(100));
}

/// Test that a flat price series produces no drawdown and no return.
#[tokio::test]
async fn test_flat_series_backtest() {
    let store = InMemoryDataStore::new().with_bars("SPY", daily_flat(&[400; 30]));
    let simulator = BacktestSimulator::new(store, SimulatorConfig::default());
    let mut strategy = FnStrategy::new("hold", |_bar: &Bar, ctx: &StrategyContext| {
        Ok((ctx.bar_index == 0)
            .then(|| OrderIntent::market(&ctx.instrument, OrderSide::Buy, dec(10)).with_reference_price(dec(400))))
    });

    let query = DataQuery::range("SPY", start(), start() + Duration::days(29));
    let result = assert_ok!(simulator.run(&mut strategy, &query, &CancelSignal::new()).await);

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.bars_processed, 30);
    assert_eq!(result.performance.max_drawdown, 0.0);
    assert_eq!(result.performance.total_return, 0.0);
    assert_eq!(result.final_equity, result.starting_balance);
}

/// Test that a monotonically rising series held long never draws down.
#[tokio::test]
async fn test_rising_series_backtest() {
    let simulator = BacktestSimulator::new(InMemoryDataStore::new(), SimulatorConfig::default());
    let mut strategy = FnStrategy::new("hold", |bar: &Bar, ctx: &StrategyContext| {
        Ok(ctx
            .is_flat()
            .then(|| OrderIntent::market(&ctx.instrument, OrderSide::Buy, dec(50)).with_reference_price(bar.close)))
    });
    let closes: Vec<i64> = (100..150).collect();

    let result = assert_ok!(
        simulator
            .replay("QQQ", &daily_flat(&closes), &mut strategy, &CancelSignal::new())
            .await
    );

    assert_eq!(result.performance.max_drawdown, 0.0);
    assert!(result.equity_curve.iter().all(|p| p.drawdown == 0.0));
    assert!(result.performance.total_return > 0.0);
    assert!(result.performance.cagr > 0.0);
}

/// Test that a tripped breaker blocks one instrument until reset.
#[tokio::test]
async fn test_breaker_lifecycle() {
    let engine = RiskEngine::new(RiskConfig::default());
    let equity = dec(100_000);

    engine
        .trip_breaker("AAPL", BreakerKind::Connectivity, "feed disconnected")
        .await;

    let err = assert_err!(engine.authorize(&buy("AAPL", 1, 100), equity).await);
    assert_eq!(
        err,
        RiskViolation::CircuitBreaker {
            instrument: "AAPL".to_string(),
            breaker: BreakerKind::Connectivity,
            reason: "feed disconnected".to_string(),
        }
    );
    assert_ok!(engine.authorize(&buy("MSFT", 1, 100), equity).await);

    engine.reset_breaker("AAPL").await;
    assert_ok!(engine.authorize(&buy("AAPL", 1, 100), equity).await);
}

/// Test that loss windows roll on UTC day and ISO week boundaries.
#[tokio::test]
async fn test_loss_windows_roll_with_clock() {
    let config = RiskConfig {
        max_daily_loss_pct: dec(1),
        max_weekly_loss_pct: dec(2),
        ..Default::default()
    };
    // Sunday 2024-03-03, last day of ISO week 9
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 3, 23, 0, 0).unwrap());
    let engine = RiskEngine::with_clock(config, Arc::new(clock.clone()));
    let equity = dec(10_000);

    engine.record_realized_pnl(dec(-250)).await;
    let err = assert_err!(engine.authorize(&buy("AAPL", 1, 100), equity).await);
    assert_eq!(err.kind(), ViolationKind::DailyLoss);

    // Two hours later is Monday: both windows have rolled
    clock.advance(Duration::hours(2));
    assert_ok!(engine.authorize(&buy("AAPL", 1, 100), equity).await);

    let losses = engine.loss_state().await;
    assert_eq!(losses.daily_loss, Decimal::ZERO);
    assert_eq!(losses.weekly_loss, Decimal::ZERO);
}

/// Test ATR sizing and the moving average strategy end to end.
#[tokio::test]
async fn test_moving_average_crossover_end_to_end() {
    let config = SimulatorConfig {
        atr_period: 2,
        ..Default::default()
    };
    let simulator = BacktestSimulator::new(InMemoryDataStore::new(), config);
    let mut strategy = MovingAverageCrossover::new(2, 4).unwrap();

    // Fast SMA crosses above at 14, back below at 10
    let bars = daily_ranged(&[10, 9, 8, 8, 14, 15, 16, 10, 9]);
    let result = assert_ok!(
        simulator
            .replay("AAPL", &bars, &mut strategy, &CancelSignal::new())
            .await
    );

    assert_eq!(result.strategy_name, "ma_crossover");
    assert_eq!(result.strategy_params.get("slow").map(String::as_str), Some("4"));
    assert_eq!(result.trades.len(), 1);

    let trade = &result.trades[0];
    assert_eq!(trade.side, PositionSide::Long);
    assert_eq!(trade.entry_price, dec(14));
    assert_eq!(trade.exit_price, dec(10));
    assert!(trade.quantity > Decimal::ZERO);
    assert_eq!(trade.quantity, trade.quantity.floor());
    assert_eq!(trade.pnl, trade.quantity * dec(-4));

    assert!(result.open_position.is_none());
    assert_eq!(result.performance.total_trades, 1);
    assert_eq!(result.performance.losing_trades, 1);
    assert_eq!(result.final_equity, result.starting_balance + trade.pnl);
}
