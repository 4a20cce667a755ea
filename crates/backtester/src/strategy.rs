//! Strategy interface for the bar replay loop.

use anyhow::Result;
use chrono::{DateTime, Utc};
use risk_manager::RiskViolation;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use trading_core::{Bar, OrderIntent, OrderSide, PositionSide};

use crate::position::BacktestPosition;

/// Read-only view of the simulation handed to the strategy on each bar.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    /// Zero-based index of the current bar.
    pub bar_index: usize,
    /// Open position, if any.
    pub position: Option<BacktestPosition>,
    /// Realized cash balance.
    pub cash: Decimal,
    /// Mark-to-market equity at this bar's close.
    pub equity: Decimal,
    /// Drawdown from peak at this bar.
    pub drawdown: f64,
    /// Average true range, once enough bars have been seen.
    pub atr: Option<Decimal>,
    /// ATR-based quantity suggested by the risk engine (zero without ATR).
    pub suggested_quantity: Decimal,
}

impl StrategyContext {
    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    pub fn position_side(&self) -> Option<PositionSide> {
        self.position.as_ref().map(|p| p.side)
    }
}

/// A simulated execution reported back to the strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub intent_id: uuid::Uuid,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Decision logic driven by the simulator, one bar at a time.
///
/// `on_bar` is synchronous and must not block; it returns at most one order.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn parameters(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Decide on an order for the current bar.
    fn on_bar(&mut self, bar: &Bar, ctx: &StrategyContext) -> Result<Option<OrderIntent>>;

    /// Called after an order returned by `on_bar` is filled.
    fn on_fill(&mut self, _fill: &Fill) {}

    /// Called when the risk engine refuses an order returned by `on_bar`.
    fn on_rejection(&mut self, _intent: &OrderIntent, _violation: &RiskViolation) {}
}

/// Strategy backed by a closure.
pub struct FnStrategy<F> {
    name: String,
    decide: F,
}

impl<F> FnStrategy<F>
where
    F: FnMut(&Bar, &StrategyContext) -> Result<Option<OrderIntent>> + Send,
{
    pub fn new(name: impl Into<String>, decide: F) -> Self {
        Self {
            name: name.into(),
            decide,
        }
    }
}

impl<F> Strategy for FnStrategy<F>
where
    F: FnMut(&Bar, &StrategyContext) -> Result<Option<OrderIntent>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_bar(&mut self, bar: &Bar, ctx: &StrategyContext) -> Result<Option<OrderIntent>> {
        (self.decide)(bar, ctx)
    }
}

/// Long-only simple moving average crossover.
///
/// Enters when the fast SMA crosses above the slow SMA, sized by the
/// context's suggested quantity (whole units). Exits the full position when
/// the fast SMA crosses back below.
#[derive(Debug, Clone)]
pub struct MovingAverageCrossover {
    fast: usize,
    slow: usize,
    closes: VecDeque<Decimal>,
    fast_above: Option<bool>,
}

impl MovingAverageCrossover {
    pub fn new(fast: usize, slow: usize) -> anyhow::Result<Self> {
        if fast == 0 || slow <= fast {
            anyhow::bail!("need 0 < fast < slow, got fast={fast} slow={slow}");
        }
        Ok(Self {
            fast,
            slow,
            closes: VecDeque::with_capacity(slow + 1),
            fast_above: None,
        })
    }

    fn sma(&self, period: usize) -> Decimal {
        let sum: Decimal = self.closes.iter().rev().take(period).sum();
        sum / Decimal::from(period)
    }
}

impl Default for MovingAverageCrossover {
    fn default() -> Self {
        Self {
            fast: 10,
            slow: 30,
            closes: VecDeque::with_capacity(31),
            fast_above: None,
        }
    }
}

impl Strategy for MovingAverageCrossover {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn parameters(&self) -> HashMap<String, String> {
        HashMap::from([
            ("fast".to_string(), self.fast.to_string()),
            ("slow".to_string(), self.slow.to_string()),
        ])
    }

    fn on_bar(&mut self, bar: &Bar, ctx: &StrategyContext) -> Result<Option<OrderIntent>> {
        self.closes.push_back(bar.close);
        if self.closes.len() > self.slow {
            self.closes.pop_front();
        }
        if self.closes.len() < self.slow {
            return Ok(None);
        }

        let above = self.sma(self.fast) > self.sma(self.slow);
        let previous = self.fast_above.replace(above);

        let order = match (previous, above, &ctx.position) {
            (Some(false), true, None) => {
                let quantity = ctx.suggested_quantity.floor();
                (quantity > Decimal::ZERO).then(|| {
                    OrderIntent::market(&ctx.instrument, OrderSide::Buy, quantity).with_reference_price(bar.close)
                })
            }
            (Some(true), false, Some(pos)) if pos.side == PositionSide::Long => Some(
                OrderIntent::market(&ctx.instrument, OrderSide::Sell, pos.quantity).with_reference_price(bar.close),
            ),
            _ => None,
        };
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ctx(position: Option<BacktestPosition>) -> StrategyContext {
        StrategyContext {
            instrument: "AAPL".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            bar_index: 0,
            position,
            cash: Decimal::new(100_000, 0),
            equity: Decimal::new(100_000, 0),
            drawdown: 0.0,
            atr: Some(Decimal::ONE),
            suggested_quantity: Decimal::new(255, 1),
        }
    }

    fn bar(i: i64, close: i64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i);
        Bar::flat(ts, Decimal::new(close, 0))
    }

    #[test]
    fn test_invalid_periods_rejected() {
        assert!(MovingAverageCrossover::new(0, 5).is_err());
        assert!(MovingAverageCrossover::new(5, 5).is_err());
        assert!(MovingAverageCrossover::new(2, 5).is_ok());
    }

    #[test]
    fn test_crossover_enters_and_exits() {
        let mut strategy = MovingAverageCrossover::new(2, 3).unwrap();
        let flat = ctx(None);

        // Falling then rising: fast crosses above slow on the 5th bar.
        let closes = [10, 9, 8, 8];
        for (i, c) in closes.iter().enumerate() {
            assert!(strategy.on_bar(&bar(i as i64, *c), &flat).unwrap().is_none());
        }
        let entry = strategy.on_bar(&bar(4, 14), &flat).unwrap().unwrap();
        assert_eq!(entry.side, OrderSide::Buy);
        assert_eq!(entry.quantity, Decimal::new(25, 0));
        assert_eq!(entry.reference_price, Some(Decimal::new(14, 0)));

        let held = BacktestPosition::open(
            "AAPL",
            PositionSide::Long,
            Decimal::new(25, 0),
            Decimal::new(14, 0),
            Decimal::ZERO,
            bar(4, 14).timestamp,
        );
        let in_position = ctx(Some(held));
        assert!(strategy.on_bar(&bar(5, 15), &in_position).unwrap().is_none());
        let exit = strategy.on_bar(&bar(6, 5), &in_position).unwrap().unwrap();
        assert_eq!(exit.side, OrderSide::Sell);
        assert_eq!(exit.quantity, Decimal::new(25, 0));
    }

    #[test]
    fn test_fn_strategy_delegates() {
        let mut calls = 0;
        let mut strategy = FnStrategy::new("counter", |_bar: &Bar, _ctx: &StrategyContext| {
            calls += 1;
            Ok(None)
        });
        strategy.on_bar(&bar(0, 10), &ctx(None)).unwrap();
        strategy.on_bar(&bar(1, 10), &ctx(None)).unwrap();
        assert_eq!(strategy.name(), "counter");
        drop(strategy);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_parameters() {
        let params = MovingAverageCrossover::new(5, 20).unwrap().parameters();
        assert_eq!(params.get("fast").map(String::as_str), Some("5"));
        assert_eq!(params.get("slow").map(String::as_str), Some("20"));
    }
}
