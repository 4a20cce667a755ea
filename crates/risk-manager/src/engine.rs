//! Pre-trade risk engine.
//!
//! Owns the position ledger, loss windows and circuit breakers behind a
//! single lock. Every public operation holds the lock for its full duration,
//! so an authorization sees one consistent view of positions, breakers and
//! both loss windows, and no fill can land halfway through a decision.

use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use trading_core::{OrderIntent, PositionSide};

use crate::circuit_breaker::{BreakerKind, CircuitBreakerRegistry, CircuitBreakerState};
use crate::clock::{Clock, SystemClock};
use crate::config::RiskConfig;
use crate::error::RiskViolation;
use crate::loss_window::LossWindowState;
use crate::position_ledger::{FillOutcome, Position, PositionLedger};

struct EngineState {
    ledger: PositionLedger,
    losses: LossWindowState,
    breakers: CircuitBreakerRegistry,
}

/// Shared, long-lived risk gate. Wrap in an `Arc` to share between the
/// order path, the fill path and breaker triggers.
pub struct RiskEngine {
    config: RiskConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<EngineState>,
}

impl RiskEngine {
    /// Create an engine on wall-clock time.
    pub fn new(config: RiskConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an engine on an explicit time source.
    pub fn with_clock(config: RiskConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            state: Mutex::new(EngineState {
                ledger: PositionLedger::new(config.flip_policy),
                losses: LossWindowState::new(now),
                breakers: CircuitBreakerRegistry::new(),
            }),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Decide whether `order` may be placed given current `equity`.
    ///
    /// Checks run in a fixed order and stop at the first failure: position
    /// size, concurrent positions, circuit breaker, daily loss, weekly loss.
    /// A rejection leaves engine state untouched apart from lazy window rolls.
    pub async fn authorize(&self, order: &OrderIntent, equity: Decimal) -> Result<(), RiskViolation> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let result = self.check(&mut state, order, equity, now);
        match &result {
            Ok(()) => debug!(
                instrument = %order.instrument,
                side = ?order.side,
                quantity = %order.quantity,
                "Order authorized"
            ),
            Err(violation) => warn!(
                instrument = %order.instrument,
                kind = %violation.kind(),
                "Order rejected: {}",
                violation
            ),
        }
        result
    }

    fn check(
        &self,
        state: &mut EngineState,
        order: &OrderIntent,
        equity: Decimal,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), RiskViolation> {
        let instrument = &order.instrument;

        if equity <= Decimal::ZERO {
            return Err(RiskViolation::NonPositiveEquity { equity });
        }
        if order.quantity <= Decimal::ZERO {
            return Err(RiskViolation::InvalidQuantity {
                instrument: instrument.clone(),
                quantity: order.quantity,
            });
        }
        let price = order
            .effective_price()
            .ok_or_else(|| RiskViolation::MissingReferencePrice {
                instrument: instrument.clone(),
            })?;
        if price <= Decimal::ZERO {
            return Err(RiskViolation::InvalidPrice {
                instrument: instrument.clone(),
                price,
            });
        }
        let notional = order
            .notional()
            .ok_or_else(|| RiskViolation::NotionalOverflow {
                instrument: instrument.clone(),
                quantity: order.quantity,
                price,
            })?;

        // 1. Position size. Saturates so an unrepresentable ratio fails the limit.
        let size_pct = notional
            .checked_div(equity)
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .unwrap_or(Decimal::MAX);
        if size_pct > self.config.max_position_size_pct {
            return Err(RiskViolation::PositionSize {
                instrument: instrument.clone(),
                notional,
                size_pct,
                limit_pct: self.config.max_position_size_pct,
            });
        }

        // 2. Concurrent positions
        let open_positions = state.ledger.len();
        if !state.ledger.contains(instrument) && open_positions >= self.config.max_concurrent_positions {
            return Err(RiskViolation::ConcurrentPositions {
                instrument: instrument.clone(),
                open_positions,
                limit: self.config.max_concurrent_positions,
            });
        }

        // 3. Circuit breaker
        if let Some(breaker) = state.breakers.active(instrument) {
            return Err(RiskViolation::CircuitBreaker {
                instrument: instrument.clone(),
                breaker: breaker.kind.clone(),
                reason: breaker.reason.clone(),
            });
        }

        // 4. Daily loss
        let daily_pct = state.losses.daily_loss_percent(equity, now);
        if daily_pct > self.config.max_daily_loss_pct {
            return Err(RiskViolation::DailyLoss {
                loss_pct: daily_pct,
                limit_pct: self.config.max_daily_loss_pct,
            });
        }

        // 5. Weekly loss
        let weekly_pct = state.losses.weekly_loss_percent(equity, now);
        if weekly_pct > self.config.max_weekly_loss_pct {
            return Err(RiskViolation::WeeklyLoss {
                loss_pct: weekly_pct,
                limit_pct: self.config.max_weekly_loss_pct,
            });
        }

        Ok(())
    }

    /// Record a confirmed fill. Fills are facts: this never fails.
    pub async fn on_fill(&self, instrument: &str, quantity: Decimal, price: Decimal, side: PositionSide) -> FillOutcome {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let outcome = state.ledger.apply_fill(instrument, quantity, price, side, now);
        match &outcome {
            FillOutcome::Opened => info!(
                instrument = %instrument,
                side = %side,
                quantity = %quantity,
                price = %price,
                "Position opened"
            ),
            FillOutcome::Closed { discarded } => {
                info!(instrument = %instrument, price = %price, "Position closed");
                if *discarded > Decimal::ZERO {
                    warn!(
                        instrument = %instrument,
                        discarded = %discarded,
                        "Fill exceeded position size; excess discarded"
                    );
                }
            }
            FillOutcome::Reversed { excess } => info!(
                instrument = %instrument,
                side = %side,
                quantity = %excess,
                price = %price,
                "Position reversed"
            ),
            FillOutcome::Ignored => warn!(
                instrument = %instrument,
                quantity = %quantity,
                price = %price,
                "Ignoring fill with non-positive quantity or price"
            ),
            FillOutcome::Increased | FillOutcome::Reduced { .. } => debug!(
                instrument = %instrument,
                side = %side,
                quantity = %quantity,
                price = %price,
                "Position updated"
            ),
        }
        outcome
    }

    /// Record realized PnL of a closed trade. Call once per round trip.
    pub async fn record_realized_pnl(&self, amount: Decimal) {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        state.losses.record_realized_pnl(amount, now);
        debug!(
            pnl = %amount,
            daily_loss = %state.losses.daily_loss,
            weekly_loss = %state.losses.weekly_loss,
            "Realized PnL recorded"
        );
    }

    /// Block new orders for `instrument` until [`reset_breaker`](Self::reset_breaker).
    pub async fn trip_breaker(&self, instrument: &str, kind: BreakerKind, reason: impl Into<String>) {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        state.breakers.trip(instrument, kind, reason, now);
    }

    pub async fn reset_breaker(&self, instrument: &str) {
        let mut state = self.state.lock().await;
        state.breakers.reset(instrument);
    }

    /// Suggested quantity that risks `risk_per_trade_pct` of `equity` over
    /// one ATR move. Advisory only; the order must still pass `authorize`.
    pub fn size_for_risk(&self, instrument: &str, atr: Decimal, equity: Decimal) -> Decimal {
        if atr <= Decimal::ZERO || equity <= Decimal::ZERO {
            warn!(
                instrument = %instrument,
                atr = %atr,
                equity = %equity,
                "Cannot size position without positive ATR and equity"
            );
            return Decimal::ZERO;
        }
        let quantity = equity
            .checked_mul(self.config.risk_per_trade_pct)
            .and_then(|amount| amount.checked_div(Decimal::ONE_HUNDRED))
            .and_then(|amount| amount.checked_div(atr));
        quantity.unwrap_or_else(|| {
            warn!(
                instrument = %instrument,
                atr = %atr,
                equity = %equity,
                "Risk-based size overflowed"
            );
            Decimal::ZERO
        })
    }

    pub async fn position(&self, instrument: &str) -> Option<Position> {
        self.state.lock().await.ledger.get(instrument).cloned()
    }

    pub async fn positions(&self) -> Vec<Position> {
        self.state.lock().await.ledger.snapshot()
    }

    /// Whether new orders for `instrument` are currently blocked by a breaker.
    pub async fn is_tripped(&self, instrument: &str) -> bool {
        self.state.lock().await.breakers.is_tripped(instrument)
    }

    pub async fn breaker(&self, instrument: &str) -> Option<CircuitBreakerState> {
        self.state.lock().await.breakers.get(instrument).cloned()
    }

    pub async fn breakers(&self) -> Vec<CircuitBreakerState> {
        self.state.lock().await.breakers.tripped()
    }

    /// Loss accumulators as of now (windows rolled first).
    pub async fn loss_state(&self) -> LossWindowState {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        state.losses.roll(now);
        state.losses.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::FlipPolicy;
    use crate::error::ViolationKind;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tokio_test::{assert_err, assert_ok};
    use trading_core::OrderSide;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn friday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap()
    }

    fn engine_at(config: RiskConfig, now: DateTime<Utc>) -> (RiskEngine, ManualClock) {
        let clock = ManualClock::new(now);
        (RiskEngine::with_clock(config, Arc::new(clock.clone())), clock)
    }

    fn buy(instrument: &str, qty: i64, price: i64) -> OrderIntent {
        OrderIntent::limit(instrument, OrderSide::Buy, dec(qty), dec(price))
    }

    #[tokio::test]
    async fn test_authorize_within_limits() {
        let engine = RiskEngine::new(RiskConfig::default());
        assert_ok!(engine.authorize(&buy("AAPL", 10, 150), dec(100_000)).await);
    }

    #[tokio::test]
    async fn test_position_size_rejection() {
        let engine = RiskEngine::new(RiskConfig::default());
        // 100 * 150 = 15_000 = 15% of 100k
        let err = assert_err!(engine.authorize(&buy("AAPL", 100, 150), dec(100_000)).await);

        match err {
            RiskViolation::PositionSize {
                notional,
                size_pct,
                limit_pct,
                ..
            } => {
                assert_eq!(notional, dec(15_000));
                assert_eq!(size_pct, dec(15));
                assert_eq!(limit_pct, dec(10));
            }
            other => panic!("unexpected violation {other:?}"),
        }
        assert!(engine.positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_position_size_at_limit_passes() {
        let engine = RiskEngine::new(RiskConfig::default());
        // exactly 10%
        assert_ok!(engine.authorize(&buy("AAPL", 100, 100), dec(100_000)).await);
    }

    #[tokio::test]
    async fn test_market_order_requires_reference_price() {
        let engine = RiskEngine::new(RiskConfig::default());
        let order = OrderIntent::market("AAPL", OrderSide::Buy, dec(10));

        let err = assert_err!(engine.authorize(&order, dec(100_000)).await);
        assert_eq!(err.kind(), ViolationKind::MissingReferencePrice);

        let priced = order.with_reference_price(dec(150));
        assert_ok!(engine.authorize(&priced, dec(100_000)).await);
    }

    #[tokio::test]
    async fn test_input_validation() {
        let engine = RiskEngine::new(RiskConfig::default());

        let err = assert_err!(engine.authorize(&buy("AAPL", 1, 150), Decimal::ZERO).await);
        assert_eq!(err.kind(), ViolationKind::NonPositiveEquity);

        let err = assert_err!(engine.authorize(&buy("AAPL", 0, 150), dec(100_000)).await);
        assert_eq!(err.kind(), ViolationKind::InvalidQuantity);
    }

    #[tokio::test]
    async fn test_non_positive_price_rejected() {
        let engine = RiskEngine::new(RiskConfig::default());
        let equity = dec(100_000);

        let zero = OrderIntent::limit("AAPL", OrderSide::Buy, dec(1_000_000), dec(0));
        let err = assert_err!(engine.authorize(&zero, equity).await);
        assert_eq!(
            err,
            RiskViolation::InvalidPrice {
                instrument: "AAPL".to_string(),
                price: Decimal::ZERO,
            }
        );

        let negative = OrderIntent::limit("AAPL", OrderSide::Buy, dec(1_000_000), dec(-1));
        let err = assert_err!(engine.authorize(&negative, equity).await);
        assert_eq!(err.kind(), ViolationKind::InvalidPrice);

        let short = OrderIntent::limit("AAPL", OrderSide::Sell, dec(10), dec(-5));
        let err = assert_err!(engine.authorize(&short, equity).await);
        assert_eq!(err.kind(), ViolationKind::InvalidPrice);

        assert!(engine.positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_overflowing_notional_rejected() {
        let engine = RiskEngine::new(RiskConfig::default());

        let order = OrderIntent::limit("AAPL", OrderSide::Buy, Decimal::MAX, dec(2));
        let err = assert_err!(engine.authorize(&order, dec(100_000)).await);
        assert_eq!(
            err,
            RiskViolation::NotionalOverflow {
                instrument: "AAPL".to_string(),
                quantity: Decimal::MAX,
                price: dec(2),
            }
        );
        assert!(err.is_input_error());

        // Representable notional, unrepresentable ratio to a tiny equity
        let order = OrderIntent::limit("AAPL", OrderSide::Buy, Decimal::MAX, Decimal::ONE);
        let err = assert_err!(engine.authorize(&order, Decimal::new(1, 20)).await);
        assert_eq!(err.kind(), ViolationKind::PositionSize);
    }

    #[tokio::test]
    async fn test_concurrent_position_limit() {
        let config = RiskConfig {
            max_concurrent_positions: 1,
            ..Default::default()
        };
        let engine = RiskEngine::new(config);
        engine.on_fill("AAPL", dec(10), dec(150), PositionSide::Long).await;

        let err = assert_err!(engine.authorize(&buy("MSFT", 5, 400), dec(100_000)).await);
        assert_eq!(
            err,
            RiskViolation::ConcurrentPositions {
                instrument: "MSFT".to_string(),
                open_positions: 1,
                limit: 1,
            }
        );

        // Adding to an existing position does not count as a new one.
        assert_ok!(engine.authorize(&buy("AAPL", 5, 150), dec(100_000)).await);
    }

    #[tokio::test]
    async fn test_breaker_blocks_until_reset() {
        let engine = RiskEngine::new(RiskConfig::default());
        engine.trip_breaker("AAPL", BreakerKind::Volatility, "halted").await;
        assert!(engine.is_tripped("AAPL").await);
        assert!(!engine.is_tripped("MSFT").await);

        let err = assert_err!(engine.authorize(&buy("AAPL", 1, 150), dec(100_000)).await);
        assert_eq!(err.kind(), ViolationKind::CircuitBreaker);
        assert_ok!(engine.authorize(&buy("MSFT", 1, 400), dec(100_000)).await);

        assert_eq!(engine.breakers().await.len(), 1);
        engine.reset_breaker("AAPL").await;
        assert!(engine.breaker("AAPL").await.is_none());
        assert!(!engine.is_tripped("AAPL").await);
        assert_ok!(engine.authorize(&buy("AAPL", 1, 150), dec(100_000)).await);
    }

    #[tokio::test]
    async fn test_position_size_checked_before_breaker() {
        let engine = RiskEngine::new(RiskConfig::default());
        engine.trip_breaker("AAPL", BreakerKind::Manual, "ops").await;

        let err = assert_err!(engine.authorize(&buy("AAPL", 100, 150), dec(100_000)).await);
        assert_eq!(err.kind(), ViolationKind::PositionSize);
    }

    #[tokio::test]
    async fn test_daily_and_weekly_loss_limits() {
        let config = RiskConfig {
            max_daily_loss_pct: dec(1),
            max_weekly_loss_pct: dec(3),
            ..Default::default()
        };
        let (engine, clock) = engine_at(config, friday());
        let equity = dec(10_000);

        // 200 loss today = 2% > 1%
        engine.record_realized_pnl(dec(-200)).await;
        let err = assert_err!(engine.authorize(&buy("AAPL", 1, 100), equity).await);
        assert_eq!(
            err,
            RiskViolation::DailyLoss {
                loss_pct: dec(2),
                limit_pct: dec(1),
            }
        );

        // Saturday: daily window rolls, weekly still holds 200 (2% < 3%).
        clock.advance(Duration::days(1));
        assert_ok!(engine.authorize(&buy("AAPL", 1, 100), equity).await);

        // Another 200 => weekly 400 = 4% > 3%; daily 2% > 1% trips first.
        engine.record_realized_pnl(dec(-200)).await;
        let err = assert_err!(engine.authorize(&buy("AAPL", 1, 100), equity).await);
        assert_eq!(err.kind(), ViolationKind::DailyLoss);

        // Sunday, still the same ISO week: only the weekly limit fails.
        clock.advance(Duration::days(1));
        let err = assert_err!(engine.authorize(&buy("AAPL", 1, 100), equity).await);
        assert_eq!(
            err,
            RiskViolation::WeeklyLoss {
                loss_pct: dec(4),
                limit_pct: dec(3),
            }
        );

        // Monday: new ISO week.
        clock.advance(Duration::days(1));
        assert_ok!(engine.authorize(&buy("AAPL", 1, 100), equity).await);
        let losses = engine.loss_state().await;
        assert_eq!(losses.daily_loss, Decimal::ZERO);
        assert_eq!(losses.weekly_loss, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_profit_does_not_offset_losses() {
        let (engine, _clock) = engine_at(RiskConfig::default(), friday());
        engine.record_realized_pnl(dec(-150)).await;
        engine.record_realized_pnl(dec(1_000)).await;

        let losses = engine.loss_state().await;
        assert_eq!(losses.daily_loss, dec(150));
        assert_eq!(losses.weekly_loss, dec(150));
    }

    #[tokio::test]
    async fn test_rejection_leaves_state_unchanged() {
        let (engine, _clock) = engine_at(RiskConfig::default(), friday());
        engine.on_fill("AAPL", dec(10), dec(150), PositionSide::Long).await;
        engine.record_realized_pnl(dec(-100)).await;
        let before_positions = engine.positions().await;
        let before_losses = engine.loss_state().await;

        assert_err!(engine.authorize(&buy("AAPL", 1_000, 150), dec(100_000)).await);

        assert_eq!(engine.positions().await, before_positions);
        assert_eq!(engine.loss_state().await, before_losses);
    }

    #[tokio::test]
    async fn test_on_fill_lifecycle() {
        let engine = RiskEngine::new(RiskConfig::default());
        assert_eq!(
            engine.on_fill("AAPL", dec(10), dec(100), PositionSide::Long).await,
            FillOutcome::Opened
        );
        assert_eq!(
            engine.on_fill("AAPL", dec(10), dec(110), PositionSide::Long).await,
            FillOutcome::Increased
        );
        let pos = engine.position("AAPL").await.unwrap();
        assert_eq!(pos.avg_price, dec(105));

        assert_eq!(
            engine.on_fill("AAPL", dec(25), dec(120), PositionSide::Short).await,
            FillOutcome::Closed { discarded: dec(5) }
        );
        assert!(engine.position("AAPL").await.is_none());
    }

    #[tokio::test]
    async fn test_reverse_flip_policy() {
        let config = RiskConfig {
            flip_policy: FlipPolicy::Reverse,
            ..Default::default()
        };
        let engine = RiskEngine::new(config);
        engine.on_fill("AAPL", dec(10), dec(100), PositionSide::Long).await;
        engine.on_fill("AAPL", dec(12), dec(95), PositionSide::Short).await;

        let pos = engine.position("AAPL").await.unwrap();
        assert_eq!(pos.side, PositionSide::Short);
        assert_eq!(pos.quantity, dec(2));
    }

    #[tokio::test]
    async fn test_size_for_risk() {
        let engine = RiskEngine::new(RiskConfig::default());
        // 100_000 * 0.25% = 250 risk; ATR 2.5 => 100 units
        assert_eq!(
            engine.size_for_risk("AAPL", Decimal::new(25, 1), dec(100_000)),
            dec(100)
        );
        assert_eq!(engine.size_for_risk("AAPL", Decimal::ZERO, dec(100_000)), Decimal::ZERO);
        assert_eq!(engine.size_for_risk("AAPL", dec(2), dec(-1)), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_concurrent_authorizations_share_one_view() {
        let config = RiskConfig {
            max_concurrent_positions: 1,
            ..Default::default()
        };
        let engine = Arc::new(RiskEngine::new(config));

        let mut handles = Vec::new();
        for i in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let instrument = format!("SYM{i}");
                engine.on_fill(&instrument, dec(1), dec(10), PositionSide::Long).await;
                engine.authorize(&buy("NEW", 1, 10), dec(100_000)).await
            }));
        }
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.unwrap_err().kind(), ViolationKind::ConcurrentPositions);
        }
        assert_eq!(engine.positions().await.len(), 8);
    }
}
