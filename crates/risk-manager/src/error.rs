//! Reasons an order can be refused by the risk engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::circuit_breaker::BreakerKind;

/// A rejected authorization. Each variant carries the measured value and
/// the configured limit so callers can render an actionable message.
///
/// A rejection never changes engine state.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskViolation {
    #[error("{instrument}: order notional {notional} is {size_pct}% of equity, limit {limit_pct}%")]
    PositionSize {
        instrument: String,
        notional: Decimal,
        size_pct: Decimal,
        limit_pct: Decimal,
    },

    #[error("{instrument}: {open_positions} positions already open, limit {limit}")]
    ConcurrentPositions {
        instrument: String,
        open_positions: usize,
        limit: usize,
    },

    #[error("{instrument}: circuit breaker {breaker} tripped: {reason}")]
    CircuitBreaker {
        instrument: String,
        breaker: BreakerKind,
        reason: String,
    },

    #[error("daily loss {loss_pct}% exceeds limit {limit_pct}%")]
    DailyLoss { loss_pct: Decimal, limit_pct: Decimal },

    #[error("weekly loss {loss_pct}% exceeds limit {limit_pct}%")]
    WeeklyLoss { loss_pct: Decimal, limit_pct: Decimal },

    #[error("{instrument}: market order has no reference price")]
    MissingReferencePrice { instrument: String },

    #[error("{instrument}: order price {price} must be positive")]
    InvalidPrice { instrument: String, price: Decimal },

    #[error("{instrument}: notional of {quantity} at {price} is not representable")]
    NotionalOverflow {
        instrument: String,
        quantity: Decimal,
        price: Decimal,
    },

    #[error("{instrument}: order quantity {quantity} must be positive")]
    InvalidQuantity { instrument: String, quantity: Decimal },

    #[error("account equity {equity} must be positive")]
    NonPositiveEquity { equity: Decimal },
}

/// Stable code for a [`RiskViolation`], independent of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationKind {
    PositionSize,
    ConcurrentPositions,
    CircuitBreaker,
    DailyLoss,
    WeeklyLoss,
    MissingReferencePrice,
    InvalidPrice,
    NotionalOverflow,
    InvalidQuantity,
    NonPositiveEquity,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::PositionSize => "POSITION_SIZE",
            ViolationKind::ConcurrentPositions => "CONCURRENT_POSITIONS",
            ViolationKind::CircuitBreaker => "CIRCUIT_BREAKER",
            ViolationKind::DailyLoss => "DAILY_LOSS",
            ViolationKind::WeeklyLoss => "WEEKLY_LOSS",
            ViolationKind::MissingReferencePrice => "MISSING_REFERENCE_PRICE",
            ViolationKind::InvalidPrice => "INVALID_PRICE",
            ViolationKind::NotionalOverflow => "NOTIONAL_OVERFLOW",
            ViolationKind::InvalidQuantity => "INVALID_QUANTITY",
            ViolationKind::NonPositiveEquity => "NON_POSITIVE_EQUITY",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RiskViolation {
    pub fn kind(&self) -> ViolationKind {
        match self {
            RiskViolation::PositionSize { .. } => ViolationKind::PositionSize,
            RiskViolation::ConcurrentPositions { .. } => ViolationKind::ConcurrentPositions,
            RiskViolation::CircuitBreaker { .. } => ViolationKind::CircuitBreaker,
            RiskViolation::DailyLoss { .. } => ViolationKind::DailyLoss,
            RiskViolation::WeeklyLoss { .. } => ViolationKind::WeeklyLoss,
            RiskViolation::MissingReferencePrice { .. } => ViolationKind::MissingReferencePrice,
            RiskViolation::InvalidPrice { .. } => ViolationKind::InvalidPrice,
            RiskViolation::NotionalOverflow { .. } => ViolationKind::NotionalOverflow,
            RiskViolation::InvalidQuantity { .. } => ViolationKind::InvalidQuantity,
            RiskViolation::NonPositiveEquity { .. } => ViolationKind::NonPositiveEquity,
        }
    }

    /// True for rejections caused by malformed input rather than a limit.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self.kind(),
            ViolationKind::MissingReferencePrice
                | ViolationKind::InvalidPrice
                | ViolationKind::NotionalOverflow
                | ViolationKind::InvalidQuantity
                | ViolationKind::NonPositiveEquity
        )
    }
}
