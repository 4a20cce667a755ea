//! Net open position per instrument.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use trading_core::PositionSide;

use crate::config::FlipPolicy;

/// Open position for one instrument. Quantity is a positive magnitude; a
/// fully closed position is removed from the ledger, never zeroed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    pub quantity: Decimal,
    pub side: PositionSide,
    /// Volume-weighted average entry price.
    pub avg_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn notional(&self) -> Decimal {
        self.quantity.saturating_mul(self.avg_price)
    }

    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        self.side.pnl(self.avg_price, mark, self.quantity)
    }
}

/// What a fill did to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    /// New position created.
    Opened,
    /// Same-side fill merged into the existing position.
    Increased,
    /// Opposite-side fill smaller than the position.
    Reduced { remaining: Decimal },
    /// Position removed. `discarded` is the excess dropped under
    /// [`FlipPolicy::DiscardExcess`].
    Closed { discarded: Decimal },
    /// Position closed and the excess opened on the other side.
    Reversed { excess: Decimal },
    /// Non-positive quantity or price, or a cost basis that overflows;
    /// nothing changed.
    Ignored,
}

#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: HashMap<String, Position>,
    flip_policy: FlipPolicy,
}

impl PositionLedger {
    pub fn new(flip_policy: FlipPolicy) -> Self {
        Self {
            positions: HashMap::new(),
            flip_policy,
        }
    }

    /// Apply a confirmed fill of `quantity` at `price` in direction `side`.
    pub fn apply_fill(
        &mut self,
        instrument: &str,
        quantity: Decimal,
        price: Decimal,
        side: PositionSide,
        now: DateTime<Utc>,
    ) -> FillOutcome {
        if quantity <= Decimal::ZERO || price <= Decimal::ZERO {
            return FillOutcome::Ignored;
        }

        let Some(existing) = self.positions.get_mut(instrument) else {
            self.open(instrument, quantity, price, side, now);
            return FillOutcome::Opened;
        };

        if existing.side == side {
            let Some((total, avg_price)) = weighted_average(existing.quantity, existing.avg_price, quantity, price)
            else {
                return FillOutcome::Ignored;
            };
            existing.avg_price = avg_price;
            existing.quantity = total;
            existing.updated_at = now;
            return FillOutcome::Increased;
        }

        if quantity < existing.quantity {
            existing.quantity -= quantity;
            existing.updated_at = now;
            return FillOutcome::Reduced {
                remaining: existing.quantity,
            };
        }

        let excess = quantity - existing.quantity;
        self.positions.remove(instrument);

        match self.flip_policy {
            FlipPolicy::Reverse if excess > Decimal::ZERO => {
                self.open(instrument, excess, price, side, now);
                FillOutcome::Reversed { excess }
            }
            _ => FillOutcome::Closed { discarded: excess },
        }
    }

    fn open(
        &mut self,
        instrument: &str,
        quantity: Decimal,
        price: Decimal,
        side: PositionSide,
        now: DateTime<Utc>,
    ) {
        self.positions.insert(
            instrument.to_string(),
            Position {
                instrument: instrument.to_string(),
                quantity,
                side,
                avg_price: price,
                opened_at: now,
                updated_at: now,
            },
        );
    }

    pub fn get(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn contains(&self, instrument: &str) -> bool {
        self.positions.contains_key(instrument)
    }

    /// Number of instruments with an open position.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// All open positions, ordered by instrument.
    pub fn snapshot(&self) -> Vec<Position> {
        let mut all: Vec<_> = self.positions.values().cloned().collect();
        all.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        all
    }
}

/// Combined quantity and volume-weighted price, or `None` on overflow.
fn weighted_average(q1: Decimal, p1: Decimal, q2: Decimal, p2: Decimal) -> Option<(Decimal, Decimal)> {
    let total = q1.checked_add(q2)?;
    let cost = q1.checked_mul(p1)?.checked_add(q2.checked_mul(p2)?)?;
    Some((total, cost.checked_div(total)?))
}
