//! Open position bookkeeping inside a backtest run.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trading_core::PositionSide;

/// A position held by the simulator, plus what has been realized against it
/// so far. One round trip becomes one trade record when it fully closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestPosition {
    pub instrument: String,
    pub side: PositionSide,
    /// Remaining open quantity.
    pub quantity: Decimal,
    /// Volume-weighted average entry price.
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    /// Quantity closed so far.
    pub closed_quantity: Decimal,
    /// Sum of exit price * quantity over all reductions.
    pub exit_value: Decimal,
    /// Gross PnL realized by reductions so far.
    pub realized_pnl: Decimal,
    /// Commission paid on every fill of this round trip.
    pub commission: Decimal,
}

impl BacktestPosition {
    pub fn open(
        instrument: &str,
        side: PositionSide,
        quantity: Decimal,
        price: Decimal,
        commission: Decimal,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            instrument: instrument.to_string(),
            side,
            quantity,
            entry_price: price,
            entry_time: time,
            closed_quantity: Decimal::ZERO,
            exit_value: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            commission,
        }
    }

    /// Same-side fill.
    pub fn add(&mut self, quantity: Decimal, price: Decimal, commission: Decimal) {
        let total = self.quantity + quantity;
        self.entry_price = (self.quantity * self.entry_price + quantity * price) / total;
        self.quantity = total;
        self.commission += commission;
    }

    /// Opposite-side fill of at most the open quantity. Returns the gross
    /// PnL realized by this reduction.
    pub fn reduce(&mut self, quantity: Decimal, price: Decimal, commission: Decimal) -> Decimal {
        let quantity = quantity.min(self.quantity);
        let pnl = self.side.pnl(self.entry_price, price, quantity);

        self.quantity -= quantity;
        self.closed_quantity += quantity;
        self.exit_value += quantity * price;
        self.realized_pnl += pnl;
        self.commission += commission;
        pnl
    }

    pub fn is_closed(&self) -> bool {
        self.quantity <= Decimal::ZERO
    }

    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        self.side.pnl(self.entry_price, mark, self.quantity)
    }

    /// Quantity-weighted exit price over all reductions.
    pub fn avg_exit_price(&self) -> Option<Decimal> {
        (self.closed_quantity > Decimal::ZERO).then(|| self.exit_value / self.closed_quantity)
    }

    /// Realized PnL after all commissions.
    pub fn net_pnl(&self) -> Decimal {
        self.realized_pnl - self.commission
    }
}
