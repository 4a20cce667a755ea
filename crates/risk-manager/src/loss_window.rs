//! Realized-loss accumulators for the current day and ISO week.
//!
//! Windows roll lazily: every read or write first compares the current time
//! with the stored reset markers. There is no background timer.

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Loss accumulators. Both hold loss magnitudes (never negative); profits
/// do not reduce them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossWindowState {
    pub daily_loss: Decimal,
    pub weekly_loss: Decimal,
    pub last_daily_reset: DateTime<Utc>,
    /// ISO (year, week) of the last weekly reset.
    pub last_weekly_reset: (i32, u32),
}

impl LossWindowState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            daily_loss: Decimal::ZERO,
            weekly_loss: Decimal::ZERO,
            last_daily_reset: now,
            last_weekly_reset: iso_week(now),
        }
    }

    /// Zero whichever accumulators belong to a window that has ended.
    /// The daily and weekly rolls are independent.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        if calendar_day(now) != calendar_day(self.last_daily_reset) {
            if self.daily_loss > Decimal::ZERO {
                info!(previous = %self.daily_loss, "Daily loss window reset");
            }
            self.daily_loss = Decimal::ZERO;
            self.last_daily_reset = now;
        }

        let week = iso_week(now);
        if week != self.last_weekly_reset {
            if self.weekly_loss > Decimal::ZERO {
                info!(previous = %self.weekly_loss, "Weekly loss window reset");
            }
            self.weekly_loss = Decimal::ZERO;
            self.last_weekly_reset = week;
        }
    }

    /// Record realized PnL for a closed trade. Only losses accumulate.
    pub fn record_realized_pnl(&mut self, amount: Decimal, now: DateTime<Utc>) {
        self.roll(now);
        if amount < Decimal::ZERO {
            self.daily_loss = self.daily_loss.saturating_add(-amount);
            self.weekly_loss = self.weekly_loss.saturating_add(-amount);
        }
    }

    /// Today's realized loss as a percentage of `equity`. Zero when equity
    /// is not positive.
    pub fn daily_loss_percent(&mut self, equity: Decimal, now: DateTime<Utc>) -> Decimal {
        self.roll(now);
        percent_of(self.daily_loss, equity)
    }

    /// This week's realized loss as a percentage of `equity`.
    pub fn weekly_loss_percent(&mut self, equity: Decimal, now: DateTime<Utc>) -> Decimal {
        self.roll(now);
        percent_of(self.weekly_loss, equity)
    }
}

fn calendar_day(at: DateTime<Utc>) -> (i32, u32) {
    (at.year(), at.ordinal())
}

fn iso_week(at: DateTime<Utc>) -> (i32, u32) {
    let week = at.iso_week();
    (week.year(), week.week())
}

fn percent_of(amount: Decimal, equity: Decimal) -> Decimal {
    if equity <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    // Saturate so an unrepresentable loss ratio still trips the limit.
    amount
        .checked_div(equity)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::MAX)
}
