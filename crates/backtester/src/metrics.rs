//! Performance summary computed from a finished run.
//!
//! Degenerate inputs (no trades, zero variance, zero equity) resolve to 0
//! rather than NaN. The one exception is `profit_factor`, which is
//! `f64::INFINITY` when there are winning trades and no losing ones.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::equity::EquityPoint;
use crate::simulator::TradeRecord;

const HOURS_PER_YEAR: f64 = 8760.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    /// (final - initial) / initial.
    pub total_return: f64,
    /// (1 + total_return)^(1/years) - 1.
    pub annualized_return: f64,
    /// (final / initial)^(1/years) - 1.
    pub cagr: f64,
    /// Span of the equity curve in 8760-hour years.
    pub years: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    /// Serialized as the string `"inf"` when infinite.
    #[serde(with = "unbounded_ratio")]
    pub profit_factor: f64,
    /// System quality number.
    pub sqn: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub gross_profit: Decimal,
    /// Magnitude of losing trades' PnL.
    pub gross_loss: Decimal,
    pub avg_trade_pnl: Decimal,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub total_commission: Decimal,
    pub final_equity: Decimal,
}

impl PerformanceSummary {
    /// Compute the summary. `periods_per_year` annualizes per-point returns
    /// for Sharpe and Sortino.
    pub fn compute(
        initial_equity: Decimal,
        equity_curve: &[EquityPoint],
        trades: &[TradeRecord],
        periods_per_year: f64,
    ) -> Self {
        let final_equity = equity_curve.last().map_or(initial_equity, |p| p.equity);
        Self::compute_with_final(initial_equity, final_equity, equity_curve, trades, periods_per_year)
    }

    /// Like [`compute`](Self::compute), but returns are measured to
    /// `final_equity` instead of the last curve point. Risk ratios and
    /// drawdown still come from the curve.
    pub fn compute_with_final(
        initial_equity: Decimal,
        final_equity: Decimal,
        equity_curve: &[EquityPoint],
        trades: &[TradeRecord],
        periods_per_year: f64,
    ) -> Self {
        let total_return = if initial_equity > Decimal::ZERO {
            ratio_to_f64((final_equity - initial_equity) / initial_equity)
        } else {
            0.0
        };

        let years = match (equity_curve.first(), equity_curve.last()) {
            (Some(first), Some(last)) => {
                (last.timestamp - first.timestamp).num_seconds() as f64 / 3600.0 / HOURS_PER_YEAR
            }
            _ => 0.0,
        };

        let growth = if initial_equity > Decimal::ZERO {
            ratio_to_f64(final_equity / initial_equity)
        } else {
            0.0
        };
        let cagr = compound_annual(growth, years);
        let annualized_return = compound_annual(1.0 + total_return, years);

        let returns = point_returns(equity_curve);
        let (sharpe_ratio, sortino_ratio) = risk_ratios(&returns, periods_per_year);

        let max_drawdown = equity_curve.iter().map(|p| p.drawdown).fold(0.0, f64::max);

        let pnls: Vec<Decimal> = trades.iter().map(|t| t.pnl).collect();
        let winning_trades = pnls.iter().filter(|p| **p > Decimal::ZERO).count();
        let losing_trades = pnls.iter().filter(|p| **p < Decimal::ZERO).count();
        let gross_profit: Decimal = pnls.iter().filter(|p| **p > Decimal::ZERO).sum();
        let gross_loss: Decimal = pnls.iter().filter(|p| **p < Decimal::ZERO).map(|p| -*p).sum();

        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };

        let profit_factor = if gross_loss > Decimal::ZERO {
            ratio_to_f64(gross_profit / gross_loss)
        } else if gross_profit > Decimal::ZERO {
            f64::INFINITY
        } else {
            0.0
        };

        let avg_trade_pnl = if total_trades > 0 {
            pnls.iter().sum::<Decimal>() / Decimal::from(total_trades)
        } else {
            Decimal::ZERO
        };

        let (max_consecutive_wins, max_consecutive_losses) = consecutive_streaks(&pnls);

        Self {
            total_return,
            annualized_return,
            cagr,
            years,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown,
            win_rate,
            profit_factor,
            sqn: system_quality_number(&pnls),
            total_trades,
            winning_trades,
            losing_trades,
            gross_profit,
            gross_loss,
            avg_trade_pnl,
            max_consecutive_wins,
            max_consecutive_losses,
            total_commission: trades.iter().map(|t| t.commission).sum(),
            final_equity,
        }
    }
}

fn ratio_to_f64(value: Decimal) -> f64 {
    value.to_f64().filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn compound_annual(growth: f64, years: f64) -> f64 {
    if years <= 0.0 || growth <= 0.0 {
        return 0.0;
    }
    let value = growth.powf(1.0 / years) - 1.0;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Simple returns between consecutive points. A zero previous equity
/// contributes a zero return.
fn point_returns(points: &[EquityPoint]) -> Vec<f64> {
    points
        .windows(2)
        .map(|w| {
            let prev = w[0].equity;
            if prev == Decimal::ZERO {
                0.0
            } else {
                ratio_to_f64((w[1].equity - prev) / prev)
            }
        })
        .collect()
}

/// Sharpe (population stddev) and Sortino (downside deviation), annualized
/// by `sqrt(periods_per_year)`, risk-free rate 0.
fn risk_ratios(returns: &[f64], periods_per_year: f64) -> (f64, f64) {
    if returns.is_empty() || periods_per_year <= 0.0 {
        return (0.0, 0.0);
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    let annualize = periods_per_year.sqrt();

    let sharpe = if std_dev > 0.0 {
        mean / std_dev * annualize
    } else {
        0.0
    };

    let downside: Vec<f64> = returns.iter().filter(|&&r| r < 0.0).map(|&r| r * r).collect();
    let downside_dev = if downside.is_empty() {
        0.0
    } else {
        (downside.iter().sum::<f64>() / downside.len() as f64).sqrt()
    };
    let sortino = if downside_dev > 0.0 {
        mean / downside_dev * annualize
    } else {
        0.0
    };

    (finite_or_zero(sharpe), finite_or_zero(sortino))
}

/// mean / sample stddev * sqrt(n) over trade PnL; 0 with fewer than 2 trades.
fn system_quality_number(pnls: &[Decimal]) -> f64 {
    if pnls.len() < 2 {
        return 0.0;
    }
    let values: Vec<f64> = pnls.iter().map(|p| p.to_f64().unwrap_or(0.0)).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    if std_dev > 0.0 {
        finite_or_zero(mean / std_dev * n.sqrt())
    } else {
        0.0
    }
}

fn consecutive_streaks(pnls: &[Decimal]) -> (usize, usize) {
    let mut max_wins = 0;
    let mut max_losses = 0;
    let mut current_wins = 0;
    let mut current_losses = 0;

    for pnl in pnls {
        if *pnl > Decimal::ZERO {
            current_wins += 1;
            current_losses = 0;
            max_wins = max_wins.max(current_wins);
        } else if *pnl < Decimal::ZERO {
            current_losses += 1;
            current_wins = 0;
            max_losses = max_losses.max(current_losses);
        }
    }

    (max_wins, max_losses)
}

/// JSON has no infinity, so `f64::INFINITY` round-trips as `"inf"`.
mod unbounded_ratio {
    use serde::de::{self, Unexpected};
    use serde::{Deserialize, Deserializer, Serializer};

    const INFINITE: &str = "inf";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if *value == f64::INFINITY {
            serializer.serialize_str(INFINITE)
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) if text == INFINITE => Ok(f64::INFINITY),
            Repr::Text(text) => Err(de::Error::invalid_value(
                Unexpected::Str(&text),
                &"a number or \"inf\"",
            )),
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
