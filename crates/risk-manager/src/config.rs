//! Risk limits for a single engine instance.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trading_core::config::{env_or, load_dotenv};
use trading_core::{Error, Result};

/// What to do with the part of an opposite-side fill that exceeds the open
/// position's quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlipPolicy {
    /// Close the position and drop the excess quantity.
    #[default]
    DiscardExcess,
    /// Close the position and open the excess on the other side.
    Reverse,
}

impl std::str::FromStr for FlipPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "discard_excess" | "discard" => Ok(FlipPolicy::DiscardExcess),
            "reverse" => Ok(FlipPolicy::Reverse),
            other => Err(format!("unknown flip policy '{other}'")),
        }
    }
}

/// Configuration for pre-trade risk limits.
///
/// All percentages are expressed in percent of account equity
/// (e.g. `10` = 10%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Maximum notional of a single order.
    pub max_position_size_pct: Decimal,
    /// Maximum realized loss in the current calendar day.
    pub max_daily_loss_pct: Decimal,
    /// Maximum realized loss in the current ISO week.
    pub max_weekly_loss_pct: Decimal,
    /// Maximum drawdown from peak equity.
    pub max_drawdown_pct: Decimal,
    /// Maximum number of instruments with an open position.
    pub max_concurrent_positions: usize,
    /// Equity put at risk per trade by ATR-based sizing.
    pub risk_per_trade_pct: Decimal,
    /// Handling of opposite-side fills larger than the open position.
    pub flip_policy: FlipPolicy,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size_pct: Decimal::new(10, 0), // 10% per order
            max_daily_loss_pct: Decimal::new(2, 0),     // 2% per day
            max_weekly_loss_pct: Decimal::new(5, 0),    // 5% per week
            max_drawdown_pct: Decimal::new(20, 0),      // 20% from peak
            max_concurrent_positions: 5,
            risk_per_trade_pct: Decimal::new(25, 2), // 0.25%
            flip_policy: FlipPolicy::DiscardExcess,
        }
    }
}

impl RiskConfig {
    /// Load limits from `RISK_*` environment variables, using defaults for
    /// anything unset.
    pub fn from_env() -> Result<Self> {
        load_dotenv();
        let defaults = Self::default();

        let config = Self {
            max_position_size_pct: env_or("RISK_MAX_POSITION_SIZE_PCT", defaults.max_position_size_pct)?,
            max_daily_loss_pct: env_or("RISK_MAX_DAILY_LOSS_PCT", defaults.max_daily_loss_pct)?,
            max_weekly_loss_pct: env_or("RISK_MAX_WEEKLY_LOSS_PCT", defaults.max_weekly_loss_pct)?,
            max_drawdown_pct: env_or("RISK_MAX_DRAWDOWN_PCT", defaults.max_drawdown_pct)?,
            max_concurrent_positions: env_or(
                "RISK_MAX_CONCURRENT_POSITIONS",
                defaults.max_concurrent_positions,
            )?,
            risk_per_trade_pct: env_or("RISK_PER_TRADE_PCT", defaults.risk_per_trade_pct)?,
            flip_policy: env_or("RISK_FLIP_POLICY", defaults.flip_policy)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject limits that can never be satisfied or make no sense.
    pub fn validate(&self) -> Result<()> {
        let percentages = [
            ("max_position_size_pct", self.max_position_size_pct),
            ("max_daily_loss_pct", self.max_daily_loss_pct),
            ("max_weekly_loss_pct", self.max_weekly_loss_pct),
            ("max_drawdown_pct", self.max_drawdown_pct),
            ("risk_per_trade_pct", self.risk_per_trade_pct),
        ];
        for (name, value) in percentages {
            if value < Decimal::ZERO {
                return Err(Error::config(format!("{name} must not be negative (got {value})")));
            }
        }
        if self.max_concurrent_positions == 0 {
            return Err(Error::config("max_concurrent_positions must be at least 1"));
        }
        Ok(())
    }
}
