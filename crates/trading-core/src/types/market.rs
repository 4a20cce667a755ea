//! Historical price bars.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: Decimal,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// A bar where open, high, low and close are all `price`.
    pub fn flat(timestamp: DateTime<Utc>, price: Decimal) -> Self {
        Self::new(timestamp, price, price, price, price, Decimal::ZERO)
    }

    /// True range against the previous bar's close.
    /// Without a previous close this is just high - low.
    pub fn true_range(&self, prev_close: Option<Decimal>) -> Decimal {
        let high_low = self.high - self.low;
        match prev_close {
            Some(pc) => high_low
                .max((self.high - pc).abs())
                .max((self.low - pc).abs()),
            None => high_low,
        }
    }

    /// Check OHLC consistency: positive prices, low <= open/close <= high.
    pub fn validate(&self) -> Result<()> {
        if self.low <= Decimal::ZERO {
            return Err(Error::InvalidMarketData(format!(
                "bar at {} has non-positive low {}",
                self.timestamp, self.low
            )));
        }
        if self.high < self.low
            || self.open < self.low
            || self.open > self.high
            || self.close < self.low
            || self.close > self.high
        {
            return Err(Error::InvalidMarketData(format!(
                "bar at {} is inconsistent: o={} h={} l={} c={}",
                self.timestamp, self.open, self.high, self.low, self.close
            )));
        }
        Ok(())
    }
}
