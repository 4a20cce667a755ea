//! Streaming indicators used for position sizing.

use rust_decimal::Decimal;
use trading_core::Bar;

/// Average True Range with Wilder smoothing (alpha = 1/period).
///
/// Seeded with the simple mean of the first `period` true ranges; the first
/// bar's true range is high - low since it has no previous close.
#[derive(Debug, Clone)]
pub struct AverageTrueRange {
    period: usize,
    prev_close: Option<Decimal>,
    seed_sum: Decimal,
    seen: usize,
    value: Option<Decimal>,
}

impl AverageTrueRange {
    /// A zero period is treated as 1.
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            prev_close: None,
            seed_sum: Decimal::ZERO,
            seen: 0,
            value: None,
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Feed the next bar; returns the ATR once `period` bars have been seen.
    pub fn update(&mut self, bar: &Bar) -> Option<Decimal> {
        let tr = bar.true_range(self.prev_close);
        self.prev_close = Some(bar.close);
        let period = Decimal::from(self.period);

        self.value = match self.value {
            Some(prev) => Some(prev + (tr - prev) / period),
            None => {
                self.seen += 1;
                self.seed_sum += tr;
                (self.seen == self.period).then(|| self.seed_sum / period)
            }
        };
        self.value
    }

    pub fn value(&self) -> Option<Decimal> {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: i64, high: i64, low: i64, close: i64) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i);
        Bar::new(
            ts,
            Decimal::new(close, 0),
            Decimal::new(high, 0),
            Decimal::new(low, 0),
            Decimal::new(close, 0),
            Decimal::ZERO,
        )
    }

    #[test]
    fn test_seed_is_simple_mean() {
        let mut atr = AverageTrueRange::new(3);
        assert_eq!(atr.update(&bar(0, 12, 10, 11)), None); // TR 2
        assert_eq!(atr.update(&bar(1, 14, 11, 13)), None); // TR 3
        // TR = max(15-12, |15-13|, |12-13|) = 3 ... mean (2+3+3)/3
        let seeded = atr.update(&bar(2, 15, 12, 14)).unwrap();
        assert_eq!(seeded, Decimal::new(8, 0) / Decimal::new(3, 0));
    }

    #[test]
    fn test_wilder_smoothing_after_seed() {
        let mut atr = AverageTrueRange::new(2);
        atr.update(&bar(0, 12, 10, 11)); // TR 2
        assert_eq!(atr.update(&bar(1, 13, 11, 12)), Some(Decimal::new(2, 0))); // TR 2

        // Gap up: TR = max(21-19, |21-12|, |19-12|) = 9; ATR = 2 + (9-2)/2
        let next = atr.update(&bar(2, 21, 19, 20)).unwrap();
        assert_eq!(next, Decimal::new(55, 1));
        assert_eq!(atr.value(), Some(Decimal::new(55, 1)));
    }

    #[test]
    fn test_constant_range() {
        let mut atr = AverageTrueRange::new(5);
        let mut last = None;
        for i in 0..20 {
            last = atr.update(&bar(i, 101, 99, 100));
        }
        assert_eq!(last, Some(Decimal::new(2, 0)));
    }

    #[test]
    fn test_zero_period_clamped() {
        let mut atr = AverageTrueRange::new(0);
        assert_eq!(atr.period(), 1);
        assert_eq!(atr.update(&bar(0, 12, 10, 11)), Some(Decimal::new(2, 0)));
    }
}
