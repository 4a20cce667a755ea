//! Equity curve and running drawdown.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One point per processed bar. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
    /// Fractional decline from the highest equity seen so far (0.1 = 10%).
    pub drawdown: f64,
}

/// Append-only equity curve that tracks its own peak.
///
/// The peak is taken over recorded points only, so the drawdown stored on
/// each point and a recomputation from the finished curve always agree.
#[derive(Debug, Clone, Default)]
pub struct EquityTracker {
    points: Vec<EquityPoint>,
    peak: Option<Decimal>,
}

impl EquityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
            peak: None,
        }
    }

    /// Append a point and return it.
    pub fn record(&mut self, timestamp: DateTime<Utc>, equity: Decimal) -> &EquityPoint {
        let peak = self.peak.map_or(equity, |p| p.max(equity));
        self.peak = Some(peak);

        self.points.push(EquityPoint {
            timestamp,
            equity,
            drawdown: drawdown(peak, equity),
        });
        &self.points[self.points.len() - 1]
    }

    pub fn peak(&self) -> Option<Decimal> {
        self.peak
    }

    pub fn last(&self) -> Option<&EquityPoint> {
        self.points.last()
    }

    pub fn current_drawdown(&self) -> f64 {
        self.last().map_or(0.0, |p| p.drawdown)
    }

    pub fn max_drawdown(&self) -> f64 {
        self.points.iter().map(|p| p.drawdown).fold(0.0, f64::max)
    }

    pub fn points(&self) -> &[EquityPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn into_points(self) -> Vec<EquityPoint> {
        self.points
    }
}

/// `(peak - equity) / peak`, or 0 when the peak is not positive.
pub fn drawdown(peak: Decimal, equity: Decimal) -> f64 {
    if peak <= Decimal::ZERO {
        return 0.0;
    }
    ((peak - equity) / peak).to_f64().unwrap_or(0.0)
}

/// Maximum drawdown recomputed from a finished curve's equity values.
pub fn max_drawdown(points: &[EquityPoint]) -> f64 {
    let mut peak: Option<Decimal> = None;
    let mut max_dd: f64 = 0.0;

    for point in points {
        let p = peak.map_or(point.equity, |p| p.max(point.equity));
        peak = Some(p);
        max_dd = max_dd.max(drawdown(p, point.equity));
    }
    max_dd
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(i)
    }

    #[test]
    fn test_drawdown_from_running_peak() {
        let mut tracker = EquityTracker::new();
        tracker.record(ts(0), Decimal::new(100, 0));
        tracker.record(ts(1), Decimal::new(120, 0));
        let point = tracker.record(ts(2), Decimal::new(90, 0));

        assert!((point.drawdown - 0.25).abs() < 1e-12);
        tracker.record(ts(3), Decimal::new(110, 0));

        assert_eq!(tracker.peak(), Some(Decimal::new(120, 0)));
        assert!((tracker.max_drawdown() - 0.25).abs() < 1e-12);
        assert!((tracker.current_drawdown() - 1.0 / 12.0).abs() < 1e-12);
        assert_eq!(tracker.max_drawdown(), max_drawdown(tracker.points()));
    }

    #[test]
    fn test_rising_curve_has_no_drawdown() {
        let mut tracker = EquityTracker::new();
        for i in 0..10 {
            tracker.record(ts(i), Decimal::new(100 + i, 0));
        }
        assert_eq!(tracker.max_drawdown(), 0.0);
        assert_eq!(tracker.len(), 10);
    }

    #[test]
    fn test_zero_peak_yields_zero_drawdown() {
        let mut tracker = EquityTracker::new();
        let point = tracker.record(ts(0), Decimal::ZERO);
        assert_eq!(point.drawdown, 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }
}
