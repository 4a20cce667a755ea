//! Historical bar sources.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};
use trading_core::Bar;

use crate::error::{BacktestError, Result};

/// Bar interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeResolution {
    /// 1 minute
    Minute,
    /// 5 minutes
    Minute5,
    /// 15 minutes
    Minute15,
    /// 1 hour
    Hour,
    /// 1 day
    #[default]
    Day,
    /// 1 week
    Week,
}

impl TimeResolution {
    /// Get the interval as a chrono Duration.
    pub fn to_duration(&self) -> Duration {
        match self {
            TimeResolution::Minute => Duration::minutes(1),
            TimeResolution::Minute5 => Duration::minutes(5),
            TimeResolution::Minute15 => Duration::minutes(15),
            TimeResolution::Hour => Duration::hours(1),
            TimeResolution::Day => Duration::days(1),
            TimeResolution::Week => Duration::weeks(1),
        }
    }

    /// Bars per year on an 8760-hour year. Used to annualize Sharpe.
    pub fn periods_per_year(&self) -> f64 {
        let minutes = self.to_duration().num_minutes() as f64;
        8760.0 * 60.0 / minutes
    }
}

impl std::str::FromStr for TimeResolution {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "1m" | "minute" => Ok(TimeResolution::Minute),
            "5m" | "minute5" => Ok(TimeResolution::Minute5),
            "15m" | "minute15" => Ok(TimeResolution::Minute15),
            "1h" | "hour" => Ok(TimeResolution::Hour),
            "1d" | "day" => Ok(TimeResolution::Day),
            "1w" | "week" => Ok(TimeResolution::Week),
            other => Err(format!("unknown resolution '{other}'")),
        }
    }
}

/// Query parameters for fetching historical bars.
#[derive(Debug, Clone, PartialEq)]
pub struct DataQuery {
    pub instrument: String,
    /// Inclusive start.
    pub start_time: DateTime<Utc>,
    /// Inclusive end.
    pub end_time: DateTime<Utc>,
    pub resolution: TimeResolution,
}

impl DataQuery {
    /// Create a query for a specific time range.
    pub fn range(instrument: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            instrument: instrument.into(),
            start_time: start,
            end_time: end,
            resolution: TimeResolution::Day,
        }
    }

    /// Create a new query for the last N days.
    pub fn last_days(instrument: impl Into<String>, days: i64) -> Self {
        let now = Utc::now();
        Self::range(instrument, now - Duration::days(days), now)
    }

    /// Set time resolution.
    pub fn resolution(mut self, resolution: TimeResolution) -> Self {
        self.resolution = resolution;
        self
    }
}

/// Source of historical bars. Implementations may perform IO.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoricalDataSource: Send + Sync {
    /// Time-ordered bars for the query. An unservable range is
    /// [`BacktestError::DataUnavailable`].
    async fn fetch_bars(&self, query: &DataQuery) -> Result<Vec<Bar>>;
}

/// Bars held in memory, keyed by instrument.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDataStore {
    bars: HashMap<String, Vec<Bar>>,
}

impl InMemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add bars for an instrument, keeping them sorted by timestamp.
    pub fn insert(&mut self, instrument: impl Into<String>, bars: impl IntoIterator<Item = Bar>) {
        let series = self.bars.entry(instrument.into()).or_default();
        series.extend(bars);
        series.sort_by_key(|b| b.timestamp);
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_bars(mut self, instrument: impl Into<String>, bars: Vec<Bar>) -> Self {
        self.insert(instrument, bars);
        self
    }

    /// Load a JSON array of bars from `path` for `instrument`.
    pub fn load_json(&mut self, instrument: &str, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BacktestError::unavailable(instrument, format!("{}: {e}", path.display())))?;
        let bars: Vec<Bar> = serde_json::from_str(&raw)
            .map_err(|e| BacktestError::InvalidData(format!("{}: {e}", path.display())))?;
        for bar in &bars {
            bar.validate()?;
        }

        let count = bars.len();
        self.insert(instrument, bars);
        info!(instrument = %instrument, bars = count, path = %path.display(), "Loaded bars");
        Ok(count)
    }

    pub fn instruments(&self) -> Vec<String> {
        let mut names: Vec<_> = self.bars.keys().cloned().collect();
        names.sort();
        names
    }

    /// First and last timestamp held for an instrument.
    pub fn data_range(&self, instrument: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let series = self.bars.get(instrument)?;
        Some((series.first()?.timestamp, series.last()?.timestamp))
    }
}

#[async_trait]
impl HistoricalDataSource for InMemoryDataStore {
    async fn fetch_bars(&self, query: &DataQuery) -> Result<Vec<Bar>> {
        let series = self
            .bars
            .get(&query.instrument)
            .ok_or_else(|| BacktestError::unavailable(&query.instrument, "unknown instrument"))?;

        let bars: Vec<Bar> = series
            .iter()
            .filter(|b| b.timestamp >= query.start_time && b.timestamp <= query.end_time)
            .cloned()
            .collect();

        if bars.is_empty() {
            return Err(BacktestError::unavailable(
                &query.instrument,
                format!("no bars between {} and {}", query.start_time, query.end_time),
            ));
        }

        debug!(instrument = %query.instrument, bars = bars.len(), "Fetched bars");
        Ok(bars)
    }
}
