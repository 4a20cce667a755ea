//! Backtester error types.

use thiserror::Error;

/// Errors that abort a backtest run.
///
/// Cancellation is not an error; a cancelled run returns a result with
/// [`RunStatus::Cancelled`](crate::simulator::RunStatus::Cancelled).
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("no data for {instrument}: {reason}")]
    DataUnavailable { instrument: String, reason: String },

    #[error("invalid market data: {0}")]
    InvalidData(String),

    #[error("strategy error: {0}")]
    Strategy(#[from] anyhow::Error),
}

impl BacktestError {
    pub fn unavailable(instrument: impl Into<String>, reason: impl Into<String>) -> Self {
        BacktestError::DataUnavailable {
            instrument: instrument.into(),
            reason: reason.into(),
        }
    }
}

impl From<trading_core::Error> for BacktestError {
    fn from(err: trading_core::Error) -> Self {
        BacktestError::InvalidData(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BacktestError>;
