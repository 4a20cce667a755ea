//! Backtester
//!
//! Bar-by-bar historical simulation of a strategy behind the same risk
//! gate used for live orders.
//!
//! # Features
//!
//! - **Strategy Trait**: Pluggable per-bar decision interface, plus a closure adapter
//! - **Historical Data Source**: Async bar source trait with an in-memory store
//! - **Backtest Simulator**: Bar replay with slippage, fees and risk checks
//! - **Performance Summary**: Return, CAGR, Sharpe, Sortino, drawdown, SQN
//!
//! # Example
//!
//! ```ignore
//! use backtester::{
//!     BacktestSimulator, CancelSignal, DataQuery, InMemoryDataStore,
//!     MovingAverageCrossover, SimulatorConfig, TimeResolution,
//! };
//!
//! let store = InMemoryDataStore::new().with_bars("AAPL", bars);
//! let simulator = BacktestSimulator::new(store, SimulatorConfig::default());
//!
//! let mut strategy = MovingAverageCrossover::new(10, 30)?;
//! let query = DataQuery::last_days("AAPL", 365).resolution(TimeResolution::Day);
//!
//! let result = simulator.run(&mut strategy, &query, &CancelSignal::new()).await?;
//! println!("Return: {:.2}%", result.performance.total_return * 100.0);
//! ```

pub mod data_store;
pub mod equity;
pub mod error;
pub mod indicators;
pub mod metrics;
pub mod position;
pub mod simulator;
pub mod strategy;

// Re-exports
pub use data_store::{DataQuery, HistoricalDataSource, InMemoryDataStore, TimeResolution};
pub use equity::{EquityPoint, EquityTracker};
pub use error::{BacktestError, Result};
pub use indicators::AverageTrueRange;
pub use metrics::PerformanceSummary;
pub use position::BacktestPosition;
pub use simulator::{
    BacktestResult, BacktestSimulator, CancelSignal, FeeModel, RunStatus,
    SimulatorConfig, SlippageModel, TradeRecord,
};
pub use strategy::{Fill, FnStrategy, MovingAverageCrossover, Strategy, StrategyContext};
