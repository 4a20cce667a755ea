//! Risk Gate: pre-trade risk engine and bar-replay backtester
//!
//! This is the root crate that provides benchmark access to the internal modules.
//! For actual functionality, use the individual crates directly:
//!
//! - `trading-core`: Bars, order intents, shared config helpers
//! - `risk-manager`: Position ledger, loss windows, circuit breakers, order authorization
//! - `backtester`: Historical replay, equity curve, performance metrics
//! - `backtest-runner`: CLI that replays a bar file through a strategy

// Re-export for benchmarks
pub use backtester as backtest;
pub use risk_manager as risk;
pub use trading_core as core;
