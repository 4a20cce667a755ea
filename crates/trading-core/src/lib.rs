//! Trading Core Library
//!
//! Shared order, position and market-data types, error handling and
//! configuration helpers for the risk gate and the backtester.

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Bar, OrderIntent, OrderSide, PositionSide};
