//! Core domain types shared by the risk gate and the backtester.

pub mod market;
pub mod order;
pub mod position;

pub use market::*;
pub use order::*;
pub use position::*;
