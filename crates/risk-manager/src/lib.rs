//! Risk Manager
//!
//! Pre-trade authorization, position tracking, loss windows and circuit
//! breakers for trading safety.

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod loss_window;
pub mod position_ledger;

pub use circuit_breaker::{BreakerKind, CircuitBreakerRegistry, CircuitBreakerState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{FlipPolicy, RiskConfig};
pub use engine::RiskEngine;
pub use error::{RiskViolation, ViolationKind};
pub use loss_window::LossWindowState;
pub use position_ledger::{FillOutcome, Position, PositionLedger};
