//! Per-instrument circuit breakers for emergency trading halts.
//!
//! A breaker is absent until tripped, blocks new orders for its instrument
//! while present, and is removed on an explicit reset. There is no cooldown
//! or automatic expiry; whatever policy tripped the breaker decides when to
//! reset it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{error, info};

/// Category of condition that tripped a breaker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerKind {
    /// Loss limit exceeded.
    LossLimit,
    /// Maximum drawdown exceeded.
    Drawdown,
    /// Unusual price movement.
    Volatility,
    /// Too many consecutive losing trades.
    ConsecutiveLosses,
    /// Broker or market-data connectivity issues.
    Connectivity,
    /// Manual activation.
    Manual,
}

impl BreakerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerKind::LossLimit => "LOSS_LIMIT",
            BreakerKind::Drawdown => "DRAWDOWN",
            BreakerKind::Volatility => "VOLATILITY",
            BreakerKind::ConsecutiveLosses => "CONSECUTIVE_LOSSES",
            BreakerKind::Connectivity => "CONNECTIVITY",
            BreakerKind::Manual => "MANUAL",
        }
    }
}

impl std::fmt::Display for BreakerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tripped breaker for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub instrument: String,
    pub kind: BreakerKind,
    /// Always true while the record exists.
    pub triggered: bool,
    pub triggered_at: DateTime<Utc>,
    /// Human-readable cause.
    pub reason: String,
}

/// Registry of tripped breakers keyed by instrument.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: HashMap<String, CircuitBreakerState>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the breaker for `instrument`, replacing any existing record.
    /// Returns the record that was replaced, if any.
    pub fn trip(
        &mut self,
        instrument: &str,
        kind: BreakerKind,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Option<CircuitBreakerState> {
        let state = CircuitBreakerState {
            instrument: instrument.to_string(),
            kind,
            triggered: true,
            triggered_at: now,
            reason: reason.into(),
        };

        error!(
            instrument = %state.instrument,
            kind = %state.kind,
            reason = %state.reason,
            "Circuit breaker TRIPPED - new orders blocked"
        );

        self.breakers.insert(instrument.to_string(), state)
    }

    /// Check if new orders for `instrument` are blocked.
    pub fn is_tripped(&self, instrument: &str) -> bool {
        self.active(instrument).is_some()
    }

    /// The breaker blocking `instrument`, if one is tripped.
    pub fn active(&self, instrument: &str) -> Option<&CircuitBreakerState> {
        self.breakers.get(instrument).filter(|b| b.triggered)
    }

    pub fn get(&self, instrument: &str) -> Option<&CircuitBreakerState> {
        self.breakers.get(instrument)
    }

    /// Remove the breaker for `instrument`. No-op if none is tripped.
    pub fn reset(&mut self, instrument: &str) -> Option<CircuitBreakerState> {
        let removed = self.breakers.remove(instrument);
        if let Some(ref state) = removed {
            info!(
                instrument = %instrument,
                kind = %state.kind,
                "Circuit breaker reset"
            );
        }
        removed
    }

    /// All tripped breakers, ordered by instrument.
    pub fn tripped(&self) -> Vec<CircuitBreakerState> {
        let mut all: Vec<_> = self.breakers.values().cloned().collect();
        all.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        all
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
