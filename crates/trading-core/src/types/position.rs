//! Position direction.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an open position. Quantities are always stored as positive
/// magnitudes; the sign lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn opposite(&self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    /// Profit or loss of holding `quantity` from `entry` to `mark`.
    pub fn pnl(&self, entry: Decimal, mark: Decimal, quantity: Decimal) -> Decimal {
        match self {
            PositionSide::Long => (mark - entry) * quantity,
            PositionSide::Short => (entry - mark) * quantity,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}
