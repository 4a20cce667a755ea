//! Order intents submitted for pre-trade authorization.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PositionSide;

/// Side of the order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Direction of the exposure a fill on this side adds.
    pub fn position_side(&self) -> PositionSide {
        match self {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        }
    }

    /// Order side that reduces a position held on `side`.
    pub fn closing(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }
}

/// An order a strategy or caller intends to place.
///
/// The risk engine needs a price to size the order. Limit orders carry their
/// own; market orders must be given a reference (mark) price by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub id: Uuid,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Limit price, if this is a limit order.
    pub limit_price: Option<Decimal>,
    /// Caller-supplied mark price used to size market orders.
    pub reference_price: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl OrderIntent {
    /// Create a market order intent with no reference price.
    pub fn market(instrument: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            instrument: instrument.into(),
            side,
            quantity,
            limit_price: None,
            reference_price: None,
            created_at: Utc::now(),
        }
    }

    /// Create a limit order intent.
    pub fn limit(
        instrument: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Self {
        Self {
            limit_price: Some(price),
            ..Self::market(instrument, side, quantity)
        }
    }

    /// Attach a reference price for sizing.
    pub fn with_reference_price(mut self, price: Decimal) -> Self {
        self.reference_price = Some(price);
        self
    }

    /// Price used to compute the order's notional.
    ///
    /// Returns `None` for a market order without a reference price; such an
    /// order cannot be sized.
    pub fn effective_price(&self) -> Option<Decimal> {
        self.limit_price.or(self.reference_price)
    }

    /// Order quantity times effective price. `None` when the order is
    /// unpriced or the product overflows.
    pub fn notional(&self) -> Option<Decimal> {
        self.effective_price()
            .and_then(|price| self.quantity.checked_mul(price))
    }

    pub fn is_market(&self) -> bool {
        self.limit_price.is_none()
    }
}
