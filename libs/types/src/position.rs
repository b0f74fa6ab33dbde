//! Futures position types
//!
//! Reported on the user channel snapshot as two separate collections:
//! perpetual contracts and contracts with an expiry date.

use crate::ids::ProductId;
use crate::lenient;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

wire_enum! {
    /// Position direction
    pub enum PositionSide {
        Long => "LONG",
        Short => "SHORT",
    }
}

/// Open position in a perpetual future
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerpetualFuturePosition {
    pub product_id: ProductId,
    #[serde(default, deserialize_with = "lenient::string")]
    pub portfolio_uuid: String,
    #[serde(default)]
    pub position_side: PositionSide,
    #[serde(default, deserialize_with = "lenient::string")]
    pub margin_type: String,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub vwap: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub entry_vwap: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub net_size: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub buy_order_size: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub sell_order_size: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub leverage: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub mark_price: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub liquidation_price: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub im_notional: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub mm_notional: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub position_notional: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub unrealized_pnl: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub aggregated_pnl: Decimal,
}

/// Open position in a dated future
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiringFuturePosition {
    pub product_id: ProductId,
    #[serde(default)]
    pub side: PositionSide,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub number_of_contracts: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub realized_pnl: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub unrealized_pnl: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub entry_price: Decimal,
}

impl ExpiringFuturePosition {
    /// Realized plus unrealized PnL
    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }
}
