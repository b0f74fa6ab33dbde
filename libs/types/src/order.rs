//! Order side, status and the user channel order
//!
//! `UserOrder` is what the user feed reports for each of the account's
//! orders. Snapshot events carry the reduced field set and are decoded with
//! `UserOrder::from_snapshot`, which also reconstructs the order's
//! configuration from its type and time-in-force.

use crate::errors::ValueError;
use crate::ids::ProductId;
use crate::lenient;
use crate::numeric::{Price, Quantity};
use crate::time::{self, UnixNanos};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum Side {
    /// Buy order (bid)
    BUY,
    /// Sell order (ask)
    SELL,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }

    /// Parse the venue's side spellings: level-2 uses bid/offer, orders and
    /// trades use BUY/SELL
    pub fn from_wire(text: &str) -> Result<Self, ValueError> {
        match text {
            "BUY" | "buy" | "bid" | "BID" => Ok(Side::BUY),
            "SELL" | "sell" | "offer" | "OFFER" | "ask" | "ASK" => Ok(Side::SELL),
            other => Err(ValueError::InvalidSide(other.to_string())),
        }
    }
}

impl TryFrom<String> for Side {
    type Error = ValueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Side::from_wire(&value)
    }
}

wire_enum! {
    /// Order status reported on the user channel
    pub enum OrderStatus {
        Pending => "PENDING",
        Open => "OPEN",
        Filled => "FILLED",
        Cancelled => "CANCELLED",
        Expired => "EXPIRED",
        Failed => "FAILED",
        Queued => "QUEUED",
        CancelQueued => "CANCEL_QUEUED",
        EditQueued => "EDIT_QUEUED",
    }
}

impl OrderStatus {
    /// No further updates are expected for the order
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Expired | OrderStatus::Failed
        )
    }
}

wire_enum! {
    pub enum OrderType {
        Market => "MARKET",
        Limit => "LIMIT",
        Stop => "STOP",
        StopLimit => "STOP_LIMIT",
        Bracket => "BRACKET",
        Twap => "TWAP",
        RollOpen => "ROLL_OPEN",
        RollClose => "ROLL_CLOSE",
        Liquidation => "LIQUIDATION",
        Scaled => "SCALED",
    }
}

wire_enum! {
    /// Time-in-force policy
    pub enum TimeInForce {
        GoodUntilDateTime => "GOOD_UNTIL_DATE_TIME",
        GoodUntilCancelled => "GOOD_UNTIL_CANCELLED",
        ImmediateOrCancel => "IMMEDIATE_OR_CANCEL",
        FillOrKill => "FILL_OR_KILL",
    }
}

wire_enum! {
    /// Futures contract expiry model
    pub enum ContractExpiryType {
        Expiring => "EXPIRING",
        Perpetual => "PERPETUAL",
    }
}

/// Order configuration reconstructed from a snapshot order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderConfiguration {
    Market {
        base_size: Quantity,
    },
    Limit {
        time_in_force: TimeInForce,
        base_size: Quantity,
        limit_price: Price,
        post_only: bool,
    },
    StopLimit {
        time_in_force: TimeInForce,
        base_size: Quantity,
        limit_price: Price,
        stop_price: Price,
    },
}

impl OrderConfiguration {
    /// Derive from order type and time-in-force. Returns None for order
    /// types without a fixed configuration or when required prices are missing.
    pub fn derive(order: &UserOrder) -> Option<Self> {
        let base_size = Quantity::new(order.cumulative_quantity + order.leaves_quantity);
        match order.order_type {
            OrderType::Market => Some(OrderConfiguration::Market { base_size }),
            OrderType::Limit => Some(OrderConfiguration::Limit {
                time_in_force: order.time_in_force,
                base_size,
                limit_price: order.limit_price?,
                post_only: order.post_only,
            }),
            OrderType::Stop | OrderType::StopLimit => Some(OrderConfiguration::StopLimit {
                time_in_force: order.time_in_force,
                base_size,
                limit_price: order.limit_price?,
                stop_price: order.stop_price?,
            }),
            _ => None,
        }
    }
}

/// Order as reported by the user channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserOrder {
    pub order_id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub client_order_id: String,
    pub product_id: ProductId,
    #[serde(rename = "order_side")]
    pub side: Side,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    #[serde(default)]
    pub contract_expiry_type: ContractExpiryType,

    // Fill progress
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub avg_price: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub cumulative_quantity: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub leaves_quantity: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub filled_value: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub completion_percentage: Decimal,
    #[serde(default, deserialize_with = "lenient::integer")]
    pub number_of_fills: i64,

    // Fees and holds
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub total_fees: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub total_value_after_fees: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub outstanding_hold_amount: Decimal,

    // Limit / stop parameters
    #[serde(default)]
    pub limit_price: Option<Price>,
    #[serde(default)]
    pub stop_price: Option<Price>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub post_only: bool,

    #[serde(rename = "creation_time", default, deserialize_with = "time::timestamp")]
    pub created_time: UnixNanos,
    #[serde(rename = "reject_Reason", default, deserialize_with = "lenient::string")]
    pub reject_reason: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub retail_portfolio_id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub trigger_status: String,

    /// Only populated by `from_snapshot`
    #[serde(skip)]
    pub configuration: Option<OrderConfiguration>,
}

impl UserOrder {
    /// Decode an order from a user channel snapshot event
    pub fn from_snapshot(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let mut order = Self::deserialize(value)?;
        order.configuration = OrderConfiguration::derive(&order);
        Ok(order)
    }

    /// Decode an order from a user channel update event
    pub fn from_update(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
