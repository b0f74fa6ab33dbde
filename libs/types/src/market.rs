//! Market data channel payloads
//!
//! Level-2 book diffs, tickers, candles and product status records as they
//! appear inside a market data event.

use crate::ids::ProductId;
use crate::lenient;
use crate::numeric::{Price, Quantity};
use crate::order::Side;
use crate::time::{self, UnixNanos};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One price level change on the level-2 channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level2Update {
    pub side: Side,
    #[serde(default, deserialize_with = "time::timestamp")]
    pub event_time: UnixNanos,
    pub price_level: Price,
    pub new_quantity: Quantity,
}

/// All level changes for one product within a level-2 event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level2Batch {
    pub product_id: ProductId,
    #[serde(default)]
    pub updates: Vec<Level2Update>,
}

/// Rolling statistics for one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub product_id: ProductId,
    #[serde(default)]
    pub price: Price,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub volume_24_h: Decimal,
    #[serde(default)]
    pub low_24_h: Price,
    #[serde(default)]
    pub high_24_h: Price,
    #[serde(default)]
    pub low_52_w: Price,
    #[serde(default)]
    pub high_52_w: Price,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub price_percent_chg_24_h: Decimal,
    #[serde(default)]
    pub best_bid: Price,
    #[serde(default)]
    pub best_bid_quantity: Quantity,
    #[serde(default)]
    pub best_ask: Price,
    #[serde(default)]
    pub best_ask_quantity: Quantity,
}

impl Ticker {
    /// Best ask minus best bid, if both sides are quoted
    pub fn spread(&self) -> Option<Decimal> {
        if self.best_bid.is_zero() || self.best_ask.is_zero() {
            return None;
        }
        Some(self.best_ask.as_decimal() - self.best_bid.as_decimal())
    }
}

/// OHLCV bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub product_id: ProductId,
    /// Bucket start, Unix seconds
    #[serde(default, deserialize_with = "lenient::integer")]
    pub start: i64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub volume: Decimal,
}

wire_enum! {
    pub enum ProductType {
        Spot => "SPOT",
        Future => "FUTURE",
    }
}

/// Trading status of one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductStatus {
    #[serde(default)]
    pub product_type: ProductType,
    pub id: ProductId,
    #[serde(default, deserialize_with = "lenient::string")]
    pub base_currency: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub quote_currency: String,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub base_increment: Decimal,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub quote_increment: Decimal,
    #[serde(default, deserialize_with = "lenient::string")]
    pub display_name: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub status_message: String,
    #[serde(default, deserialize_with = "lenient::decimal")]
    pub min_market_funds: Decimal,
}
