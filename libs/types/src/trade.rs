//! Market trade prints
//!
//! Trades published on the market trades channel. Besides reaching the
//! application they deplete resting quantity in the reconstructed book.

use crate::ids::ProductId;
use crate::numeric::{Price, Quantity};
use crate::order::Side;
use crate::time::{self, UnixNanos};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One executed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTrade {
    pub trade_id: String,
    pub product_id: ProductId,
    pub price: Price,
    pub size: Quantity,
    pub side: Side,
    #[serde(default, deserialize_with = "time::timestamp")]
    pub time: UnixNanos,
}

impl MarketTrade {
    /// Calculate trade value (price × size)
    pub fn notional(&self) -> Decimal {
        self.price.as_decimal() * self.size.as_decimal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_trade_decoding() {
        let trade: MarketTrade = serde_json::from_str(
            r#"{
                "trade_id": "000000000",
                "product_id": "ETH-USD",
                "price": "1260.01",
                "size": "0.3",
                "side": "BUY",
                "time": "2019-08-14T20:42:27.265Z"
            }"#,
        )
        .unwrap();

        assert_eq!(trade.product_id.as_str(), "ETH-USD");
        assert_eq!(trade.side, Side::BUY);
        assert_eq!(trade.size, Quantity::from_str("0.3").unwrap());
        assert_eq!(trade.time, 1_565_815_347_265_000_000);
        assert_eq!(trade.notional(), Decimal::from_str("378.003").unwrap());
    }

    #[test]
    fn test_trade_with_unknown_side_fails() {
        let result = serde_json::from_str::<MarketTrade>(
            r#"{"trade_id": "1", "product_id": "ETH-USD", "price": "1", "size": "1", "side": "?"}"#,
        );
        assert!(result.is_err());
    }
}
