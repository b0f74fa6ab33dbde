//! Exact decimal types for prices and quantities
//!
//! Prices key the order book maps, so two representations of the same
//! value must land on the same level no matter which path produced them
//! (a level-2 diff or a trade print). Values are built on `rust_decimal`
//! and normalized on construction: "100", "100.0" and "100.00" are the
//! same `Price` with the same `Display`.

use crate::errors::ValueError;
use crate::lenient;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Price of one unit of the base asset, in quote currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Price = Price(Decimal::ZERO);

    /// Create a price, normalizing trailing zeros
    pub fn new(value: Decimal) -> Self {
        Self(value.normalize())
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Price {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = lenient::parse_decimal(s).map_err(|_| ValueError::InvalidDecimal(s.to_string()))?;
        if value.is_sign_negative() && !value.is_zero() {
            return Err(ValueError::NegativePrice(s.to_string()));
        }
        Ok(Self::new(value))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Decimal> for Price {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        lenient::decimal(deserializer).map(Self::new)
    }
}

/// Amount of the base asset
///
/// Book arithmetic never produces a negative quantity: `saturating_sub`
/// floors at zero, and a zero level is removed rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value.normalize())
    }

    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// True for zero and for negative values a venue may send by mistake
    pub fn is_empty(&self) -> bool {
        self.0 <= Decimal::ZERO
    }

    /// Subtract, flooring the result at zero
    pub fn saturating_sub(&self, other: Quantity) -> Quantity {
        let remaining = self.0 - other.0;
        if remaining <= Decimal::ZERO {
            Quantity::ZERO
        } else {
            Quantity::new(remaining)
        }
    }
}

impl FromStr for Quantity {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = lenient::parse_decimal(s).map_err(|_| ValueError::InvalidDecimal(s.to_string()))?;
        if value.is_sign_negative() && !value.is_zero() {
            return Err(ValueError::NegativeQuantity(s.to_string()));
        }
        Ok(Self::new(value))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Decimal> for Quantity {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        lenient::decimal(deserializer).map(Self::new)
    }
}
