//! Identifier types
//!
//! `ProductId` names an instrument on the wire. `ConnectionId` names one
//! transport instance of a feed: a stable slot plus a generation that is
//! bumped on every reopen, so records still queued from a torn-down
//! connection can be recognised and discarded instead of dereferenced.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Instrument identifier (e.g., "BTC-USD")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into base and quote assets, if the id has the BASE-QUOTE shape
    pub fn split(&self) -> Option<(&str, &str)> {
        self.0.split_once('-')
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ProductId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Generational handle for one transport instance of a feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId {
    slot: u32,
    generation: u32,
}

impl ConnectionId {
    /// Size of the fixed little-endian encoding used in relay records
    pub const ENCODED_LEN: usize = 8;

    pub const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Handle for the next transport instance in the same slot
    pub fn next_generation(&self) -> Self {
        Self {
            slot: self.slot,
            generation: self.generation.wrapping_add(1),
        }
    }

    pub fn to_le_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut bytes = [0u8; Self::ENCODED_LEN];
        bytes[..4].copy_from_slice(&self.slot.to_le_bytes());
        bytes[4..].copy_from_slice(&self.generation.to_le_bytes());
        bytes
    }

    pub fn from_le_bytes(bytes: [u8; Self::ENCODED_LEN]) -> Self {
        let [s0, s1, s2, s3, g0, g1, g2, g3] = bytes;
        Self {
            slot: u32::from_le_bytes([s0, s1, s2, s3]),
            generation: u32::from_le_bytes([g0, g1, g2, g3]),
        }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.slot, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_product_id_split() {
        let product = ProductId::new("BTC-USD");
        assert_eq!(product.split(), Some(("BTC", "USD")));
        assert_eq!(ProductId::new("BTCUSD").split(), None);
    }

    #[test]
    fn test_product_id_serialization() {
        let product = ProductId::new("ETH-USD");
        let json = serde_json::to_string(&product).unwrap();
        assert_eq!(json, "\"ETH-USD\"");

        let deserialized: ProductId = serde_json::from_str(&json).unwrap();
        assert_eq!(product, deserialized);
    }

    #[test]
    fn test_product_id_borrow_lookup() {
        let mut books = BTreeMap::new();
        books.insert(ProductId::new("BTC-USD"), 1);
        assert_eq!(books.get("BTC-USD"), Some(&1));
    }

    #[test]
    fn test_connection_generations_differ() {
        let first = ConnectionId::new(3, 0);
        let second = first.next_generation();
        assert_ne!(first, second);
        assert_eq!(second.slot(), 3);
        assert_eq!(second.generation(), 1);
        assert_eq!(second.to_string(), "3#1");
    }

    #[test]
    fn test_connection_id_encoding() {
        let id = ConnectionId::new(0xDEAD_BEEF, 42);
        assert_eq!(ConnectionId::from_le_bytes(id.to_le_bytes()), id);
    }

    #[test]
    fn test_generation_wraps() {
        let id = ConnectionId::new(1, u32::MAX);
        assert_eq!(id.next_generation().generation(), 0);
    }
}
