//! Types library for the two-feed streaming client
//!
//! Value types decoded from the venue's market data and user data feeds.
//! Everything here is plain data: no I/O, no threads, no shared state.
//!
//! # Modules
//! - `ids`: Identifiers (ProductId, ConnectionId)
//! - `numeric`: Exact decimal types (Price, Quantity)
//! - `lenient`: Tolerant field decoders for the venue's loosely typed JSON
//! - `time`: ISO-8601 timestamps as Unix nanoseconds
//! - `order`: Order side, status and the user channel order
//! - `trade`: Market trade prints
//! - `market`: Level-2 updates, tickers, candles, product status
//! - `position`: Perpetual and expiring futures positions
//! - `errors`: Value parsing errors

/// Declares a venue string enumeration.
///
/// Decoding is total: unrecognised strings, `null` and absent fields all map
/// to `Unknown`, matched case-insensitively against the wire names.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
        #[serde(from = "Option<String>", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            #[default]
            Unknown,
        }

        impl $name {
            /// Wire representation
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                    Self::Unknown => "UNKNOWN",
                }
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $(
                    if s.eq_ignore_ascii_case($wire) {
                        return Self::$variant;
                    }
                )+
                Self::Unknown
            }
        }

        impl From<Option<String>> for $name {
            fn from(s: Option<String>) -> Self {
                s.as_deref().map(Self::from).unwrap_or_default()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// Public modules
pub mod ids;
pub mod numeric;
pub mod lenient;
pub mod time;
pub mod order;
pub mod trade;
pub mod market;
pub mod position;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::time::*;
    pub use crate::order::*;
    pub use crate::trade::*;
    pub use crate::market::*;
    pub use crate::position::*;
    pub use crate::errors::*;
}
