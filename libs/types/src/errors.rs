//! Error types for wire value parsing
//!
//! Raised when a field's text cannot be turned into its typed value.

use thiserror::Error;

/// Value parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("Invalid decimal: {0:?}")]
    InvalidDecimal(String),

    #[error("Price must not be negative: {0}")]
    NegativePrice(String),

    #[error("Quantity must not be negative: {0}")]
    NegativeQuantity(String),

    #[error("Unrecognised side: {0:?}")]
    InvalidSide(String),

    #[error("Invalid timestamp: {0:?}")]
    InvalidTimestamp(String),
}
