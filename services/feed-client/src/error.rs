//! Error types for the feed client
//!
//! Nothing here escalates past the client: transport and parse failures are
//! turned into events and log lines. These types cover the fallible
//! operations that do return to a caller (construction, configuration,
//! credential lookup, relay record decoding).

use thiserror::Error;

use crate::relay_queue::RelayError;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("malformed relay record: {0}")]
    BadRecord(String),

    #[error("relay queue error: {0}")]
    Relay(#[from] RelayError),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport runtime error: {0}")]
    Runtime(String),
}

/// Invalid environment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {name} value: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{name} must not be empty")]
    Empty { name: &'static str },
}
