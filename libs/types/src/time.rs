//! Timestamps as Unix nanoseconds
//!
//! The venue sends RFC 3339 strings with up to nanosecond precision
//! (`2023-02-09T20:32:50.714964855Z`). Book ordering compares these
//! values, so they are kept as integers.

use crate::errors::ValueError;
use chrono::DateTime;
use serde::{Deserialize, Deserializer};

/// Nanoseconds since the Unix epoch
pub type UnixNanos = i64;

/// Parse an ISO-8601 / RFC 3339 timestamp. The empty string is 0 (unset).
pub fn parse_timestamp(text: &str) -> Result<UnixNanos, ValueError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .and_then(|dt| dt.timestamp_nanos_opt())
        .ok_or_else(|| ValueError::InvalidTimestamp(text.to_string()))
}

/// Serde adapter: timestamp string (or null) to `UnixNanos`.
pub fn timestamp<'de, D>(deserializer: D) -> Result<UnixNanos, D::Error>
where
    D: Deserializer<'de>,
{
    let text: Option<String> = Option::deserialize(deserializer)?;
    match text {
        Some(text) => parse_timestamp(&text).map_err(serde::de::Error::custom),
        None => Ok(0),
    }
}
