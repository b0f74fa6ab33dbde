//! Client configuration
//!
//! Defaults target the venue's production endpoints. `ClientConfig::from_env`
//! overrides individual fields from `FEED_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::relay_queue::{BackpressurePolicy, RelayConfig, DEFAULT_RELAY_CAPACITY};

pub const DEFAULT_MARKET_DATA_URL: &str = "wss://advanced-trade-ws.coinbase.com";
pub const DEFAULT_USER_DATA_URL: &str = "wss://advanced-trade-ws-user.coinbase.com";
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 2_000;
pub const INITIAL_RECONNECT_DELAY_MS: u64 = 500;
pub const MAX_RECONNECT_DELAY_MS: u64 = 15_000;

/// What happens after a transport disconnect or error.
///
/// Sequence gaps never trigger a reconnect; they are reported and the
/// application decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectPolicy {
    /// Stay closed until `FeedClient::reconnect` is called.
    #[default]
    Manual,
    /// Reopen after an exponential backoff.
    Auto {
        initial_delay: Duration,
        max_delay: Duration,
    },
}

impl ReconnectPolicy {
    pub fn auto() -> Self {
        ReconnectPolicy::Auto {
            initial_delay: Duration::from_millis(INITIAL_RECONNECT_DELAY_MS),
            max_delay: Duration::from_millis(MAX_RECONNECT_DELAY_MS),
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-based), or None
    /// under `Manual`.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            ReconnectPolicy::Manual => None,
            ReconnectPolicy::Auto {
                initial_delay,
                max_delay,
            } => {
                let mut delay = initial_delay;
                for _ in 0..attempt {
                    delay = next_reconnect_delay(delay, max_delay);
                    if delay >= max_delay {
                        break;
                    }
                }
                Some(delay.min(max_delay))
            }
        }
    }
}

fn next_reconnect_delay(current: Duration, max: Duration) -> Duration {
    let doubled = current.as_millis().saturating_mul(2);
    let bounded = doubled.min(max.as_millis()) as u64;
    Duration::from_millis(bounded)
}

/// Raw-traffic log sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLogConfig {
    pub path: PathBuf,
    /// Capacity of the logger's own relay queue, in bytes.
    pub capacity: usize,
}

impl DataLogConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            capacity: DEFAULT_RELAY_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub market_data_url: String,
    pub user_data_url: String,
    /// Upper bound on the per-feed wait for a disconnect acknowledgement
    /// during shutdown.
    pub close_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Raw-traffic logging; disabled when None.
    pub data_log: Option<DataLogConfig>,
    /// Queue settings for queued (processor) mode.
    pub relay: RelayConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            market_data_url: DEFAULT_MARKET_DATA_URL.to_string(),
            user_data_url: DEFAULT_USER_DATA_URL.to_string(),
            close_timeout: Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS),
            reconnect: ReconnectPolicy::Manual,
            data_log: None,
            relay: RelayConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset names keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let market_data_url = url_var(&lookup, "FEED_MARKET_DATA_URL")?.unwrap_or(defaults.market_data_url);
        let user_data_url = url_var(&lookup, "FEED_USER_DATA_URL")?.unwrap_or(defaults.user_data_url);

        let close_timeout = match parse_var::<u64, _>(&lookup, "FEED_CLOSE_TIMEOUT_MS")? {
            Some(ms) => Duration::from_millis(ms),
            None => defaults.close_timeout,
        };

        let reconnect = match lookup("FEED_RECONNECT") {
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "manual" | "off" | "false" | "0" => ReconnectPolicy::Manual,
                "auto" | "on" | "true" | "1" => {
                    let initial = parse_var::<u64, _>(&lookup, "FEED_RECONNECT_INITIAL_MS")?
                        .unwrap_or(INITIAL_RECONNECT_DELAY_MS);
                    let max = parse_var::<u64, _>(&lookup, "FEED_RECONNECT_MAX_MS")?
                        .unwrap_or(MAX_RECONNECT_DELAY_MS);
                    ReconnectPolicy::Auto {
                        initial_delay: Duration::from_millis(initial),
                        max_delay: Duration::from_millis(max.max(initial)),
                    }
                }
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "FEED_RECONNECT",
                        value,
                    })
                }
            },
            None => defaults.reconnect,
        };

        let data_log = match lookup("FEED_DATA_LOG").map(|v| v.trim().to_string()) {
            Some(path) if !path.is_empty() => {
                let mut log = DataLogConfig::new(path);
                if let Some(capacity) = parse_var::<usize, _>(&lookup, "FEED_DATA_LOG_CAPACITY")? {
                    log.capacity = capacity;
                }
                Some(log)
            }
            _ => None,
        };

        let mut relay = defaults.relay;
        if let Some(capacity) = parse_var::<usize, _>(&lookup, "FEED_RELAY_CAPACITY")? {
            relay.capacity = capacity;
        }
        if let Some(value) = lookup("FEED_RELAY_BACKPRESSURE") {
            relay.backpressure = match value.trim().to_ascii_lowercase().as_str() {
                "block" => BackpressurePolicy::Block,
                "reject" => BackpressurePolicy::Reject,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "FEED_RELAY_BACKPRESSURE",
                        value,
                    })
                }
            };
        }

        Ok(Self {
            market_data_url,
            user_data_url,
            close_timeout,
            reconnect,
            data_log,
            relay,
        })
    }
}

fn url_var<F>(lookup: &F, name: &'static str) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => {
            let trimmed = value.trim().trim_end_matches('/').to_string();
            if trimmed.is_empty() {
                return Err(ConfigError::Empty { name });
            }
            Ok(Some(trimmed))
        }
        None => Ok(None),
    }
}

fn parse_var<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(None),
    }
}
