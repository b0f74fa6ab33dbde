//! Feeds, channels and the subscription wire messages
//!
//! Every channel belongs to exactly one of the two feeds. The user feed is
//! authenticated and carries account state; everything else is public
//! market data.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use types::ids::ProductId;

/// One of the two independent connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedKind {
    Market,
    User,
}

impl FeedKind {
    pub const ALL: [FeedKind; 2] = [FeedKind::Market, FeedKind::User];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedKind::Market => "market",
            FeedKind::User => "user",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channels available for subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Liveness ticks; also keeps the user feed open
    Heartbeats,
    /// Level-2 order book: snapshot, then diffs
    Level2,
    MarketTrades,
    Ticker,
    TickerBatch,
    Candles,
    Status,
    /// Orders and positions of the authenticated account
    User,
    FuturesBalanceSummary,
}

impl Channel {
    /// Name used in subscribe requests.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Channel::Heartbeats => "heartbeats",
            Channel::Level2 => "level2",
            Channel::MarketTrades => "market_trades",
            Channel::Ticker => "ticker",
            Channel::TickerBatch => "ticker_batch",
            Channel::Candles => "candles",
            Channel::Status => "status",
            Channel::User => "user",
            Channel::FuturesBalanceSummary => "futures_balance_summary",
        }
    }

    /// Parse a subscription channel name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "heartbeats" | "heartbeat" => Some(Channel::Heartbeats),
            "level2" => Some(Channel::Level2),
            "market_trades" => Some(Channel::MarketTrades),
            "ticker" => Some(Channel::Ticker),
            "ticker_batch" => Some(Channel::TickerBatch),
            "candles" => Some(Channel::Candles),
            "status" => Some(Channel::Status),
            "user" => Some(Channel::User),
            "futures_balance_summary" => Some(Channel::FuturesBalanceSummary),
            _ => None,
        }
    }

    /// The feed whose connection carries this channel.
    pub fn feed(&self) -> FeedKind {
        match self {
            Channel::User | Channel::FuturesBalanceSummary => FeedKind::User,
            _ => FeedKind::Market,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Subscribe / unsubscribe action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Subscribe,
    Unsubscribe,
}

/// Outbound subscription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    #[serde(rename = "type")]
    pub request_type: RequestType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub product_ids: Vec<ProductId>,
    pub channel: String,
    /// Signed credential; user feed only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
}

impl SubscriptionRequest {
    pub fn new(request_type: RequestType, channel: Channel, product_ids: Vec<ProductId>) -> Self {
        Self {
            request_type,
            product_ids,
            channel: channel.wire_name().to_string(),
            jwt: None,
        }
    }

    pub fn with_jwt(mut self, jwt: Option<String>) -> Self {
        self.jwt = jwt;
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Channel → products currently subscribed on one feed.
///
/// A channel may be present with an empty product set (heartbeats, status);
/// it is still re-subscribed on reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    channels: BTreeMap<Channel, BTreeSet<ProductId>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record products for a channel. Returns the products that were new.
    pub fn add(&mut self, channel: Channel, products: &[ProductId]) -> Vec<ProductId> {
        let entry = self.channels.entry(channel).or_default();
        products
            .iter()
            .filter(|product| entry.insert((*product).clone()))
            .cloned()
            .collect()
    }

    /// Remove products from a channel; an empty list removes the channel.
    pub fn remove(&mut self, channel: Channel, products: &[ProductId]) {
        if products.is_empty() {
            self.channels.remove(&channel);
            return;
        }
        if let Some(entry) = self.channels.get_mut(&channel) {
            for product in products {
                entry.remove(product);
            }
            if entry.is_empty() {
                self.channels.remove(&channel);
            }
        }
    }

    pub fn contains(&self, channel: Channel, product: &str) -> bool {
        self.channels
            .get(&channel)
            .map(|products| products.contains(product))
            .unwrap_or(false)
    }

    pub fn has_channel(&self, channel: Channel) -> bool {
        self.channels.contains_key(&channel)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &BTreeSet<ProductId>)> {
        self.channels.iter().map(|(channel, products)| (*channel, products))
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn to_map(&self) -> BTreeMap<Channel, BTreeSet<ProductId>> {
        self.channels.clone()
    }
}
