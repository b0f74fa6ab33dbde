//! Events delivered to the application
//!
//! Everything the pipeline reports (lifecycle, gaps, errors, decoded
//! channel data) arrives as one `FeedEvent` through a single
//! `FeedHandler`. Handlers run on the I/O thread in direct mode and on the
//! processing thread in queued mode; in both cases the book state passed
//! alongside already reflects the event.

use serde::{Deserialize, Serialize};
use types::ids::ConnectionId;
use types::market::{Candle, Level2Batch, ProductStatus, Ticker};
use types::order::UserOrder;
use types::position::{ExpiringFuturePosition, PerpetualFuturePosition};
use types::time::UnixNanos;
use types::trade::MarketTrade;

use crate::channel::FeedKind;
use crate::order_book::BookManager;

/// Snapshot (full state) or update (incremental) event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Snapshot,
    Update,
}

impl EventKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "snapshot" => Some(EventKind::Snapshot),
            "update" => Some(EventKind::Update),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Connected {
        feed: FeedKind,
        connection: ConnectionId,
    },
    Disconnected {
        feed: FeedKind,
        connection: ConnectionId,
    },
    /// Transport error text; sequencing restarts on this connection.
    Error {
        feed: FeedKind,
        connection: ConnectionId,
        message: String,
    },
    /// `received` was not `last + 1`; data may be missing. The message is
    /// still processed.
    SequenceGap {
        feed: FeedKind,
        connection: ConnectionId,
        last: i64,
        received: i64,
    },
    /// A message (or one of its events) could not be decoded and was dropped.
    MalformedMessage {
        feed: FeedKind,
        connection: ConnectionId,
        reason: String,
    },
    Level2 {
        connection: ConnectionId,
        sequence: i64,
        kind: EventKind,
        batch: Level2Batch,
    },
    MarketTrades {
        connection: ConnectionId,
        sequence: i64,
        kind: EventKind,
        trades: Vec<MarketTrade>,
    },
    Tickers {
        connection: ConnectionId,
        sequence: i64,
        timestamp: UnixNanos,
        kind: EventKind,
        tickers: Vec<Ticker>,
    },
    Candles {
        connection: ConnectionId,
        sequence: i64,
        timestamp: UnixNanos,
        kind: EventKind,
        candles: Vec<Candle>,
    },
    Status {
        connection: ConnectionId,
        sequence: i64,
        timestamp: UnixNanos,
        kind: EventKind,
        products: Vec<ProductStatus>,
    },
    UserSnapshot {
        connection: ConnectionId,
        sequence: i64,
        orders: Vec<UserOrder>,
        perpetual_positions: Vec<PerpetualFuturePosition>,
        expiring_positions: Vec<ExpiringFuturePosition>,
    },
    OrderUpdates {
        connection: ConnectionId,
        sequence: i64,
        orders: Vec<UserOrder>,
    },
}

impl FeedEvent {
    /// Get the event type as a static string label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            FeedEvent::Connected { .. } => "Connected",
            FeedEvent::Disconnected { .. } => "Disconnected",
            FeedEvent::Error { .. } => "Error",
            FeedEvent::SequenceGap { .. } => "SequenceGap",
            FeedEvent::MalformedMessage { .. } => "MalformedMessage",
            FeedEvent::Level2 { .. } => "Level2",
            FeedEvent::MarketTrades { .. } => "MarketTrades",
            FeedEvent::Tickers { .. } => "Tickers",
            FeedEvent::Candles { .. } => "Candles",
            FeedEvent::Status { .. } => "Status",
            FeedEvent::UserSnapshot { .. } => "UserSnapshot",
            FeedEvent::OrderUpdates { .. } => "OrderUpdates",
        }
    }

    pub fn feed(&self) -> FeedKind {
        match self {
            FeedEvent::Connected { feed, .. }
            | FeedEvent::Disconnected { feed, .. }
            | FeedEvent::Error { feed, .. }
            | FeedEvent::SequenceGap { feed, .. }
            | FeedEvent::MalformedMessage { feed, .. } => *feed,
            FeedEvent::UserSnapshot { .. } | FeedEvent::OrderUpdates { .. } => FeedKind::User,
            _ => FeedKind::Market,
        }
    }

    pub fn connection(&self) -> ConnectionId {
        match self {
            FeedEvent::Connected { connection, .. }
            | FeedEvent::Disconnected { connection, .. }
            | FeedEvent::Error { connection, .. }
            | FeedEvent::SequenceGap { connection, .. }
            | FeedEvent::MalformedMessage { connection, .. }
            | FeedEvent::Level2 { connection, .. }
            | FeedEvent::MarketTrades { connection, .. }
            | FeedEvent::Tickers { connection, .. }
            | FeedEvent::Candles { connection, .. }
            | FeedEvent::Status { connection, .. }
            | FeedEvent::UserSnapshot { connection, .. }
            | FeedEvent::OrderUpdates { connection, .. } => *connection,
        }
    }
}

/// Application callback.
pub trait FeedHandler: Send {
    fn on_event(&mut self, event: &FeedEvent, books: &BookManager);
}

impl<F> FeedHandler for F
where
    F: FnMut(&FeedEvent, &BookManager) + Send,
{
    fn on_event(&mut self, event: &FeedEvent, books: &BookManager) {
        self(event, books)
    }
}
