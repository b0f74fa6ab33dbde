//! Protocol router
//!
//! Turns raw feed messages into `FeedEvent`s:
//!
//! ```text
//! raw bytes ─► envelope ─► sequence check ─► channel handler ─► books / handler
//!                 │               │                 │
//!                 ▼               ▼                 ▼
//!         MalformedMessage   SequenceGap     typed event(s)
//! ```
//!
//! Every message is processed independently: a decode failure is logged,
//! reported as `MalformedMessage` and the next message is handled
//! normally. A sequence gap is reported but the message is still applied.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info, trace, warn};
use types::ids::ConnectionId;
use types::market::{Candle, Level2Batch, ProductStatus, Ticker};
use types::order::UserOrder;
use types::position::{ExpiringFuturePosition, PerpetualFuturePosition};
use types::time::{self, UnixNanos};
use types::trade::MarketTrade;

use crate::channel::FeedKind;
use crate::error::FeedError;
use crate::events::{EventKind, FeedEvent, FeedHandler};
use crate::metrics::FeedMetrics;
use crate::order_book::BookManager;
use crate::sequence::{SequenceCheck, SequenceTracker};

/// Longest raw-message excerpt included in an error log line.
const LOG_PREVIEW_CHARS: usize = 512;

/// Top-level shape shared by every inbound message.
#[derive(Debug, Deserialize)]
struct Envelope {
    channel: String,
    #[serde(default, deserialize_with = "time::timestamp")]
    timestamp: UnixNanos,
    sequence_num: i64,
    #[serde(default)]
    events: Vec<Value>,
}

#[derive(Deserialize)]
struct TradesEvent {
    #[serde(default)]
    trades: Vec<MarketTrade>,
}

#[derive(Deserialize)]
struct TickersEvent {
    #[serde(default)]
    tickers: Vec<Ticker>,
}

#[derive(Deserialize)]
struct CandlesEvent {
    #[serde(default)]
    candles: Vec<Candle>,
}

#[derive(Deserialize)]
struct StatusEvent {
    #[serde(default)]
    products: Vec<ProductStatus>,
}

#[derive(Default, Deserialize)]
struct Positions {
    #[serde(default)]
    perpetual_futures_positions: Vec<PerpetualFuturePosition>,
    #[serde(default)]
    expiring_futures_positions: Vec<ExpiringFuturePosition>,
}

/// Inbound channel tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboundChannel {
    Level2,
    MarketTrades,
    Ticker,
    Candles,
    Status,
    User,
    /// Liveness and acknowledgements; consumed without an event.
    Silent,
    Unknown,
}

impl InboundChannel {
    fn classify(tag: &str) -> Self {
        match tag {
            "l2_data" | "level2" => InboundChannel::Level2,
            "market_trades" => InboundChannel::MarketTrades,
            "ticker" | "ticker_batch" => InboundChannel::Ticker,
            "candles" => InboundChannel::Candles,
            "status" => InboundChannel::Status,
            "user" => InboundChannel::User,
            "heartbeats" | "heartbeat" | "subscriptions" | "futures_balance_summary" => {
                InboundChannel::Silent
            }
            _ => InboundChannel::Unknown,
        }
    }
}

/// Parses, sequence-checks and routes messages for any number of
/// connections, and owns the books they build.
pub struct Router<H> {
    handler: H,
    sequences: SequenceTracker,
    books: BookManager,
    metrics: Arc<FeedMetrics>,
}

impl<H: FeedHandler> Router<H> {
    pub fn new(handler: H) -> Self {
        Self::with_metrics(handler, Arc::new(FeedMetrics::new()))
    }

    pub fn with_metrics(handler: H, metrics: Arc<FeedMetrics>) -> Self {
        Self {
            handler,
            sequences: SequenceTracker::new(),
            books: BookManager::new(),
            metrics,
        }
    }

    /// Process one raw message received on `connection`.
    pub fn handle(&mut self, feed: FeedKind, connection: ConnectionId, raw: &[u8]) {
        self.metrics.record_message();

        let envelope: Envelope = match serde_json::from_slice(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.malformed(feed, connection, &FeedError::from(err), raw);
                return;
            }
        };

        if let SequenceCheck::Gap { last, received } =
            self.sequences.check(connection, feed, envelope.sequence_num)
        {
            self.metrics.record_gap();
            self.emit(FeedEvent::SequenceGap {
                feed,
                connection,
                last,
                received,
            });
        }

        if let Err(err) = self.route(feed, connection, &envelope) {
            self.malformed(feed, connection, &err, raw);
        }
    }

    pub fn on_connected(&mut self, feed: FeedKind, connection: ConnectionId) {
        info!(%feed, %connection, "Feed connected");
        self.sequences.reset(connection, feed);
        self.emit(FeedEvent::Connected { feed, connection });
    }

    pub fn on_disconnected(&mut self, feed: FeedKind, connection: ConnectionId) {
        info!(%feed, %connection, "Feed disconnected");
        self.sequences.reset(connection, feed);
        self.emit(FeedEvent::Disconnected { feed, connection });
    }

    pub fn on_error(&mut self, feed: FeedKind, connection: ConnectionId, message: String) {
        error!(%feed, %connection, error = %message, "Feed transport error");
        self.sequences.reset(connection, feed);
        self.emit(FeedEvent::Error {
            feed,
            connection,
            message,
        });
    }

    /// Forget the sequence state of a connection that will not deliver again.
    pub fn retire(&mut self, feed: FeedKind, connection: ConnectionId) {
        self.sequences.reset(connection, feed);
    }

    pub fn books(&self) -> &BookManager {
        &self.books
    }

    pub fn books_mut(&mut self) -> &mut BookManager {
        &mut self.books
    }

    pub fn sequences(&self) -> &SequenceTracker {
        &self.sequences
    }

    pub fn metrics(&self) -> &Arc<FeedMetrics> {
        &self.metrics
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    fn route(&mut self, feed: FeedKind, connection: ConnectionId, envelope: &Envelope) -> Result<(), FeedError> {
        let sequence = envelope.sequence_num;
        let events = envelope.events.as_slice();

        match InboundChannel::classify(&envelope.channel) {
            InboundChannel::Level2 => self.on_level2(connection, sequence, events),
            InboundChannel::MarketTrades => self.on_market_trades(connection, sequence, events),
            InboundChannel::Ticker => self.on_tickers(connection, sequence, envelope.timestamp, events),
            InboundChannel::Candles => self.on_candles(connection, sequence, envelope.timestamp, events),
            InboundChannel::Status => self.on_status(connection, sequence, envelope.timestamp, events),
            InboundChannel::User => self.on_user(connection, sequence, events),
            InboundChannel::Silent => {
                trace!(%feed, %connection, channel = %envelope.channel, sequence, "Control message");
                Ok(())
            }
            InboundChannel::Unknown => {
                self.metrics.record_unknown_channel();
                warn!(%feed, %connection, channel = %envelope.channel, "Unknown channel, message dropped");
                Ok(())
            }
        }
    }

    fn on_level2(&mut self, connection: ConnectionId, sequence: i64, events: &[Value]) -> Result<(), FeedError> {
        for event in events {
            let Some(kind) = event_kind(event, "l2_data") else {
                continue;
            };
            let batch = Level2Batch::deserialize(event)?;

            match kind {
                EventKind::Snapshot => {
                    self.books.apply_snapshot(&batch.product_id, &batch.updates);
                }
                EventKind::Update => {
                    let outcome = self.books.apply_updates(&batch.product_id, &batch.updates);
                    self.metrics.record_stale(outcome.stale);
                    self.metrics.record_unknown_products(outcome.unknown);
                }
            }

            self.emit(FeedEvent::Level2 {
                connection,
                sequence,
                kind,
                batch,
            });
        }
        Ok(())
    }

    fn on_market_trades(&mut self, connection: ConnectionId, sequence: i64, events: &[Value]) -> Result<(), FeedError> {
        for event in events {
            let Some(kind) = event_kind(event, "market_trades") else {
                continue;
            };
            let TradesEvent { trades } = TradesEvent::deserialize(event)?;

            // The snapshot is recent history, already reflected in the book
            if kind == EventKind::Update {
                let outcome = self.books.apply_trades(&trades);
                self.metrics.record_stale(outcome.stale);
                self.metrics.record_unknown_products(outcome.unknown);
            }

            self.emit(FeedEvent::MarketTrades {
                connection,
                sequence,
                kind,
                trades,
            });
        }
        Ok(())
    }

    fn on_tickers(
        &mut self,
        connection: ConnectionId,
        sequence: i64,
        timestamp: UnixNanos,
        events: &[Value],
    ) -> Result<(), FeedError> {
        for event in events {
            let Some(kind) = event_kind(event, "ticker") else {
                continue;
            };
            let TickersEvent { tickers } = TickersEvent::deserialize(event)?;
            self.emit(FeedEvent::Tickers {
                connection,
                sequence,
                timestamp,
                kind,
                tickers,
            });
        }
        Ok(())
    }

    fn on_candles(
        &mut self,
        connection: ConnectionId,
        sequence: i64,
        timestamp: UnixNanos,
        events: &[Value],
    ) -> Result<(), FeedError> {
        for event in events {
            let Some(kind) = event_kind(event, "candles") else {
                continue;
            };
            let CandlesEvent { candles } = CandlesEvent::deserialize(event)?;
            self.emit(FeedEvent::Candles {
                connection,
                sequence,
                timestamp,
                kind,
                candles,
            });
        }
        Ok(())
    }

    fn on_status(
        &mut self,
        connection: ConnectionId,
        sequence: i64,
        timestamp: UnixNanos,
        events: &[Value],
    ) -> Result<(), FeedError> {
        for event in events {
            let Some(kind) = event_kind(event, "status") else {
                continue;
            };
            let StatusEvent { products } = StatusEvent::deserialize(event)?;
            self.emit(FeedEvent::Status {
                connection,
                sequence,
                timestamp,
                kind,
                products,
            });
        }
        Ok(())
    }

    fn on_user(&mut self, connection: ConnectionId, sequence: i64, events: &[Value]) -> Result<(), FeedError> {
        for event in events {
            let Some(kind) = event_kind(event, "user") else {
                continue;
            };
            let orders = event
                .get("orders")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            match kind {
                EventKind::Snapshot => {
                    let orders = orders
                        .iter()
                        .map(UserOrder::from_snapshot)
                        .collect::<Result<Vec<_>, _>>()?;
                    let positions = match event.get("positions") {
                        Some(value) if !value.is_null() => Positions::deserialize(value)?,
                        _ => Positions::default(),
                    };
                    self.emit(FeedEvent::UserSnapshot {
                        connection,
                        sequence,
                        orders,
                        perpetual_positions: positions.perpetual_futures_positions,
                        expiring_positions: positions.expiring_futures_positions,
                    });
                }
                EventKind::Update => {
                    let orders = orders
                        .iter()
                        .map(UserOrder::from_update)
                        .collect::<Result<Vec<_>, _>>()?;
                    self.emit(FeedEvent::OrderUpdates {
                        connection,
                        sequence,
                        orders,
                    });
                }
            }
        }
        Ok(())
    }

    fn emit(&mut self, event: FeedEvent) {
        self.metrics.record_event();
        self.handler.on_event(&event, &self.books);
    }

    fn malformed(&mut self, feed: FeedKind, connection: ConnectionId, err: &FeedError, raw: &[u8]) {
        self.metrics.record_parse_error();
        let text = String::from_utf8_lossy(raw);
        let preview: String = text.chars().take(LOG_PREVIEW_CHARS).collect();
        error!(%feed, %connection, error = %err, data = %preview, "Failed to process message");
        self.emit(FeedEvent::MalformedMessage {
            feed,
            connection,
            reason: err.to_string(),
        });
    }
}

/// Snapshot/update tag of one event; unknown tags are logged and skipped.
fn event_kind(event: &Value, channel: &str) -> Option<EventKind> {
    let tag = event.get("type").and_then(Value::as_str).unwrap_or_default();
    let kind = EventKind::parse(tag);
    if kind.is_none() {
        warn!(channel, event_type = tag, "Unknown event type, event skipped");
    }
    kind
}
