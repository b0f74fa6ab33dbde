//! Feed Client
//!
//! Streaming client for the venue's two WebSocket feeds (public market
//! data and authenticated user data). Produces:
//! - Per-connection sequence checking with gap notification
//! - Typed events for every channel (book, trades, tickers, candles,
//!   status, orders, positions)
//! - Level-2 order books rebuilt from snapshots, diffs and trade prints
//! - Optional hand-off of all callbacks to one processing thread through a
//!   lock-free relay queue
//! - Optional raw traffic logging
//!
//! # Architecture
//!
//! ```text
//!   market feed             user feed
//!  ┌───────────┐          ┌───────────┐
//!  │ Transport │          │ Transport │   I/O threads
//!  └─────┬─────┘          └─────┬─────┘
//!        └─────────┬────────────┘
//!             ┌────▼─────┐
//!             │ Session  │  state machine, subscriptions, reconnect
//!             └────┬─────┘
//!        ┌─────────┴──────────┐
//!  ┌─────▼──────┐      ┌──────▼───────┐
//!  │  Direct    │      │   Queued     │── RelayQueue ──┐
//!  │  Dispatch  │      │   Dispatch   │                │
//!  └─────┬──────┘      └──────────────┘         ┌──────▼────┐
//!        │                                      │ Processor │  processing thread
//!        │                                      └──────┬────┘
//!        └──────────────────┬──────────────────────────┘
//!                      ┌────▼───┐
//!                      │ Router │  envelope, sequence check, channels
//!                      └────┬───┘
//!                ┌──────────┴──────────┐
//!          ┌─────▼──────┐       ┌──────▼──────┐
//!          │ BookManager│       │ FeedHandler │  application
//!          └────────────┘       └─────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use feed_client::prelude::*;
//!
//! # fn main() -> Result<(), FeedError> {
//! let config = ClientConfig::from_env()?;
//! let (dispatch, mut processor) = Processor::with_queue(config.relay.clone(), |event: &FeedEvent, books: &BookManager| {
//!     if let FeedEvent::Level2 { batch, .. } = event {
//!         let best = books.book(batch.product_id.as_str()).and_then(|book| book.best_bid());
//!         println!("{} best bid {:?}", batch.product_id, best);
//!     }
//! })?;
//!
//! let client = FeedClient::new(config, Arc::new(WsTransportFactory::new()?), dispatch)?;
//! client.subscribe(&[ProductId::new("BTC-USD")], &[Channel::Level2, Channel::MarketTrades])?;
//!
//! loop {
//!     processor.process(DEFAULT_MAX_DRAIN);
//! }
//! # }
//! ```

pub mod auth;
pub mod channel;
pub mod config;
pub mod data_log;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod metrics;
pub mod order_book;
pub mod processor;
pub mod relay_queue;
pub mod router;
pub mod sequence;
pub mod session;
pub mod transport;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";

pub use auth::{CredentialProvider, StaticCredential};
pub use channel::{Channel, FeedKind, SubscriptionSet};
pub use config::{ClientConfig, DataLogConfig, ReconnectPolicy};
pub use dispatch::{DirectDispatch, Dispatch, QueuedDispatch};
pub use error::{ConfigError, FeedError};
pub use events::{EventKind, FeedEvent, FeedHandler};
pub use metrics::{FeedMetrics, MetricsSnapshot};
pub use order_book::{BookManager, OrderBook};
pub use processor::{Processor, DEFAULT_MAX_DRAIN};
pub use relay_queue::{BackpressurePolicy, RelayConfig, RelayQueue};
pub use router::Router;
pub use sequence::{SequenceCheck, SequenceTracker};
pub use session::{FeedClient, FeedState};
pub use transport::{Transport, TransportEvents, TransportFactory, TransportStatus, WsTransportFactory};

/// Everything needed to run a client.
pub mod prelude {
    pub use crate::{
        BookManager, Channel, ClientConfig, DirectDispatch, EventKind, FeedClient, FeedError, FeedEvent,
        FeedHandler, FeedKind, Processor, RelayConfig, ReconnectPolicy, WsTransportFactory, DEFAULT_MAX_DRAIN,
    };
    pub use types::ids::ProductId;
}
