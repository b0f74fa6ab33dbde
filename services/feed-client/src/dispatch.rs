//! Transport callback sinks
//!
//! The session hands every transport callback to a `Dispatch`. Two modes:
//!
//! - `DirectDispatch` runs the router on the calling I/O thread. Both feeds
//!   share one router behind a mutex.
//! - `QueuedDispatch` encodes the callback as a relay record and pushes it
//!   onto a `RelayQueue`; a `Processor` on the designated processing thread
//!   decodes and routes it. Only that thread ever runs application code.
//!
//! Relay record layout:
//!
//! ```text
//! ┌──────────┬─────────────────────────┬─────────────────────┐
//! │ kind: u8 │ connection: 8 bytes LE  │ payload             │
//! │ A..F M U │ slot u32 | generation   │ message / error text│
//! └──────────┴─────────────────────────┴─────────────────────┘
//! ```
//!
//! Connections are generational handles. Once a slot has been seen with a
//! newer generation, records from older generations are retired: dropped
//! and counted instead of delivered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};
use types::ids::ConnectionId;

use crate::channel::FeedKind;
use crate::error::FeedError;
use crate::events::FeedHandler;
use crate::metrics::FeedMetrics;
use crate::relay_queue::RelayQueue;
use crate::router::Router;

/// Kind byte plus encoded connection id.
pub const RECORD_HEADER_LEN: usize = 1 + ConnectionId::ENCODED_LEN;

/// Relay record discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    MarketConnected = b'A',
    MarketDisconnected = b'B',
    UserConnected = b'C',
    UserDisconnected = b'D',
    MarketError = b'E',
    UserError = b'F',
    MarketData = b'M',
    UserData = b'U',
}

/// Transport callback carried by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    Error,
    Data,
}

impl RecordKind {
    pub fn new(feed: FeedKind, event: LinkEvent) -> Self {
        match (feed, event) {
            (FeedKind::Market, LinkEvent::Connected) => RecordKind::MarketConnected,
            (FeedKind::Market, LinkEvent::Disconnected) => RecordKind::MarketDisconnected,
            (FeedKind::Market, LinkEvent::Error) => RecordKind::MarketError,
            (FeedKind::Market, LinkEvent::Data) => RecordKind::MarketData,
            (FeedKind::User, LinkEvent::Connected) => RecordKind::UserConnected,
            (FeedKind::User, LinkEvent::Disconnected) => RecordKind::UserDisconnected,
            (FeedKind::User, LinkEvent::Error) => RecordKind::UserError,
            (FeedKind::User, LinkEvent::Data) => RecordKind::UserData,
        }
    }

    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            b'A' => RecordKind::MarketConnected,
            b'B' => RecordKind::MarketDisconnected,
            b'C' => RecordKind::UserConnected,
            b'D' => RecordKind::UserDisconnected,
            b'E' => RecordKind::MarketError,
            b'F' => RecordKind::UserError,
            b'M' => RecordKind::MarketData,
            b'U' => RecordKind::UserData,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn feed(self) -> FeedKind {
        match self {
            RecordKind::MarketConnected
            | RecordKind::MarketDisconnected
            | RecordKind::MarketError
            | RecordKind::MarketData => FeedKind::Market,
            RecordKind::UserConnected
            | RecordKind::UserDisconnected
            | RecordKind::UserError
            | RecordKind::UserData => FeedKind::User,
        }
    }

    pub fn event(self) -> LinkEvent {
        match self {
            RecordKind::MarketConnected | RecordKind::UserConnected => LinkEvent::Connected,
            RecordKind::MarketDisconnected | RecordKind::UserDisconnected => LinkEvent::Disconnected,
            RecordKind::MarketError | RecordKind::UserError => LinkEvent::Error,
            RecordKind::MarketData | RecordKind::UserData => LinkEvent::Data,
        }
    }
}

/// A decoded relay record borrowing its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayRecord<'a> {
    pub kind: RecordKind,
    pub connection: ConnectionId,
    pub payload: &'a [u8],
}

impl<'a> RelayRecord<'a> {
    pub fn new(kind: RecordKind, connection: ConnectionId, payload: &'a [u8]) -> Self {
        Self {
            kind,
            connection,
            payload,
        }
    }

    pub fn decode(bytes: &'a [u8]) -> Result<Self, FeedError> {
        if bytes.len() < RECORD_HEADER_LEN {
            return Err(FeedError::BadRecord(format!("{} byte record is shorter than its header", bytes.len())));
        }
        let kind = RecordKind::from_u8(bytes[0])
            .ok_or_else(|| FeedError::BadRecord(format!("unknown record kind {:#04x}", bytes[0])))?;

        let mut id = [0u8; ConnectionId::ENCODED_LEN];
        id.copy_from_slice(&bytes[1..RECORD_HEADER_LEN]);

        Ok(Self {
            kind,
            connection: ConnectionId::from_le_bytes(id),
            payload: &bytes[RECORD_HEADER_LEN..],
        })
    }

    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_LEN + self.payload.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.kind.as_u8());
        out.extend_from_slice(&self.connection.to_le_bytes());
        out.extend_from_slice(self.payload);
        out
    }
}

/// Sink for transport callbacks.
///
/// Implementations are shared by every I/O thread of every client attached
/// to them.
pub trait Dispatch: Send + Sync {
    /// Allocate the connection slot for one feed of one client.
    fn register_feed(&self, feed: FeedKind) -> u32;

    fn connected(&self, feed: FeedKind, connection: ConnectionId);

    fn disconnected(&self, feed: FeedKind, connection: ConnectionId);

    fn data(&self, feed: FeedKind, connection: ConnectionId, bytes: &[u8]);

    fn error(&self, feed: FeedKind, connection: ConnectionId, message: &str);
}

/// Newest generation seen per slot.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    newest: HashMap<u32, u32>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether records from `connection` may still be delivered. Seeing a
    /// newer generation retires every older one on the same slot.
    pub fn admit(&mut self, connection: ConnectionId) -> bool {
        match self.newest.get(&connection.slot()).copied() {
            Some(newest) if is_older(connection.generation(), newest) => false,
            _ => {
                self.newest.insert(connection.slot(), connection.generation());
                true
            }
        }
    }

    pub fn newest(&self, slot: u32) -> Option<u32> {
        self.newest.get(&slot).copied()
    }
}

/// Generation order with wrap-around.
fn is_older(generation: u32, newest: u32) -> bool {
    (newest.wrapping_sub(generation) as i32) > 0
}

/// Route one record through the router, unless its connection is retired.
///
/// Returns false when the record was dropped.
pub fn deliver<H: FeedHandler>(
    router: &mut Router<H>,
    registry: &mut ConnectionRegistry,
    record: RelayRecord<'_>,
) -> bool {
    let feed = record.kind.feed();
    let connection = record.connection;

    if !registry.admit(connection) {
        router.metrics().record_retired();
        debug!(%feed, %connection, kind = ?record.kind, "Dropping record from retired connection");
        if record.kind.event() == LinkEvent::Disconnected {
            router.retire(feed, connection);
        }
        return false;
    }

    match record.kind.event() {
        LinkEvent::Connected => router.on_connected(feed, connection),
        LinkEvent::Disconnected => router.on_disconnected(feed, connection),
        LinkEvent::Error => {
            let message = String::from_utf8_lossy(record.payload).into_owned();
            router.on_error(feed, connection, message);
        }
        LinkEvent::Data => router.handle(feed, connection, record.payload),
    }
    true
}

#[derive(Debug, Default)]
struct SlotAllocator(AtomicU32);

impl SlotAllocator {
    fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

struct DirectState<H> {
    router: Router<H>,
    registry: ConnectionRegistry,
}

/// Runs the router synchronously on the I/O thread that received the data.
///
/// Handlers must not block: they hold up the transport and, through the
/// shared mutex, the other feed.
pub struct DirectDispatch<H> {
    state: Mutex<DirectState<H>>,
    slots: SlotAllocator,
}

impl<H: FeedHandler> DirectDispatch<H> {
    pub fn new(router: Router<H>) -> Self {
        Self {
            state: Mutex::new(DirectState {
                router,
                registry: ConnectionRegistry::new(),
            }),
            slots: SlotAllocator::default(),
        }
    }

    pub fn from_handler(handler: H) -> Self {
        Self::new(Router::new(handler))
    }

    /// Run `f` with exclusive access to the router (books, handler, metrics).
    pub fn with_router<R>(&self, f: impl FnOnce(&mut Router<H>) -> R) -> R {
        f(&mut self.lock().router)
    }

    pub fn into_router(self) -> Router<H> {
        self.state.into_inner().unwrap_or_else(PoisonError::into_inner).router
    }

    fn lock(&self) -> MutexGuard<'_, DirectState<H>> {
        // A handler panic leaves consistent state behind; keep going
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, record: RelayRecord<'_>) {
        let mut guard = self.lock();
        let state = &mut *guard;
        deliver(&mut state.router, &mut state.registry, record);
    }
}

impl<H: FeedHandler> Dispatch for DirectDispatch<H> {
    fn register_feed(&self, _feed: FeedKind) -> u32 {
        self.slots.next()
    }

    fn connected(&self, feed: FeedKind, connection: ConnectionId) {
        self.deliver(RelayRecord::new(RecordKind::new(feed, LinkEvent::Connected), connection, &[]));
    }

    fn disconnected(&self, feed: FeedKind, connection: ConnectionId) {
        self.deliver(RelayRecord::new(RecordKind::new(feed, LinkEvent::Disconnected), connection, &[]));
    }

    fn data(&self, feed: FeedKind, connection: ConnectionId, bytes: &[u8]) {
        self.deliver(RelayRecord::new(RecordKind::new(feed, LinkEvent::Data), connection, bytes));
    }

    fn error(&self, feed: FeedKind, connection: ConnectionId, message: &str) {
        self.deliver(RelayRecord::new(
            RecordKind::new(feed, LinkEvent::Error),
            connection,
            message.as_bytes(),
        ));
    }
}

/// Relays transport callbacks to the processing thread.
pub struct QueuedDispatch {
    queue: Arc<RelayQueue>,
    metrics: Arc<FeedMetrics>,
    slots: SlotAllocator,
}

impl QueuedDispatch {
    pub fn new(queue: Arc<RelayQueue>, metrics: Arc<FeedMetrics>) -> Self {
        Self {
            queue,
            metrics,
            slots: SlotAllocator::default(),
        }
    }

    pub fn queue(&self) -> &Arc<RelayQueue> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<FeedMetrics> {
        &self.metrics
    }

    fn push(&self, kind: RecordKind, connection: ConnectionId, payload: &[u8]) {
        let mut reservation = match self.queue.reserve(RECORD_HEADER_LEN + payload.len()) {
            Ok(reservation) => reservation,
            Err(err) => {
                self.metrics.record_relay_drop();
                warn!(feed = %kind.feed(), %connection, ?kind, error = %err, "Relay record dropped");
                return;
            }
        };

        reservation.write(0, &[kind.as_u8()]);
        reservation.write(1, &connection.to_le_bytes());
        reservation.write(RECORD_HEADER_LEN, payload);
        reservation.publish();
    }
}

impl Dispatch for QueuedDispatch {
    fn register_feed(&self, _feed: FeedKind) -> u32 {
        self.slots.next()
    }

    fn connected(&self, feed: FeedKind, connection: ConnectionId) {
        self.push(RecordKind::new(feed, LinkEvent::Connected), connection, &[]);
    }

    fn disconnected(&self, feed: FeedKind, connection: ConnectionId) {
        self.push(RecordKind::new(feed, LinkEvent::Disconnected), connection, &[]);
    }

    fn data(&self, feed: FeedKind, connection: ConnectionId, bytes: &[u8]) {
        self.push(RecordKind::new(feed, LinkEvent::Data), connection, bytes);
    }

    fn error(&self, feed: FeedKind, connection: ConnectionId, message: &str) {
        self.push(RecordKind::new(feed, LinkEvent::Error), connection, message.as_bytes());
    }
}
