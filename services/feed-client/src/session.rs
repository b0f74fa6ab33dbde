//! Session manager
//!
//! `FeedClient` owns the two feeds (market data, user data) and their
//! subscriptions. Each feed runs its own state machine:
//!
//! ```text
//!            subscribe / reconnect             transport connected
//!  Closed ─────────────────────────► Connecting ───────────────────► Open
//!    ▲                                   ▲  │                          │
//!    │ disconnected                      │  │ error           error    │
//!    │                                   │  ▼                          ▼
//!  Closing ◄──── shutdown / reconnect    └─ Errored ◄──────────────────┘
//!                                  (auto reconnect after backoff)
//! ```
//!
//! Every transport open gets a fresh `ConnectionId` (same slot, next
//! generation). Callbacks from an older generation never change feed
//! state; they are still forwarded so the dispatch can retire them.
//!
//! Transport operations run while the feed's lock is held. That is safe
//! because transports never call back synchronously from `open`, `close` or
//! `send`. Dispatch (and with it, application code in direct mode) always
//! runs without any session lock held.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use types::ids::{ConnectionId, ProductId};
use uuid::Uuid;

use crate::auth::CredentialProvider;
use crate::channel::{Channel, FeedKind, RequestType, SubscriptionRequest, SubscriptionSet};
use crate::config::ClientConfig;
use crate::data_log::DataLogger;
use crate::dispatch::Dispatch;
use crate::error::FeedError;
use crate::transport::{Transport, TransportEvents, TransportFactory, TransportStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedState {
    Closed,
    Connecting,
    Open,
    Closing,
    Errored,
}

impl FeedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedState::Closed => "closed",
            FeedState::Connecting => "connecting",
            FeedState::Open => "open",
            FeedState::Closing => "closing",
            FeedState::Errored => "errored",
        }
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct FeedSession {
    state: FeedState,
    slot: u32,
    generation: u32,
    /// Current connection; None when no transport is live.
    connection: Option<ConnectionId>,
    transport: Option<Box<dyn Transport>>,
    subscriptions: SubscriptionSet,
    reconnect_attempt: u32,
}

struct FeedSlot {
    session: Mutex<FeedSession>,
    changed: Condvar,
}

struct ClientInner {
    me: Weak<ClientInner>,
    session_id: Uuid,
    config: ClientConfig,
    factory: Arc<dyn TransportFactory>,
    dispatch: Arc<dyn Dispatch>,
    credentials: RwLock<Option<Arc<dyn CredentialProvider>>>,
    market: FeedSlot,
    user: FeedSlot,
    data_log: Option<DataLogger>,
    shutting_down: AtomicBool,
}

/// Client for the market data and user data feeds.
///
/// Dropping the client runs `shutdown`.
pub struct FeedClient {
    inner: Arc<ClientInner>,
}

impl FeedClient {
    pub fn new(
        config: ClientConfig,
        factory: Arc<dyn TransportFactory>,
        dispatch: Arc<dyn Dispatch>,
    ) -> Result<Self, FeedError> {
        let data_log = config.data_log.as_ref().map(DataLogger::start).transpose()?;
        let market_slot = dispatch.register_feed(FeedKind::Market);
        let user_slot = dispatch.register_feed(FeedKind::User);
        let session_id = Uuid::now_v7();

        info!(
            session = %session_id,
            market_url = %config.market_data_url,
            user_url = %config.user_data_url,
            reconnect = ?config.reconnect,
            data_log = data_log.is_some(),
            "Feed client created"
        );

        let inner = Arc::new_cyclic(|me| ClientInner {
            me: me.clone(),
            session_id,
            config,
            factory,
            dispatch,
            credentials: RwLock::new(None),
            market: FeedSlot::new(market_slot),
            user: FeedSlot::new(user_slot),
            data_log,
            shutting_down: AtomicBool::new(false),
        });

        Ok(Self { inner })
    }

    /// Attach the credential source for user feed requests.
    pub fn with_credentials(self, provider: Arc<dyn CredentialProvider>) -> Self {
        *self.inner.credentials.write().unwrap_or_else(PoisonError::into_inner) = Some(provider);
        self
    }

    /// Subscribe `products` to each channel, opening the owning feed if it
    /// is not connected. The subscription is recorded even when the request
    /// cannot be sent yet; it goes out when the feed opens.
    pub fn subscribe(&self, products: &[ProductId], channels: &[Channel]) -> Result<(), FeedError> {
        self.inner.ensure_running()?;

        for feed in FeedKind::ALL {
            let owned: Vec<Channel> = channels.iter().copied().filter(|c| c.feed() == feed).collect();
            if owned.is_empty() {
                continue;
            }

            let mut session = self.inner.lock(feed);
            for channel in &owned {
                session.subscriptions.add(*channel, products);
            }

            match session.state {
                FeedState::Open => {
                    for channel in &owned {
                        self.inner
                            .send_request(feed, &session, RequestType::Subscribe, *channel, products.to_vec())?;
                    }
                }
                FeedState::Connecting | FeedState::Closing => {
                    debug!(session = %self.inner.session_id, %feed, state = %session.state, "Subscription deferred until open");
                }
                FeedState::Closed | FeedState::Errored => self.inner.open(feed, &mut session)?,
            }
        }
        Ok(())
    }

    /// Remove `products` from each channel (an empty list drops the whole
    /// channel). The request is only sent while the feed is open.
    pub fn unsubscribe(&self, products: &[ProductId], channels: &[Channel]) -> Result<(), FeedError> {
        for feed in FeedKind::ALL {
            let owned: Vec<Channel> = channels.iter().copied().filter(|c| c.feed() == feed).collect();
            if owned.is_empty() {
                continue;
            }

            let mut session = self.inner.lock(feed);
            for channel in &owned {
                session.subscriptions.remove(*channel, products);
            }
            if session.state != FeedState::Open {
                continue;
            }

            for channel in &owned {
                self.inner
                    .send_request(feed, &session, RequestType::Unsubscribe, *channel, products.to_vec())?;
            }
            // The heartbeat subscription only exists to keep user
            // subscriptions alive
            if feed == FeedKind::User && session.subscriptions.is_empty() {
                self.inner
                    .send_request(feed, &session, RequestType::Unsubscribe, Channel::Heartbeats, Vec::new())?;
            }
        }
        Ok(())
    }

    /// Replace the feed's connection with a new one and reset its backoff.
    pub fn reconnect(&self, feed: FeedKind) -> Result<(), FeedError> {
        self.inner.ensure_running()?;

        let mut session = self.inner.lock(feed);
        session.reconnect_attempt = 0;
        info!(session = %self.inner.session_id, %feed, "Manual reconnect");
        self.inner.open(feed, &mut session)
    }

    pub fn state(&self, feed: FeedKind) -> FeedState {
        self.inner.lock(feed).state
    }

    /// Current connection of the feed, if one is live.
    pub fn connection(&self, feed: FeedKind) -> Option<ConnectionId> {
        self.inner.lock(feed).connection
    }

    pub fn subscriptions(&self, feed: FeedKind) -> SubscriptionSet {
        self.inner.lock(feed).subscriptions.clone()
    }

    pub fn transport_status(&self, feed: FeedKind) -> TransportStatus {
        self.inner
            .lock(feed)
            .transport
            .as_ref()
            .map(|t| t.status())
            .unwrap_or(TransportStatus::Disconnected)
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Close both feeds and wait, up to `close_timeout` per feed, for the
    /// transports to confirm. Then stop the raw-traffic logger. Returns
    /// whether every feed confirmed in time. Later calls do nothing.
    ///
    /// Must not be called from a handler running in direct mode: the
    /// confirmation it waits for is delivered by the calling thread.
    pub fn shutdown(&self) -> bool {
        self.inner.shutdown()
    }
}

impl Drop for FeedClient {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl FeedSlot {
    fn new(slot: u32) -> Self {
        Self {
            session: Mutex::new(FeedSession {
                state: FeedState::Closed,
                slot,
                generation: 0,
                connection: None,
                transport: None,
                subscriptions: SubscriptionSet::new(),
                reconnect_attempt: 0,
            }),
            changed: Condvar::new(),
        }
    }
}

impl ClientInner {
    fn slot(&self, feed: FeedKind) -> &FeedSlot {
        match feed {
            FeedKind::Market => &self.market,
            FeedKind::User => &self.user,
        }
    }

    fn lock(&self, feed: FeedKind) -> MutexGuard<'_, FeedSession> {
        self.slot(feed).session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn url(&self, feed: FeedKind) -> &str {
        match feed {
            FeedKind::Market => &self.config.market_data_url,
            FeedKind::User => &self.config.user_data_url,
        }
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> Result<(), FeedError> {
        if self.is_shutting_down() {
            return Err(FeedError::Runtime("feed client is shut down".to_string()));
        }
        Ok(())
    }

    /// Create and open a transport for the next generation of `feed`.
    fn open(&self, feed: FeedKind, session: &mut FeedSession) -> Result<(), FeedError> {
        if let Some(previous) = session.transport.take() {
            previous.close();
        }
        session.generation = session.generation.wrapping_add(1);
        let connection = ConnectionId::new(session.slot, session.generation);
        let link = Arc::new(FeedLink {
            inner: self.me.clone(),
            feed,
            connection,
        });

        let opened = self
            .factory
            .create(self.url(feed), link)
            .and_then(|transport| transport.open().map(|()| transport));

        match opened {
            Ok(transport) => {
                info!(session = %self.session_id, %feed, %connection, url = %self.url(feed), "Opening feed");
                session.transport = Some(transport);
                session.connection = Some(connection);
                session.state = FeedState::Connecting;
                Ok(())
            }
            Err(err) => {
                error!(session = %self.session_id, %feed, %connection, error = %err, "Failed to open feed");
                session.transport = None;
                session.connection = None;
                session.state = FeedState::Errored;
                Err(err)
            }
        }
    }

    fn send_request(
        &self,
        feed: FeedKind,
        session: &FeedSession,
        request_type: RequestType,
        channel: Channel,
        products: Vec<ProductId>,
    ) -> Result<(), FeedError> {
        let Some(transport) = session.transport.as_ref() else {
            return Err(FeedError::Runtime(format!("{feed} feed has no transport")));
        };

        let jwt = match feed {
            FeedKind::User => self.credential(feed),
            FeedKind::Market => None,
        };
        let message = SubscriptionRequest::new(request_type, channel, products).with_jwt(jwt).to_json()?;
        debug!(session = %self.session_id, %feed, %channel, ?request_type, "Sending subscription request");
        transport.send(message)
    }

    fn credential(&self, feed: FeedKind) -> Option<String> {
        let provider = self
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        match provider.credential(self.url(feed)) {
            Ok(token) => Some(token),
            Err(err) => {
                warn!(session = %self.session_id, %feed, error = %err, "Credential lookup failed, sending request without token");
                None
            }
        }
    }

    /// Heartbeats for the user feed, then every recorded subscription.
    fn send_on_open(&self, feed: FeedKind, session: &FeedSession) {
        let mut requests = Vec::with_capacity(session.subscriptions.len() + 1);
        if feed == FeedKind::User {
            requests.push((Channel::Heartbeats, Vec::new()));
        }
        for (channel, products) in session.subscriptions.iter() {
            requests.push((channel, products.iter().cloned().collect()));
        }

        for (channel, products) in requests {
            if let Err(err) = self.send_request(feed, session, RequestType::Subscribe, channel, products) {
                warn!(session = %self.session_id, %feed, %channel, error = %err, "Resubscribe failed");
            }
        }
    }

    fn schedule_reconnect(&self, feed: FeedKind, session: &mut FeedSession) {
        let Some(delay) = self.config.reconnect.delay(session.reconnect_attempt) else {
            return;
        };
        let attempt = session.reconnect_attempt;
        session.reconnect_attempt = session.reconnect_attempt.saturating_add(1);
        info!(
            session = %self.session_id,
            %feed,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        let me = self.me.clone();
        let spawned = thread::Builder::new()
            .name(format!("feed-reconnect-{feed}"))
            .spawn(move || {
                thread::sleep(delay);
                if let Some(inner) = me.upgrade() {
                    inner.auto_reconnect(feed);
                }
            });
        if let Err(err) = spawned {
            error!(session = %self.session_id, %feed, error = %err, "Failed to schedule reconnect");
        }
    }

    fn auto_reconnect(&self, feed: FeedKind) {
        let mut session = self.lock(feed);
        if self.is_shutting_down()
            || session.connection.is_some()
            || !matches!(session.state, FeedState::Closed | FeedState::Errored)
        {
            return;
        }
        if self.open(feed, &mut session).is_err() {
            self.schedule_reconnect(feed, &mut session);
        }
    }

    fn link_connected(&self, feed: FeedKind, connection: ConnectionId) {
        {
            let mut session = self.lock(feed);
            if session.connection == Some(connection) && session.state == FeedState::Connecting {
                info!(session = %self.session_id, %feed, %connection, "Feed open");
                session.state = FeedState::Open;
                session.reconnect_attempt = 0;
                self.send_on_open(feed, &session);
                self.slot(feed).changed.notify_all();
            } else {
                debug!(session = %self.session_id, %feed, %connection, "Connect from superseded connection");
            }
        }
        self.dispatch.connected(feed, connection);
    }

    fn link_disconnected(&self, feed: FeedKind, connection: ConnectionId) {
        // Delivered before the session lets go of the connection:
        // `await_close` treats the cleared connection as the acknowledgement
        self.dispatch.disconnected(feed, connection);

        let mut session = self.lock(feed);
        if session.connection == Some(connection) {
            let closing = session.state == FeedState::Closing || self.is_shutting_down();
            session.connection = None;
            session.transport = None;
            if closing || session.state != FeedState::Errored {
                session.state = FeedState::Closed;
            }
            info!(session = %self.session_id, %feed, %connection, state = %session.state, "Feed disconnected");

            if !closing {
                self.schedule_reconnect(feed, &mut session);
            }
            self.slot(feed).changed.notify_all();
        }
    }

    fn link_error(&self, feed: FeedKind, connection: ConnectionId, message: &str) {
        {
            let mut session = self.lock(feed);
            if session.connection == Some(connection)
                && matches!(session.state, FeedState::Connecting | FeedState::Open)
            {
                session.state = FeedState::Errored;
            }
        }
        warn!(session = %self.session_id, %feed, %connection, error = message, "Feed transport error");
        self.dispatch.error(feed, connection, message);
    }

    fn link_data(&self, feed: FeedKind, connection: ConnectionId, data: &[u8]) {
        if let Some(log) = &self.data_log {
            log.record(data);
        }
        self.dispatch.data(feed, connection, data);
    }

    fn shutdown(&self) -> bool {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return true;
        }
        info!(session = %self.session_id, "Shutting down feed client");

        for feed in FeedKind::ALL {
            let mut guard = self.lock(feed);
            let session = &mut *guard;
            match (session.transport.as_ref(), session.connection) {
                (Some(transport), Some(_)) => {
                    session.state = FeedState::Closing;
                    transport.close();
                }
                _ => session.state = FeedState::Closed,
            }
        }

        let mut clean = true;
        for feed in FeedKind::ALL {
            clean &= self.await_close(feed, self.config.close_timeout);
        }

        if let Some(log) = &self.data_log {
            match log.stop() {
                Ok(lines) => debug!(session = %self.session_id, lines, "Raw traffic log closed"),
                Err(err) => warn!(session = %self.session_id, error = %err, "Raw traffic log did not stop cleanly"),
            }
        }

        info!(session = %self.session_id, clean, "Feed client shut down");
        clean
    }

    /// Wait for the feed's transport to confirm the close. On timeout the
    /// transport is abandoned; its late callbacks are ignored.
    fn await_close(&self, feed: FeedKind, timeout: Duration) -> bool {
        let slot = self.slot(feed);
        let deadline = Instant::now() + timeout;
        let mut session = self.lock(feed);

        while session.connection.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(
                    session = %self.session_id,
                    %feed,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for disconnect, tearing down anyway"
                );
                session.connection = None;
                session.transport = None;
                session.state = FeedState::Closed;
                return false;
            }
            session = slot
                .changed
                .wait_timeout(session, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// Transport callbacks for one connection of one feed.
struct FeedLink {
    inner: Weak<ClientInner>,
    feed: FeedKind,
    connection: ConnectionId,
}

impl TransportEvents for FeedLink {
    fn on_connected(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.link_connected(self.feed, self.connection);
        }
    }

    fn on_disconnected(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.link_disconnected(self.feed, self.connection);
        }
    }

    fn on_data(&self, data: &[u8]) {
        if let Some(inner) = self.inner.upgrade() {
            inner.link_data(self.feed, self.connection, data);
        }
    }

    fn on_error(&self, message: String) {
        if let Some(inner) = self.inner.upgrade() {
            inner.link_error(self.feed, self.connection, &message);
        }
    }
}
