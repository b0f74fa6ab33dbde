//! Transport collaborator
//!
//! The session only talks to the network through these traits. A transport
//! carries one connection: it is created per open, reports through its
//! `TransportEvents`, and is discarded after its single `on_disconnected`.
//!
//! Contract for implementations: `open`, `close` and `send` never invoke
//! `TransportEvents` synchronously. Callbacks arrive later, from the
//! transport's own I/O thread(s).
//!
//! `WsTransport` is the production implementation: one tokio task per
//! connection driving a tokio-tungstenite stream.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::{SinkExt, StreamExt};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::FeedError;

/// Worker threads of the runtime owned by `WsTransportFactory::new`.
const IO_WORKER_THREADS: usize = 2;
const IO_THREAD_NAME: &str = "feed-io";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportStatus {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl TransportStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TransportStatus::Connecting,
            2 => TransportStatus::Connected,
            3 => TransportStatus::Disconnecting,
            _ => TransportStatus::Disconnected,
        }
    }
}

/// Callbacks raised by a transport, on its own thread.
pub trait TransportEvents: Send + Sync {
    fn on_connected(&self);

    /// Raised exactly once per transport, last.
    fn on_disconnected(&self);

    fn on_data(&self, data: &[u8]);

    fn on_error(&self, message: String);
}

pub trait Transport: Send + Sync {
    /// Start connecting. Completion is reported through `on_connected` or
    /// `on_error` followed by `on_disconnected`.
    fn open(&self) -> Result<(), FeedError>;

    /// Request a close; `on_disconnected` follows.
    fn close(&self);

    /// Queue a text message. Messages sent before the connection is up go
    /// out once it is.
    fn send(&self, message: String) -> Result<(), FeedError>;

    fn status(&self) -> TransportStatus;
}

pub trait TransportFactory: Send + Sync {
    fn create(&self, url: &str, events: Arc<dyn TransportEvents>) -> Result<Box<dyn Transport>, FeedError>;
}

/// Runtime that is shut down in the background when the last user drops it,
/// so it can be released from any thread.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

#[derive(Clone)]
struct RuntimeHandle {
    handle: Handle,
    // Keeps an owned runtime alive while any transport still uses it
    _owned: Option<Arc<OwnedRuntime>>,
}

/// Creates `WsTransport`s on a shared tokio runtime.
#[derive(Clone)]
pub struct WsTransportFactory {
    runtime: RuntimeHandle,
}

impl WsTransportFactory {
    /// Own a dedicated multi-threaded runtime.
    pub fn new() -> Result<Self, FeedError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(IO_WORKER_THREADS)
            .thread_name(IO_THREAD_NAME)
            .enable_all()
            .build()?;
        let handle = runtime.handle().clone();

        Ok(Self {
            runtime: RuntimeHandle {
                handle,
                _owned: Some(Arc::new(OwnedRuntime(Some(runtime)))),
            },
        })
    }

    /// Spawn connections on an existing runtime.
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            runtime: RuntimeHandle { handle, _owned: None },
        }
    }
}

impl TransportFactory for WsTransportFactory {
    fn create(&self, url: &str, events: Arc<dyn TransportEvents>) -> Result<Box<dyn Transport>, FeedError> {
        Ok(Box::new(WsTransport::new(url, events, self.runtime.clone())))
    }
}

/// One WebSocket connection.
pub struct WsTransport {
    url: String,
    events: Arc<dyn TransportEvents>,
    runtime: RuntimeHandle,
    status: Arc<AtomicU8>,
    outbound: mpsc::UnboundedSender<String>,
    pending: Mutex<Option<(mpsc::UnboundedReceiver<String>, watch::Receiver<bool>)>>,
    shutdown: watch::Sender<bool>,
}

impl WsTransport {
    fn new(url: &str, events: Arc<dyn TransportEvents>, runtime: RuntimeHandle) -> Self {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        Self {
            url: url.to_string(),
            events,
            runtime,
            status: Arc::new(AtomicU8::new(TransportStatus::Disconnected as u8)),
            outbound,
            pending: Mutex::new(Some((outbound_rx, shutdown_rx))),
            shutdown,
        }
    }
}

impl Transport for WsTransport {
    fn open(&self) -> Result<(), FeedError> {
        let (outbound_rx, shutdown_rx) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| FeedError::Runtime(format!("transport for {} already opened", self.url)))?;

        self.status.store(TransportStatus::Connecting as u8, Ordering::Release);
        self.runtime.handle.spawn(run_connection(
            self.url.clone(),
            Arc::clone(&self.events),
            outbound_rx,
            shutdown_rx,
            Arc::clone(&self.status),
        ));
        Ok(())
    }

    fn close(&self) {
        let _ = self.status.compare_exchange(
            TransportStatus::Connected as u8,
            TransportStatus::Disconnecting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let _ = self.status.compare_exchange(
            TransportStatus::Connecting as u8,
            TransportStatus::Disconnecting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.shutdown.send_replace(true);
    }

    fn send(&self, message: String) -> Result<(), FeedError> {
        self.outbound
            .send(message)
            .map_err(|_| FeedError::Runtime(format!("connection to {} has ended", self.url)))
    }

    fn status(&self) -> TransportStatus {
        TransportStatus::from_u8(self.status.load(Ordering::Acquire))
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn run_connection(
    url: String,
    events: Arc<dyn TransportEvents>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<bool>,
    status: Arc<AtomicU8>,
) {
    let set_status = |value: TransportStatus| status.store(value as u8, Ordering::Release);

    let connected = tokio::select! {
        result = connect_async(url.as_str()) => Some(result),
        _ = shutdown.wait_for(|stop| *stop) => None,
    };

    let mut stream = match connected {
        Some(Ok((stream, _response))) => stream,
        Some(Err(err)) => {
            warn!(url = %url, error = %err, "WebSocket connect failed");
            events.on_error(format!("connect to {url} failed: {err}"));
            set_status(TransportStatus::Disconnected);
            events.on_disconnected();
            return;
        }
        None => {
            debug!(url = %url, "Close requested before connect completed");
            set_status(TransportStatus::Disconnected);
            events.on_disconnected();
            return;
        }
    };

    info!(url = %url, "WebSocket connected");
    // A close requested while connecting still wins
    if *shutdown.borrow() {
        let _ = stream.close(None).await;
        set_status(TransportStatus::Disconnected);
        events.on_disconnected();
        return;
    }
    set_status(TransportStatus::Connected);
    events.on_connected();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = stream.close(None).await;
                    break;
                }
            }
            Some(message) = outbound.recv() => {
                if let Err(err) = stream.send(Message::Text(message.into())).await {
                    events.on_error(format!("send failed: {err}"));
                    break;
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => events.on_data(text.as_bytes()),
                    Some(Ok(Message::Binary(binary))) => events.on_data(&binary),
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(err) = stream.send(Message::Pong(payload)).await {
                            events.on_error(format!("pong failed: {err}"));
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(url = %url, ?frame, "WebSocket closed by peer");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        events.on_error(err.to_string());
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    info!(url = %url, "WebSocket disconnected");
    set_status(TransportStatus::Disconnected);
    events.on_disconnected();
}
