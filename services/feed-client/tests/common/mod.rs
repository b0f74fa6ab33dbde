//! Scripted in-memory transport for integration tests.
//!
//! Each `open` registers a `MockConnection` the test drives by hand:
//! `connect`, `deliver`, `fail`, `drop_connection`. Outbound requests are
//! captured for inspection.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use feed_client::events::{FeedEvent, FeedHandler};
use feed_client::order_book::BookManager;
use feed_client::transport::{Transport, TransportEvents, TransportFactory, TransportStatus};
use feed_client::FeedError;
use serde_json::{json, Value};

pub const MARKET_URL: &str = "wss://market.test";
pub const USER_URL: &str = "wss://user.test";

pub struct MockConnection {
    pub url: String,
    events: Arc<dyn TransportEvents>,
    sent: Mutex<Vec<String>>,
    status: Mutex<TransportStatus>,
    close_requested: AtomicBool,
    ack_close: bool,
}

impl MockConnection {
    pub fn connect(&self) {
        *self.status.lock().unwrap() = TransportStatus::Connected;
        self.events.on_connected();
    }

    pub fn deliver(&self, message: &str) {
        self.events.on_data(message.as_bytes());
    }

    /// Transport error followed by the disconnect.
    pub fn fail(&self, message: &str) {
        self.events.on_error(message.to_string());
        self.drop_connection();
    }

    pub fn drop_connection(&self) {
        *self.status.lock().unwrap() = TransportStatus::Disconnected;
        self.events.on_disconnected();
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent()
            .iter()
            .map(|message| serde_json::from_str(message).unwrap())
            .collect()
    }

    pub fn close_requested(&self) -> bool {
        self.close_requested.load(Ordering::Acquire)
    }

    pub fn status(&self) -> TransportStatus {
        *self.status.lock().unwrap()
    }
}

struct MockTransport(Arc<MockConnection>);

impl Transport for MockTransport {
    fn open(&self) -> Result<(), FeedError> {
        *self.0.status.lock().unwrap() = TransportStatus::Connecting;
        Ok(())
    }

    fn close(&self) {
        if self.0.close_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.0.status.lock().unwrap() = TransportStatus::Disconnecting;
        if self.0.ack_close {
            // Acknowledge from another thread, never inside close()
            let connection = Arc::clone(&self.0);
            thread::spawn(move || connection.drop_connection());
        }
    }

    fn send(&self, message: String) -> Result<(), FeedError> {
        self.0.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn status(&self) -> TransportStatus {
        self.0.status()
    }
}

/// Factory recording every connection it creates.
pub struct MockNetwork {
    connections: Mutex<Vec<Arc<MockConnection>>>,
    ack_close: bool,
}

impl MockNetwork {
    /// Closes are acknowledged asynchronously.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(Vec::new()),
            ack_close: true,
        })
    }

    /// Closes are never acknowledged.
    pub fn unresponsive() -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(Vec::new()),
            ack_close: false,
        })
    }

    pub fn connections(&self, url: &str) -> Vec<Arc<MockConnection>> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.url == url)
            .cloned()
            .collect()
    }

    pub fn latest(&self, url: &str) -> Arc<MockConnection> {
        self.connections(url).pop().expect("no connection opened")
    }

    pub fn count(&self, url: &str) -> usize {
        self.connections(url).len()
    }

    /// Wait until `count` connections to `url` exist.
    pub fn wait_for(&self, url: &str, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.count(url) >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        self.count(url) >= count
    }
}

impl TransportFactory for MockNetwork {
    fn create(&self, url: &str, events: Arc<dyn TransportEvents>) -> Result<Box<dyn Transport>, FeedError> {
        let connection = Arc::new(MockConnection {
            url: url.to_string(),
            events,
            sent: Mutex::new(Vec::new()),
            status: Mutex::new(TransportStatus::Disconnected),
            close_requested: AtomicBool::new(false),
            ack_close: self.ack_close,
        });
        self.connections.lock().unwrap().push(Arc::clone(&connection));
        Ok(Box::new(MockTransport(connection)))
    }
}

/// Handler keeping every event.
#[derive(Default)]
pub struct Collector {
    pub events: Vec<FeedEvent>,
}

impl Collector {
    pub fn labels(&self) -> Vec<&'static str> {
        self.events.iter().map(FeedEvent::label).collect()
    }
}

impl FeedHandler for Collector {
    fn on_event(&mut self, event: &FeedEvent, _books: &BookManager) {
        self.events.push(event.clone());
    }
}

pub fn envelope(channel: &str, seq: i64, events: Value) -> String {
    json!({
        "channel": channel,
        "client_id": "",
        "timestamp": "2023-02-09T20:32:50.714964855Z",
        "sequence_num": seq,
        "events": events
    })
    .to_string()
}

pub fn heartbeat(seq: i64) -> String {
    envelope(
        "heartbeats",
        seq,
        json!([{ "current_time": "2023-06-23 20:31:56.121961769 +0000 UTC m=+91717.525857105", "heartbeat_counter": seq }]),
    )
}

/// Level-2 event for BTC-USD; `levels` are (side, price, quantity, event nanos).
pub fn level2(seq: i64, kind: &str, levels: &[(&str, &str, &str, u32)]) -> String {
    let updates: Vec<Value> = levels
        .iter()
        .map(|(side, price, qty, nanos)| {
            json!({
                "side": side,
                "event_time": format!("2023-02-09T20:32:50.{:09}Z", nanos),
                "price_level": price,
                "new_quantity": qty
            })
        })
        .collect();
    envelope("l2_data", seq, json!([{ "type": kind, "product_id": "BTC-USD", "updates": updates }]))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
