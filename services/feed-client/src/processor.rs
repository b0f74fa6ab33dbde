//! Queued-mode consumer
//!
//! The `Processor` is owned by the designated processing thread. It drains
//! relay records written by `QueuedDispatch`, drops records of retired
//! connections and hands everything else to the router. All application
//! callbacks in queued mode run inside `process`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error};

use crate::dispatch::{self, ConnectionRegistry, QueuedDispatch, RelayRecord};
use crate::error::FeedError;
use crate::events::FeedHandler;
use crate::metrics::FeedMetrics;
use crate::order_book::BookManager;
use crate::relay_queue::{RelayConfig, RelayQueue, RelayReader};
use crate::router::Router;

/// Records handled per `process` call unless the caller asks otherwise.
pub const DEFAULT_MAX_DRAIN: usize = 100;

const IDLE_SPINS: u32 = 64;
const IDLE_SLEEP: Duration = Duration::from_micros(200);

pub struct Processor<H> {
    reader: RelayReader,
    router: Router<H>,
    registry: ConnectionRegistry,
}

impl<H: FeedHandler> Processor<H> {
    pub fn new(reader: RelayReader, router: Router<H>) -> Self {
        Self {
            reader,
            router,
            registry: ConnectionRegistry::new(),
        }
    }

    /// Build a relay queue with its producer-side dispatch and this consumer.
    /// Both sides share one set of counters.
    pub fn with_queue(config: RelayConfig, handler: H) -> Result<(Arc<QueuedDispatch>, Self), FeedError> {
        let queue = Arc::new(RelayQueue::new(config));
        let reader = queue
            .reader()
            .ok_or_else(|| FeedError::Runtime("relay queue reader already taken".to_string()))?;
        let metrics = Arc::new(FeedMetrics::new());

        let dispatch = Arc::new(QueuedDispatch::new(queue, Arc::clone(&metrics)));
        let processor = Self::new(reader, Router::with_metrics(handler, metrics));
        Ok((dispatch, processor))
    }

    /// Drain at most `max_drain` records; returns how many were taken off
    /// the queue (delivered, retired or undecodable).
    pub fn process(&mut self, max_drain: usize) -> usize {
        let mut drained = 0;
        while drained < max_drain {
            let Some(read) = self.reader.read() else {
                break;
            };
            drained += 1;

            match RelayRecord::decode(read.bytes) {
                Ok(record) => {
                    dispatch::deliver(&mut self.router, &mut self.registry, record);
                }
                Err(err) => {
                    self.router.metrics().record_parse_error();
                    error!(position = read.position, error = %err, "Dropping undecodable relay record");
                }
            }
        }
        drained
    }

    /// Process until the queue is empty.
    pub fn drain(&mut self) -> usize {
        let mut total = 0;
        loop {
            let drained = self.process(DEFAULT_MAX_DRAIN);
            total += drained;
            if drained < DEFAULT_MAX_DRAIN {
                return total;
            }
        }
    }

    /// Loop on the current thread until `stop` is set, then drain what is
    /// left. Returns the number of records handled.
    pub fn run(&mut self, stop: &AtomicBool) -> usize {
        debug!("Processor loop started");
        let mut total = 0;
        let mut idle = 0u32;

        while !stop.load(Ordering::Acquire) {
            let drained = self.process(DEFAULT_MAX_DRAIN);
            total += drained;
            if drained > 0 {
                idle = 0;
            } else if idle < IDLE_SPINS {
                idle += 1;
                thread::yield_now();
            } else {
                thread::sleep(IDLE_SLEEP);
            }
        }

        total += self.drain();
        debug!(records = total, "Processor loop stopped");
        total
    }

    pub fn router(&self) -> &Router<H> {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut Router<H> {
        &mut self.router
    }

    pub fn books(&self) -> &BookManager {
        self.router.books()
    }

    pub fn handler(&self) -> &H {
        self.router.handler()
    }

    pub fn metrics(&self) -> &Arc<FeedMetrics> {
        self.router.metrics()
    }

    pub fn into_router(self) -> Router<H> {
        self.router
    }
}
