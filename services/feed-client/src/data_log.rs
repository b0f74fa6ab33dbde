//! Raw traffic logging
//!
//! Appends every inbound payload, one per line and in receipt order, to a
//! file. I/O threads only copy the payload into the logger's own relay
//! queue; a background thread does the file writes. Stopping drains the
//! queue before the file is flushed, so nothing recorded before `stop` is
//! lost.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::DataLogConfig;
use crate::error::FeedError;
use crate::relay_queue::{BackpressurePolicy, RelayConfig, RelayError, RelayQueue, RelayReader};

const THREAD_NAME: &str = "feed-data-log";
const IDLE_SPINS: u32 = 64;
const IDLE_SLEEP: Duration = Duration::from_millis(1);

pub struct DataLogger {
    path: PathBuf,
    queue: Arc<RelayQueue>,
    stop: Arc<AtomicBool>,
    dropped: AtomicU64,
    worker: Mutex<Option<JoinHandle<io::Result<u64>>>>,
}

impl DataLogger {
    /// Open (create or append) the log file and start the writer thread.
    pub fn start(config: &DataLogConfig) -> Result<Self, FeedError> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&config.path)?;

        let queue = Arc::new(RelayQueue::new(RelayConfig {
            capacity: config.capacity,
            backpressure: BackpressurePolicy::Reject,
        }));
        let reader = queue
            .reader()
            .ok_or_else(|| FeedError::Runtime("data log reader already taken".to_string()))?;
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(THREAD_NAME.to_string())
                .spawn(move || write_loop(reader, BufWriter::new(file), &stop))?
        };

        info!(path = %config.path.display(), capacity = queue.capacity(), "Raw traffic logging started");

        Ok(Self {
            path: config.path.clone(),
            queue,
            stop,
            dropped: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue one payload for writing. Ignored once the logger is stopping.
    ///
    /// Waits while the queue is full, but gives up (counting the record as
    /// dropped) if the logger starts stopping meanwhile: the writer may
    /// already be gone.
    pub fn record(&self, bytes: &[u8]) {
        let mut idle = 0u32;
        loop {
            if self.stop.load(Ordering::Acquire) {
                if idle > 0 {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(path = %self.path.display(), "Raw traffic record abandoned at stop");
                }
                return;
            }
            match self.queue.push(bytes) {
                Ok(()) => return,
                Err(RelayError::Full { .. }) => {
                    idle = idle.saturating_add(1);
                    if idle < IDLE_SPINS {
                        thread::yield_now();
                    } else {
                        thread::sleep(IDLE_SLEEP);
                    }
                }
                Err(err) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(path = %self.path.display(), error = %err, "Raw traffic record dropped");
                    return;
                }
            }
        }
    }

    /// Stop the writer after it has drained the queue. Returns the number
    /// of lines written; later calls return 0.
    pub fn stop(&self) -> Result<u64, FeedError> {
        self.stop.store(true, Ordering::Release);
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(worker) = worker else {
            return Ok(0);
        };

        let lines = worker
            .join()
            .map_err(|_| FeedError::Runtime(format!("{THREAD_NAME} thread panicked")))??;
        info!(path = %self.path.display(), lines, dropped = self.dropped(), "Raw traffic logging stopped");
        Ok(lines)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records that could not be queued.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl Drop for DataLogger {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(path = %self.path.display(), error = %err, "Raw traffic log did not shut down cleanly");
        }
    }
}

fn write_loop(mut reader: RelayReader, mut out: BufWriter<File>, stop: &AtomicBool) -> io::Result<u64> {
    let mut lines = 0u64;
    let mut idle = 0u32;

    loop {
        // Read the flag before draining: everything recorded before the
        // flag was set is visible to this drain
        let stopping = stop.load(Ordering::Acquire);

        let mut wrote = false;
        while let Some(read) = reader.read() {
            out.write_all(read.bytes)?;
            out.write_all(b"\n")?;
            lines += 1;
            wrote = true;
        }

        if stopping {
            break;
        }
        if wrote {
            idle = 0;
            continue;
        }
        if idle == 0 {
            out.flush()?;
        }
        idle = idle.saturating_add(1);
        if idle < IDLE_SPINS {
            thread::yield_now();
        } else {
            thread::sleep(IDLE_SLEEP);
        }
    }

    out.flush()?;
    Ok(lines)
}
