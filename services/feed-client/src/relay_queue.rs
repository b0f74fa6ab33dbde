//! Bounded multi-producer / single-consumer relay queue
//!
//! Moves variable-length byte records from transport I/O threads to one
//! consumer thread without locks. The buffer is a fixed circular byte array
//! carved into 8-byte aligned records:
//!
//! ```text
//! ┌──────────────────────────────┬──────────────────────────┐
//! │ header (u64)                 │ payload (len bytes, pad) │
//! │  bits 0..31  total length    │                          │
//! │  bit  31     padding flag    │                          │
//! │  bits 32..63 payload length  │                          │
//! └──────────────────────────────┴──────────────────────────┘
//! ```
//!
//! A header of zero means "not yet published". Producers claim space by
//! advancing the write cursor with a CAS, fill the payload, then store the
//! header with `Release`. The consumer loads headers with `Acquire`, so a
//! visible record is always fully written. Records are observed in
//! reservation order; a consumer that reaches an unpublished record waits
//! for it. Consumed regions are zeroed before the read cursor moves past
//! them, which is what lets producers reuse the space.
//!
//! When a record does not fit in the space left before the end of the
//! buffer, the tail is filled with a padding record and the real record
//! starts again at offset zero.
//!
//! # Back-pressure
//!
//! The consumer is expected to drain faster than producers fill. When it
//! does not, `BackpressurePolicy` decides: `Block` (default) spins and then
//! yields until space frees up, `Reject` fails the reservation with
//! `RelayError::Full`. Records larger than half the capacity are always
//! rejected.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use serde::{Deserialize, Serialize};

/// Default capacity: 16 MiB.
pub const DEFAULT_RELAY_CAPACITY: usize = 16 * 1024 * 1024;

const MIN_CAPACITY: usize = 64;
const MAX_CAPACITY: usize = 1 << 30;
const HEADER_LEN: usize = 8;
const ALIGN: usize = 8;
const PAD_FLAG: u64 = 1 << 31;
const TOTAL_MASK: u64 = PAD_FLAG - 1;
const SPINS_BEFORE_YIELD: u32 = 64;

/// Errors raised on the producer side.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("relay queue full: {requested} bytes requested, {available} of {capacity} available")]
    Full {
        requested: usize,
        available: usize,
        capacity: usize,
    },

    #[error("record of {size} bytes exceeds the {max} byte limit")]
    RecordTooLarge { size: usize, max: usize },
}

/// What a producer does when the buffer has no room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Wait for the consumer to free space.
    #[default]
    Block,
    /// Fail the reservation immediately.
    Reject,
}

/// Queue sizing and overflow behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Buffer size in bytes; rounded up to a power of two.
    pub capacity: usize,
    pub backpressure: BackpressurePolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RELAY_CAPACITY,
            backpressure: BackpressurePolicy::Block,
        }
    }
}

#[repr(align(64))]
struct CachePadded<T>(T);

/// The relay buffer. Share it behind an `Arc`.
pub struct RelayQueue {
    words: Box<[AtomicU64]>,
    capacity: usize,
    mask: usize,
    policy: BackpressurePolicy,
    write: CachePadded<AtomicU64>,
    read: CachePadded<AtomicU64>,
    reader_taken: AtomicBool,
}

// Payload bytes are only touched by the producer that reserved them (before
// publish) or by the single reader (after the Acquire load of the header).
unsafe impl Send for RelayQueue {}
unsafe impl Sync for RelayQueue {}

impl RelayQueue {
    pub fn new(config: RelayConfig) -> Self {
        let capacity = config
            .capacity
            .clamp(MIN_CAPACITY, MAX_CAPACITY)
            .next_power_of_two();
        let words = (0..capacity / ALIGN).map(|_| AtomicU64::new(0)).collect();

        Self {
            words,
            capacity,
            mask: capacity - 1,
            policy: config.backpressure,
            write: CachePadded(AtomicU64::new(0)),
            read: CachePadded(AtomicU64::new(0)),
            reader_taken: AtomicBool::new(false),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Buffer size in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest payload a single record can carry.
    pub fn max_payload(&self) -> usize {
        self.capacity / 2 - HEADER_LEN
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Bytes reserved but not yet released by the consumer.
    pub fn used(&self) -> usize {
        let write = self.write.0.load(Ordering::Relaxed);
        let read = self.read.0.load(Ordering::Relaxed);
        write.saturating_sub(read) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.used() == 0
    }

    /// Hand out the consumer. There is exactly one; later calls return None.
    pub fn reader(self: &Arc<Self>) -> Option<RelayReader> {
        if self.reader_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(RelayReader {
            queue: Arc::clone(self),
            position: self.read.0.load(Ordering::Acquire),
            pending: 0,
        })
    }

    /// Claim space for a record of `len` payload bytes.
    pub fn reserve(&self, len: usize) -> Result<Reservation<'_>, RelayError> {
        let total = align_up(HEADER_LEN + len);
        if total > self.capacity / 2 {
            return Err(RelayError::RecordTooLarge {
                size: len,
                max: self.max_payload(),
            });
        }

        let mut spins = 0u32;
        loop {
            // Read cursor first: it never passes a write cursor loaded after it
            let read = self.read.0.load(Ordering::Acquire);
            let write = self.write.0.load(Ordering::Acquire);
            let offset = (write as usize) & self.mask;
            let contiguous = self.capacity - offset;
            let needed = if total <= contiguous { total } else { contiguous + total };

            // A stale read cursor only overstates what is in use
            let in_use = write.saturating_sub(read) as usize;
            if in_use + needed > self.capacity {
                match self.policy {
                    BackpressurePolicy::Reject => {
                        return Err(RelayError::Full {
                            requested: len,
                            available: self.capacity.saturating_sub(in_use),
                            capacity: self.capacity,
                        });
                    }
                    BackpressurePolicy::Block => {
                        backoff(&mut spins);
                        continue;
                    }
                }
            }

            if self
                .write
                .0
                .compare_exchange_weak(write, write + needed as u64, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                continue;
            }

            let mut start = offset;
            if total > contiguous {
                self.header(offset).store(contiguous as u64 | PAD_FLAG, Ordering::Release);
                start = 0;
            }

            return Ok(Reservation {
                queue: self,
                offset: start,
                total,
                len,
                published: false,
            });
        }
    }

    /// Reserve, copy and publish in one call.
    pub fn push(&self, bytes: &[u8]) -> Result<(), RelayError> {
        let mut reservation = self.reserve(bytes.len())?;
        reservation.as_mut_slice().copy_from_slice(bytes);
        reservation.publish();
        Ok(())
    }

    fn header(&self, offset: usize) -> &AtomicU64 {
        &self.words[offset / ALIGN]
    }

    fn base(&self) -> *mut u8 {
        self.words.as_ptr() as *mut u8
    }
}

/// Space claimed by one producer. Publish it or it turns into padding.
pub struct Reservation<'a> {
    queue: &'a RelayQueue,
    offset: usize,
    total: usize,
    len: usize,
    published: bool,
}

impl Reservation<'_> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The reserved payload bytes.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: [offset + HEADER_LEN, offset + total) lies inside the
        // buffer and belongs to this reservation alone until its header is
        // published; the reader does not look past a zero header.
        unsafe { std::slice::from_raw_parts_mut(self.queue.base().add(self.offset + HEADER_LEN), self.len) }
    }

    /// Copy `bytes` into the payload starting at `at`.
    pub fn write(&mut self, at: usize, bytes: &[u8]) {
        self.as_mut_slice()[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Make the record visible to the consumer.
    pub fn publish(mut self) {
        let header = ((self.len as u64) << 32) | self.total as u64;
        self.queue.header(self.offset).store(header, Ordering::Release);
        self.published = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.published {
            self.queue
                .header(self.offset)
                .store(self.total as u64 | PAD_FLAG, Ordering::Release);
        }
    }
}

/// One record handed to the consumer.
#[derive(Debug)]
pub struct RelayRead<'a> {
    /// Byte position of the record in the stream; strictly increasing.
    pub position: u64,
    pub bytes: &'a [u8],
}

/// The single consumer cursor.
pub struct RelayReader {
    queue: Arc<RelayQueue>,
    position: u64,
    pending: usize,
}

impl RelayReader {
    /// Next published record, or None if the next record is not published yet.
    ///
    /// The record returned by the previous call is released here, so its
    /// bytes must not be needed any more.
    pub fn read(&mut self) -> Option<RelayRead<'_>> {
        if self.pending > 0 {
            let total = self.pending;
            self.pending = 0;
            self.release(total);
        }

        loop {
            let offset = (self.position as usize) & self.queue.mask;
            let header = self.queue.header(offset).load(Ordering::Acquire);
            if header == 0 {
                return None;
            }

            let total = (header & TOTAL_MASK) as usize;
            if header & PAD_FLAG != 0 {
                self.release(total);
                continue;
            }

            let len = (header >> 32) as usize;
            self.pending = total;
            // SAFETY: the Acquire load above synchronizes with the producer's
            // Release store of this header, after which the payload is never
            // written again until we release it.
            let bytes = unsafe { std::slice::from_raw_parts(self.queue.base().add(offset + HEADER_LEN), len) };
            return Some(RelayRead {
                position: self.position,
                bytes,
            });
        }
    }

    /// Position of the next record to be read.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn queue(&self) -> &Arc<RelayQueue> {
        &self.queue
    }

    fn release(&mut self, total: usize) {
        let offset = (self.position as usize) & self.queue.mask;
        // SAFETY: the region was fully published and only the reader owns it
        // until the read cursor moves past it.
        unsafe { std::ptr::write_bytes(self.queue.base().add(offset), 0, total) };
        self.position += total as u64;
        self.queue.read.0.store(self.position, Ordering::Release);
    }
}

fn align_up(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

fn backoff(spins: &mut u32) {
    if *spins < SPINS_BEFORE_YIELD {
        *spins += 1;
        std::hint::spin_loop();
    } else {
        thread::yield_now();
    }
}
