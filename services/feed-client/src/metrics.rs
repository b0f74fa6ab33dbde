//! Pipeline counters
//!
//! Cheap atomic counters updated by the router, the queued dispatcher and
//! the processor. `export` flattens them into a sorted map for whatever
//! exporter the host application runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct FeedMetrics {
    pub messages_processed: AtomicU64,
    pub events_delivered: AtomicU64,
    pub parse_errors: AtomicU64,
    pub sequence_gaps: AtomicU64,
    pub unknown_channels: AtomicU64,
    pub stale_book_events: AtomicU64,
    pub unknown_book_products: AtomicU64,
    /// Records that could not be queued (full queue under `Reject`).
    pub relay_dropped: AtomicU64,
    /// Records discarded because their connection was no longer live.
    pub retired_records: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub messages_processed: u64,
    pub events_delivered: u64,
    pub parse_errors: u64,
    pub sequence_gaps: u64,
    pub unknown_channels: u64,
    pub stale_book_events: u64,
    pub unknown_book_products: u64,
    pub relay_dropped: u64,
    pub retired_records: u64,
}

impl FeedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gap(&self) {
        self.sequence_gaps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_channel(&self) {
        self.unknown_channels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self, count: usize) {
        if count > 0 {
            self.stale_book_events.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn record_unknown_products(&self, count: usize) {
        if count > 0 {
            self.unknown_book_products.fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    pub fn record_relay_drop(&self) {
        self.relay_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retired(&self) {
        self.retired_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            sequence_gaps: self.sequence_gaps.load(Ordering::Relaxed),
            unknown_channels: self.unknown_channels.load(Ordering::Relaxed),
            stale_book_events: self.stale_book_events.load(Ordering::Relaxed),
            unknown_book_products: self.unknown_book_products.load(Ordering::Relaxed),
            relay_dropped: self.relay_dropped.load(Ordering::Relaxed),
            retired_records: self.retired_records.load(Ordering::Relaxed),
        }
    }

    /// Export all counters as a sorted key-value map.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let s = self.snapshot();
        let mut m = BTreeMap::new();
        m.insert("messages_processed".to_string(), s.messages_processed);
        m.insert("events_delivered".to_string(), s.events_delivered);
        m.insert("parse_errors".to_string(), s.parse_errors);
        m.insert("sequence_gaps".to_string(), s.sequence_gaps);
        m.insert("unknown_channels".to_string(), s.unknown_channels);
        m.insert("stale_book_events".to_string(), s.stale_book_events);
        m.insert("unknown_book_products".to_string(), s.unknown_book_products);
        m.insert("relay_dropped".to_string(), s.relay_dropped);
        m.insert("retired_records".to_string(), s.retired_records);
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = FeedMetrics::new();
        metrics.record_message();
        metrics.record_message();
        metrics.record_gap();
        metrics.record_stale(0);
        metrics.record_stale(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_processed, 2);
        assert_eq!(snapshot.sequence_gaps, 1);
        assert_eq!(snapshot.stale_book_events, 3);
        assert_eq!(snapshot.parse_errors, 0);
    }

    #[test]
    fn test_export_is_sorted_and_complete() {
        let metrics = FeedMetrics::new();
        metrics.record_relay_drop();
        let exported = metrics.export();
        assert_eq!(exported.len(), 9);
        assert_eq!(exported["relay_dropped"], 1);
        assert_eq!(exported.keys().next().map(String::as_str), Some("events_delivered"));
    }
}
