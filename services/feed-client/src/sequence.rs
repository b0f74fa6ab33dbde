//! Per-connection sequence tracking
//!
//! Each feed stamps every message with `sequence_num`, incrementing by one
//! per message on a connection. The tracker keeps the last accepted number
//! per (connection, feed) and classifies each new number:
//!
//! - first observation for a key seeds the tracker and is accepted
//! - `last + 1` is accepted and advances the state
//! - anything else is a gap; the state is NOT advanced, so every
//!   out-of-place number keeps being reported against the same `last`
//!
//! State is reset whenever the connection drops, so a new stream never
//! compares against numbers from a previous one. `check` is safe to call
//! concurrently from several I/O threads (direct mode).

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};
use types::ids::ConnectionId;

use crate::channel::FeedKind;

/// Outcome of a sequence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    Accepted,
    Gap { last: i64, received: i64 },
}

impl SequenceCheck {
    pub fn is_gap(&self) -> bool {
        matches!(self, SequenceCheck::Gap { .. })
    }
}

#[derive(Debug, Default)]
pub struct SequenceTracker {
    last: DashMap<(ConnectionId, FeedKind), i64>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&self, connection: ConnectionId, feed: FeedKind, seq: i64) -> SequenceCheck {
        match self.last.entry((connection, feed)) {
            Entry::Vacant(entry) => {
                debug!(%connection, %feed, sequence = seq, "Sequence tracker seeded");
                entry.insert(seq);
                SequenceCheck::Accepted
            }
            Entry::Occupied(mut entry) => {
                let last = *entry.get();
                if last.checked_add(1) == Some(seq) {
                    entry.insert(seq);
                    SequenceCheck::Accepted
                } else {
                    warn!(
                        %connection,
                        %feed,
                        last_sequence = last,
                        received_sequence = seq,
                        "Sequence gap detected"
                    );
                    SequenceCheck::Gap { last, received: seq }
                }
            }
        }
    }

    /// Forget the state for one key; the next message seeds it again.
    pub fn reset(&self, connection: ConnectionId, feed: FeedKind) {
        if self.last.remove(&(connection, feed)).is_some() {
            debug!(%connection, %feed, "Sequence tracker reset");
        }
    }

    pub fn last_accepted(&self, connection: ConnectionId, feed: FeedKind) -> Option<i64> {
        self.last.get(&(connection, feed)).map(|entry| *entry.value())
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    const A: ConnectionId = ConnectionId::new(0, 1);
    const B: ConnectionId = ConnectionId::new(1, 1);

    #[test]
    fn test_first_value_seeds() {
        let tracker = SequenceTracker::new();
        assert_eq!(tracker.last_accepted(A, FeedKind::Market), None);
        assert_eq!(tracker.check(A, FeedKind::Market, 42), SequenceCheck::Accepted);
        assert_eq!(tracker.last_accepted(A, FeedKind::Market), Some(42));
    }

    #[test]
    fn test_gaps_do_not_advance() {
        let tracker = SequenceTracker::new();
        assert_eq!(tracker.check(A, FeedKind::Market, 1), SequenceCheck::Accepted);
        assert_eq!(tracker.check(A, FeedKind::Market, 2), SequenceCheck::Accepted);
        assert_eq!(
            tracker.check(A, FeedKind::Market, 4),
            SequenceCheck::Gap { last: 2, received: 4 }
        );
        assert_eq!(
            tracker.check(A, FeedKind::Market, 5),
            SequenceCheck::Gap { last: 2, received: 5 }
        );
        assert_eq!(tracker.last_accepted(A, FeedKind::Market), Some(2));
        assert_eq!(tracker.check(A, FeedKind::Market, 3), SequenceCheck::Accepted);
    }

    #[test]
    fn test_duplicate_and_regressed_are_gaps() {
        let tracker = SequenceTracker::new();
        tracker.check(A, FeedKind::User, 10);
        assert!(tracker.check(A, FeedKind::User, 10).is_gap());
        assert!(tracker.check(A, FeedKind::User, 3).is_gap());
        assert_eq!(tracker.last_accepted(A, FeedKind::User), Some(10));
    }

    #[test]
    fn test_keys_are_independent() {
        let tracker = SequenceTracker::new();
        for seq in 1..=3 {
            assert_eq!(tracker.check(A, FeedKind::Market, seq), SequenceCheck::Accepted);
        }
        // A different connection seeds on its own first message
        assert_eq!(tracker.check(B, FeedKind::Market, 5), SequenceCheck::Accepted);
        // Same connection, other feed class
        assert_eq!(tracker.check(A, FeedKind::User, 900), SequenceCheck::Accepted);
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn test_reset_reseeds() {
        let tracker = SequenceTracker::new();
        tracker.check(A, FeedKind::Market, 7);
        tracker.reset(A, FeedKind::Market);
        assert!(tracker.is_empty());
        assert_eq!(tracker.check(A, FeedKind::Market, 1), SequenceCheck::Accepted);
    }

    #[test]
    fn test_overflow_is_a_gap() {
        let tracker = SequenceTracker::new();
        tracker.check(A, FeedKind::Market, i64::MAX);
        assert!(tracker.check(A, FeedKind::Market, i64::MIN).is_gap());
    }

    #[test]
    fn test_concurrent_connections() {
        let tracker = Arc::new(SequenceTracker::new());
        let handles: Vec<_> = (0..4u32)
            .map(|slot| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    let id = ConnectionId::new(slot, 0);
                    (0..1_000i64)
                        .filter(|seq| tracker.check(id, FeedKind::Market, *seq).is_gap())
                        .count()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 0);
        }
        for slot in 0..4u32 {
            assert_eq!(tracker.last_accepted(ConnectionId::new(slot, 0), FeedKind::Market), Some(999));
        }
    }

    proptest! {
        #[test]
        fn prop_last_accepted_tracks_accepted_messages(seqs in proptest::collection::vec(0i64..50, 1..200)) {
            let tracker = SequenceTracker::new();
            let mut expected: Option<i64> = None;

            for seq in seqs {
                let before = tracker.last_accepted(A, FeedKind::Market);
                prop_assert_eq!(before, expected);
                match tracker.check(A, FeedKind::Market, seq) {
                    SequenceCheck::Accepted => {
                        prop_assert!(expected.map_or(true, |last| seq == last + 1));
                        expected = Some(seq);
                    }
                    SequenceCheck::Gap { last, received } => {
                        prop_assert_eq!(Some(last), expected);
                        prop_assert_eq!(received, seq);
                        prop_assert_ne!(seq, last + 1);
                        prop_assert_eq!(tracker.last_accepted(A, FeedKind::Market), expected);
                    }
                }
            }
        }
    }
}
