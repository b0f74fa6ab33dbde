//! Multi-producer stress tests for the relay queue.

use std::sync::Arc;
use std::thread;

use feed_client::relay_queue::{BackpressurePolicy, RelayConfig, RelayQueue};

const PRODUCERS: u32 = 4;
const PER_PRODUCER: u32 = 5_000;

fn record(producer: u32, n: u32) -> Vec<u8> {
    // Variable length so records straddle the wrap point at different offsets
    let mut bytes = Vec::with_capacity(8 + (n % 37) as usize);
    bytes.extend_from_slice(&producer.to_le_bytes());
    bytes.extend_from_slice(&n.to_le_bytes());
    bytes.resize(8 + (n % 37) as usize, producer as u8);
    bytes
}

fn parse(bytes: &[u8]) -> (u32, u32) {
    let producer = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let n = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    assert_eq!(bytes.len(), 8 + (n % 37) as usize, "record length corrupted");
    assert!(bytes[8..].iter().all(|b| *b == producer as u8), "record payload corrupted");
    (producer, n)
}

#[test]
fn test_producers_keep_their_own_order_under_block_policy() {
    let queue = Arc::new(RelayQueue::new(RelayConfig {
        capacity: 4096,
        backpressure: BackpressurePolicy::Block,
    }));
    let mut reader = queue.reader().unwrap();

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for n in 0..PER_PRODUCER {
                    queue.push(&record(producer, n)).unwrap();
                }
            })
        })
        .collect();

    let mut next = vec![0u32; PRODUCERS as usize];
    let mut last_position = None;
    let mut total = 0u32;
    while total < PRODUCERS * PER_PRODUCER {
        let Some(read) = reader.read() else {
            thread::yield_now();
            continue;
        };
        if let Some(last) = last_position {
            assert!(read.position > last);
        }
        last_position = Some(read.position);

        let (producer, n) = parse(read.bytes);
        assert_eq!(n, next[producer as usize], "producer {producer} out of order");
        next[producer as usize] += 1;
        total += 1;
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(reader.read().is_none());
    assert!(next.iter().all(|count| *count == PER_PRODUCER));
}

#[test]
fn test_reject_policy_never_reorders_accepted_records() {
    let queue = Arc::new(RelayQueue::new(RelayConfig {
        capacity: 1024,
        backpressure: BackpressurePolicy::Reject,
    }));
    let mut reader = queue.reader().unwrap();

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut accepted = 0u32;
                for n in 0..PER_PRODUCER {
                    if queue.push(&record(producer, n)).is_ok() {
                        accepted += 1;
                    }
                }
                accepted
            })
        })
        .collect();

    let mut last_seen: Vec<Option<u32>> = vec![None; PRODUCERS as usize];
    let mut received = 0u32;
    let mut check = |bytes: &[u8]| {
        let (producer, n) = parse(bytes);
        let slot = &mut last_seen[producer as usize];
        if let Some(prev) = *slot {
            assert!(n > prev, "producer {producer} went backwards");
        }
        *slot = Some(n);
    };

    while handles.iter().any(|h| !h.is_finished()) {
        while let Some(read) = reader.read() {
            check(read.bytes);
            received += 1;
        }
        thread::yield_now();
    }
    while let Some(read) = reader.read() {
        check(read.bytes);
        received += 1;
    }

    let accepted: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(received, accepted);
}
