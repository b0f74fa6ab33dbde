use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use feed_client::channel::FeedKind;
use feed_client::dispatch::{LinkEvent, RecordKind, RelayRecord};
use feed_client::events::FeedEvent;
use feed_client::order_book::BookManager;
use feed_client::relay_queue::{BackpressurePolicy, RelayConfig, RelayQueue};
use feed_client::router::Router;
use types::ids::ConnectionId;

const LEVEL2_UPDATE: &str = r#"{"channel":"l2_data","client_id":"","timestamp":"2023-02-09T20:32:50.714964855Z","sequence_num":2,"events":[{"type":"update","product_id":"BTC-USD","updates":[{"side":"bid","event_time":"2023-02-09T20:32:50.714964855Z","price_level":"21921.73","new_quantity":"0.06317902"},{"side":"offer","event_time":"2023-02-09T20:32:50.714964855Z","price_level":"21921.74","new_quantity":"0.5"}]}]}"#;

fn bench_push_read(c: &mut Criterion) {
    let queue = Arc::new(RelayQueue::new(RelayConfig {
        capacity: 1 << 20,
        backpressure: BackpressurePolicy::Reject,
    }));
    let mut reader = queue.reader().unwrap();
    let payload = LEVEL2_UPDATE.as_bytes();

    let mut group = c.benchmark_group("relay_queue");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("push_read_one", |b| {
        b.iter(|| {
            queue.push(black_box(payload)).unwrap();
            black_box(reader.read().unwrap().bytes.len());
        });
    });
    group.bench_function("push_read_batch_64", |b| {
        b.iter(|| {
            for _ in 0..64 {
                queue.push(black_box(payload)).unwrap();
            }
            let mut n = 0;
            while let Some(read) = reader.read() {
                n += read.bytes.len();
            }
            black_box(n);
        });
    });
    group.finish();
}

fn bench_record_codec(c: &mut Criterion) {
    let kind = RecordKind::new(FeedKind::Market, LinkEvent::Data);
    let connection = ConnectionId::new(3, 17);
    let record = RelayRecord::new(kind, connection, LEVEL2_UPDATE.as_bytes());
    let encoded = record.encode();

    c.bench_function("relay_record_encode", |b| b.iter(|| black_box(record.encode())));
    c.bench_function("relay_record_decode", |b| {
        b.iter(|| black_box(RelayRecord::decode(black_box(&encoded)).unwrap()))
    });
}

fn bench_router(c: &mut Criterion) {
    let connection = ConnectionId::new(0, 1);

    c.bench_function("router_level2_update", |b| {
        b.iter_batched(
            || {
                let mut router = Router::new(|_: &FeedEvent, _: &BookManager| {});
                router.on_connected(FeedKind::Market, connection);
                router
            },
            |mut router| {
                router.handle(FeedKind::Market, connection, black_box(LEVEL2_UPDATE.as_bytes()));
                router
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_push_read, bench_record_codec, bench_router);
criterion_main!(benches);
