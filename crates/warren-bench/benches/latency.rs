//! Latency benchmarks for Warren.
//!
//! These benchmarks focus on the publish to ack path of a single message.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Instant;
use warren_bench::{broker, payload};
use warren_core::{ConsumeOptions, Message, QueueOptions};

/// Benchmark publish + receive + ack latency.
fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_trip");

    group.bench_function("single_consumer", |b| {
        b.iter_custom(|iters| {
            let (broker, conn) = broker();
            broker
                .declare_queue(&conn, "q", QueueOptions::transient())
                .unwrap();
            let mut sub = broker.consume(&conn, "q", ConsumeOptions::new()).unwrap();
            let body = payload(64);

            let start = Instant::now();
            for _ in 0..iters {
                broker.publish("", "q", Message::new(body.clone())).unwrap();
                if let Some(delivery) = sub.try_recv() {
                    broker.ack(&conn, "q", delivery.tag).unwrap();
                }
            }
            start.elapsed()
        });
    });

    group.bench_function("redelivery", |b| {
        b.iter_custom(|iters| {
            let (broker, conn) = broker();
            broker
                .declare_queue(&conn, "q", QueueOptions::transient())
                .unwrap();
            let mut sub = broker.consume(&conn, "q", ConsumeOptions::new()).unwrap();
            broker.publish("", "q", Message::new(payload(64))).unwrap();

            let start = Instant::now();
            for _ in 0..iters {
                if let Some(delivery) = sub.try_recv() {
                    broker.nack(&conn, "q", delivery.tag, true).unwrap();
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

/// Benchmark pull latency.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    group.bench_function("no_ack", |b| {
        let (broker, conn) = broker();
        broker
            .declare_queue(&conn, "q", QueueOptions::transient())
            .unwrap();
        let body = payload(64);

        b.iter(|| {
            broker.publish("", "q", Message::new(body.clone())).unwrap();
            black_box(broker.get(&conn, "q", true).unwrap())
        });
    });

    group.finish();
}

/// Benchmark message creation latency.
fn bench_message_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_creation");

    group.bench_function("transient", |b| {
        b.iter(|| Message::new(black_box(vec![0u8; 64])))
    });

    group.bench_function("persistent", |b| {
        b.iter(|| Message::persistent(black_box(vec![0u8; 64])))
    });

    group.finish();
}

criterion_group!(benches, bench_round_trip, bench_get, bench_message_creation);
criterion_main!(benches);
