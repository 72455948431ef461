//! Throughput benchmarks for Warren.
//!
//! These benchmarks measure the raw routing and dispatch throughput of the
//! broker core.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use warren_bench::{broker, direct, fanout, payload};
use warren_core::{ConsumeOptions, Message, QueueOptions};

/// Benchmark publishing through a fanout exchange.
fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout");

    for size in [1, 10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (broker, conn) = broker();
            let queues = fanout(&broker, &conn, "broadcast", size);
            let mut subs: Vec<_> = queues
                .iter()
                .map(|q| {
                    broker
                        .consume(&conn, q, ConsumeOptions::new().no_ack())
                        .unwrap()
                })
                .collect();
            let body = payload(64);

            b.iter(|| {
                broker
                    .publish("broadcast", "", black_box(Message::new(body.clone())))
                    .unwrap();
                for sub in &mut subs {
                    let _ = sub.try_recv();
                }
            });
        });
    }

    group.finish();
}

/// Benchmark direct-exchange routing lookups.
fn bench_direct(c: &mut Criterion) {
    let mut group = c.benchmark_group("direct");

    group.bench_function("route_hit", |b| {
        let (broker, conn) = broker();
        direct(&broker, &conn, "logs", 100);
        let body = payload(64);

        b.iter(|| {
            broker
                .publish("logs", black_box("key-42"), Message::new(body.clone()))
                .unwrap();
            broker.purge_queue(&conn, "logs-42").unwrap()
        });
    });

    group.bench_function("route_miss", |b| {
        let (broker, conn) = broker();
        direct(&broker, &conn, "logs", 100);
        let body = payload(64);

        b.iter(|| {
            broker
                .publish("logs", black_box("nobody"), Message::new(body.clone()))
                .unwrap()
        });
    });

    group.finish();
}

/// Benchmark the deliver/ack cycle of a work queue.
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    for prefetch in [1u16, 10, 100].iter() {
        group.throughput(Throughput::Elements(u64::from(*prefetch)));
        group.bench_with_input(
            BenchmarkId::new("ack_cycle", prefetch),
            prefetch,
            |b, &prefetch| {
                let (broker, conn) = broker();
                broker
                    .declare_queue(&conn, "work", QueueOptions::transient())
                    .unwrap();
                let mut sub = broker
                    .consume(&conn, "work", ConsumeOptions::new().with_prefetch(prefetch))
                    .unwrap();
                let body = payload(64);

                b.iter(|| {
                    for _ in 0..prefetch {
                        broker.publish("", "work", Message::new(body.clone())).unwrap();
                    }
                    while let Some(delivery) = sub.try_recv() {
                        broker.ack(&conn, "work", delivery.tag).unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_fanout, bench_direct, bench_dispatch);
criterion_main!(benches);
