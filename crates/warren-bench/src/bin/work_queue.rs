//! In-process work queue throughput benchmark for Warren.
//!
//! Spawns N workers competing on one queue and a publisher feeding it, then
//! counts acknowledged messages per second.
//!
//! Usage: `work_queue [workers] [prefetch]`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use warren_bench::payload;
use warren_core::{Broker, ConsumeOptions, Message, QueueOptions};

const QUEUE: &str = "bench_tasks";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;
/// Publisher backs off while this many messages are ready.
const HIGH_WATER: usize = 10_000;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let workers = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(8);
    let prefetch = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(1);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║          Warren Work Queue Throughput Benchmark              ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    run_work_queue_benchmark(workers, prefetch).await;
}

async fn run_work_queue_benchmark(workers: usize, prefetch: u16) {
    println!("📊 Work queue: {} workers, prefetch {}", workers, prefetch);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let broker = Arc::new(Broker::default());
    let admin = broker.open_connection();
    if let Err(e) = broker.declare_queue(&admin, QUEUE, QueueOptions::transient()) {
        eprintln!("Failed to declare queue: {}", e);
        return;
    }

    let acked = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(workers + 1));
    let mut handles = Vec::new();

    // Spawn worker tasks
    for worker_id in 0..workers {
        let broker = Arc::clone(&broker);
        let acked = Arc::clone(&acked);
        let barrier = Arc::clone(&barrier);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_worker(broker, prefetch, acked, barrier).await {
                eprintln!("Worker {} error: {}", worker_id, e);
            }
        }));
    }

    barrier.wait().await;
    println!("✓ All {} workers consuming", workers);

    // Publisher
    let publisher = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            let body = payload(64);
            loop {
                let backlog = broker.queue_info(QUEUE).map(|i| i.message_count).unwrap_or(0);
                if backlog < HIGH_WATER {
                    if broker.publish("", QUEUE, Message::new(body.clone())).is_err() {
                        break;
                    }
                } else {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    acked.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total = acked.load(Ordering::SeqCst);
    let per_sec = total as f64 / elapsed.as_secs_f64();

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Workers:              {:>10}                           ║", workers);
    println!("║  Prefetch:             {:>10}                           ║", prefetch);
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!("║  Acked Messages:       {:>10}                           ║", total);
    println!("║  Throughput:           {:>10.0} msg/s                    ║", per_sec);
    println!("╚══════════════════════════════════════════════════════════════╝");

    publisher.abort();
    for handle in handles {
        handle.abort();
    }
}

async fn run_worker(
    broker: Arc<Broker>,
    prefetch: u16,
    acked: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let conn = broker.open_connection();
    let mut sub = broker.consume(&conn, QUEUE, ConsumeOptions::new().with_prefetch(prefetch))?;

    barrier.wait().await;

    while let Some(delivery) = sub.recv().await {
        broker.ack(&conn, QUEUE, delivery.tag)?;
        acked.fetch_add(1, Ordering::Relaxed);
    }

    broker.close_connection(&conn);
    Ok(())
}
