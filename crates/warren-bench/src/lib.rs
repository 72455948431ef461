//! Shared fixtures for the Warren benchmarks.

use bytes::Bytes;
use warren_core::{Broker, ConnectionId, ExchangeKind, QueueOptions};

/// Payload of `size` zero bytes.
#[must_use]
pub fn payload(size: usize) -> Bytes {
    Bytes::from(vec![0u8; size])
}

/// A broker with one connection already open.
#[must_use]
pub fn broker() -> (Broker, ConnectionId) {
    let broker = Broker::default();
    let conn = broker.open_connection();
    (broker, conn)
}

/// Declare a fanout exchange bound to `queues` transient queues named
/// `<exchange>-<i>`.
///
/// # Panics
///
/// Panics if a declaration fails.
pub fn fanout(broker: &Broker, conn: &ConnectionId, exchange: &str, queues: usize) -> Vec<String> {
    broker
        .declare_exchange(exchange, ExchangeKind::Fanout, false)
        .expect("declare exchange");
    (0..queues)
        .map(|i| {
            let name = format!("{exchange}-{i}");
            broker
                .declare_queue(conn, &name, QueueOptions::transient())
                .expect("declare queue");
            broker.bind(conn, exchange, &name, "").expect("bind");
            name
        })
        .collect()
}

/// Declare a direct exchange with `keys` queues, queue `i` bound with key
/// `key-<i>`.
///
/// # Panics
///
/// Panics if a declaration fails.
pub fn direct(broker: &Broker, conn: &ConnectionId, exchange: &str, keys: usize) {
    broker
        .declare_exchange(exchange, ExchangeKind::Direct, false)
        .expect("declare exchange");
    for i in 0..keys {
        let name = format!("{exchange}-{i}");
        broker
            .declare_queue(conn, &name, QueueOptions::transient())
            .expect("declare queue");
        broker
            .bind(conn, exchange, &name, &format!("key-{i}"))
            .expect("bind");
    }
}
