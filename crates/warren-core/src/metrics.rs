//! Broker instrumentation.
//!
//! Uses the `metrics` facade; nothing is recorded unless the host installs a
//! recorder (the server installs a Prometheus exporter).

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric names.
pub mod names {
    pub const PUBLISHED_TOTAL: &str = "warren_messages_published_total";
    pub const ROUTED_TOTAL: &str = "warren_messages_routed_total";
    pub const UNROUTABLE_TOTAL: &str = "warren_messages_unroutable_total";
    pub const DELIVERIES_TOTAL: &str = "warren_deliveries_total";
    pub const ACKS_TOTAL: &str = "warren_acks_total";
    pub const NACKS_TOTAL: &str = "warren_nacks_total";
    pub const ACK_LATENCY_SECONDS: &str = "warren_ack_latency_seconds";
    pub const QUEUE_READY: &str = "warren_queue_ready";
    pub const QUEUE_UNACKED: &str = "warren_queue_unacked";
    pub const DURABILITY_FAILURES_TOTAL: &str = "warren_durability_failures_total";
}

/// Register descriptions for every broker metric.
pub fn describe() {
    metrics::describe_counter!(names::PUBLISHED_TOTAL, "Messages accepted by publish");
    metrics::describe_counter!(
        names::ROUTED_TOTAL,
        "Message copies enqueued into queues"
    );
    metrics::describe_counter!(
        names::UNROUTABLE_TOTAL,
        "Published messages that matched no queue and were dropped"
    );
    metrics::describe_counter!(names::DELIVERIES_TOTAL, "Messages pushed to consumers");
    metrics::describe_counter!(names::ACKS_TOTAL, "Acknowledged deliveries");
    metrics::describe_counter!(names::NACKS_TOTAL, "Negatively acknowledged deliveries");
    metrics::describe_histogram!(
        names::ACK_LATENCY_SECONDS,
        "Time between delivery and acknowledgment"
    );
    metrics::describe_gauge!(names::QUEUE_READY, "Messages waiting for delivery");
    metrics::describe_gauge!(names::QUEUE_UNACKED, "Messages delivered but not acknowledged");
    metrics::describe_counter!(
        names::DURABILITY_FAILURES_TOTAL,
        "Publishes rejected because persistence failed"
    );
}

pub(crate) fn record_publish() {
    counter!(names::PUBLISHED_TOTAL).increment(1);
}

pub(crate) fn record_routed(copies: usize) {
    counter!(names::ROUTED_TOTAL).increment(copies as u64);
}

pub(crate) fn record_unroutable() {
    counter!(names::UNROUTABLE_TOTAL).increment(1);
}

pub(crate) fn record_deliveries(delivered: usize, redelivered: usize) {
    if delivered > redelivered {
        counter!(names::DELIVERIES_TOTAL, "redelivered" => "false")
            .increment((delivered - redelivered) as u64);
    }
    if redelivered > 0 {
        counter!(names::DELIVERIES_TOTAL, "redelivered" => "true").increment(redelivered as u64);
    }
}

pub(crate) fn record_ack(held: Duration) {
    counter!(names::ACKS_TOTAL).increment(1);
    histogram!(names::ACK_LATENCY_SECONDS).record(held.as_secs_f64());
}

pub(crate) fn record_nack(requeue: bool) {
    let requeue = if requeue { "true" } else { "false" };
    counter!(names::NACKS_TOTAL, "requeue" => requeue).increment(1);
}

pub(crate) fn record_durability_failure() {
    counter!(names::DURABILITY_FAILURES_TOTAL).increment(1);
}

pub(crate) fn set_queue_depth(queue: &str, ready: usize, unacked: usize) {
    gauge!(names::QUEUE_READY, "queue" => queue.to_string()).set(ready as f64);
    gauge!(names::QUEUE_UNACKED, "queue" => queue.to_string()).set(unacked as f64);
}
