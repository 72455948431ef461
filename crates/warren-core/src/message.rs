//! Message types for Warren.
//!
//! A [`Message`] is what a producer publishes. Every queue it is routed to
//! holds its own [`Envelope`], and consumers receive a [`Delivery`].

use crate::consumer::ConsumerTag;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = u64;

/// Per-queue delivery tag, assigned when a message leaves `ready`.
pub type DeliveryTag = u64;

/// Last identifier handed out; ids are strictly increasing process-wide.
static LAST_ID: AtomicU64 = AtomicU64::new(0);

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Generate a unique message ID.
///
/// IDs are derived from the wall clock and bumped past the last issued one,
/// so they also order persisted records by publish time.
#[must_use]
pub fn generate_message_id() -> MessageId {
    let now = now_nanos();
    let (Ok(prev) | Err(prev)) = LAST_ID.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
        Some(now.max(last + 1))
    });
    now.max(prev + 1)
}

/// Make sure freshly generated ids sort after a recovered one.
pub(crate) fn observe_message_id(id: MessageId) {
    LAST_ID.fetch_max(id, Ordering::AcqRel);
}

/// An immutable message envelope published by a producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    payload: Bytes,
    persistent: bool,
    timestamp: u64,
}

impl Message {
    /// Create a transient message.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            id: generate_message_id(),
            payload: payload.into(),
            persistent: false,
            timestamp: now_millis(),
        }
    }

    /// Create a persistent message.
    ///
    /// Persistent messages routed to durable queues survive a broker restart.
    #[must_use]
    pub fn persistent(payload: impl Into<Bytes>) -> Self {
        Self::new(payload).with_persistent(true)
    }

    /// Set the persistence flag.
    #[must_use]
    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub(crate) fn restore(id: MessageId, payload: Bytes, persistent: bool, timestamp: u64) -> Self {
        Self {
            id,
            payload,
            persistent,
            timestamp,
        }
    }

    #[must_use]
    pub fn id(&self) -> MessageId {
        self.id
    }

    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Creation time in milliseconds since the Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// One queue's independent copy of a routed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// The message itself.
    pub message: Message,
    /// Exchange the message was published to (`""` for the default exchange).
    pub exchange: String,
    /// Routing key used at publish time.
    pub routing_key: String,
    /// Whether this copy has been handed out before.
    pub redelivered: bool,
}

impl Envelope {
    /// Wrap a message with its routing information.
    #[must_use]
    pub fn new(
        message: Message,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self {
            message,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            redelivered: false,
        }
    }
}

/// A message handed to a consumer or returned by a pull.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Tag to ack or nack this delivery with.
    pub tag: DeliveryTag,
    /// Consumer the delivery was pushed to; `None` for pulled messages.
    pub consumer_tag: Option<ConsumerTag>,
    /// Queue the delivery came from.
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub message: Message,
}

impl Delivery {
    pub(crate) fn new(
        tag: DeliveryTag,
        consumer_tag: Option<ConsumerTag>,
        queue: &str,
        envelope: &Envelope,
    ) -> Self {
        Self {
            tag,
            consumer_tag,
            queue: queue.to_string(),
            exchange: envelope.exchange.clone(),
            routing_key: envelope.routing_key.clone(),
            redelivered: envelope.redelivered,
            message: envelope.message.clone(),
        }
    }

    /// Get the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        self.message.payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new(b"hello".to_vec());
        assert_eq!(&msg.payload()[..], b"hello");
        assert!(!msg.is_persistent());
        assert!(msg.timestamp() > 0);

        let durable = Message::persistent("task...");
        assert!(durable.is_persistent());
    }

    #[test]
    fn test_message_ids_increase() {
        let ids: Vec<_> = (0..1000).map(|_| generate_message_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_observed_id_bumps_generator() {
        let far = generate_message_id() + 1_000_000_000_000;
        observe_message_id(far);
        assert!(generate_message_id() > far);
    }

    #[test]
    fn test_delivery_copies_routing() {
        let envelope = Envelope::new(Message::new("x"), "logs_direct", "error");
        let delivery = Delivery::new(7, Some("ctag-1".into()), "errors", &envelope);
        assert_eq!(delivery.tag, 7);
        assert_eq!(delivery.queue, "errors");
        assert_eq!(delivery.routing_key, "error");
        assert!(!delivery.redelivered);
        assert_eq!(delivery.message.id(), envelope.message.id());
    }
}
