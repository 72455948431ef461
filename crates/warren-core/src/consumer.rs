//! Consumer registration and the push subscription handed back to callers.

use crate::message::Delivery;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// A consumer tag, unique across the broker.
pub type ConsumerTag = String;

static CONSUMER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a broker-unique consumer tag.
#[must_use]
pub fn generate_consumer_tag() -> ConsumerTag {
    format!("ctag-{}", CONSUMER_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Options for registering a consumer.
#[derive(Debug, Clone, Default)]
pub struct ConsumeOptions {
    /// Explicit consumer tag; generated when absent.
    pub consumer_tag: Option<ConsumerTag>,
    /// Maximum unacknowledged deliveries (`0` = unlimited). Falls back to the
    /// broker's default prefetch when absent.
    pub prefetch: Option<u16>,
    /// Settle deliveries as soon as they are pushed.
    pub no_ack: bool,
}

impl ConsumeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<ConsumerTag>) -> Self {
        self.consumer_tag = Some(tag.into());
        self
    }

    #[must_use]
    pub fn with_prefetch(mut self, prefetch: u16) -> Self {
        self.prefetch = Some(prefetch);
        self
    }

    #[must_use]
    pub fn no_ack(mut self) -> Self {
        self.no_ack = true;
        self
    }
}

/// A standing subscription on a queue.
///
/// Deliveries arrive until the consumer is cancelled, the queue is deleted
/// or the owning connection closes. Dropping the subscription counts as
/// losing the consumer: its unacknowledged deliveries are requeued.
#[derive(Debug)]
pub struct Subscription {
    consumer_tag: ConsumerTag,
    queue: String,
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub(crate) fn new(
        consumer_tag: ConsumerTag,
        queue: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            consumer_tag,
            queue: queue.into(),
            receiver,
        }
    }

    #[must_use]
    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait for the next delivery.
    ///
    /// Returns `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Take a delivery if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Delivery;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Envelope, Message};
    use futures_util::StreamExt;

    #[test]
    fn test_generated_tags_are_unique() {
        assert_ne!(generate_consumer_tag(), generate_consumer_tag());
    }

    #[test]
    fn test_consume_options_builder() {
        let opts = ConsumeOptions::new().with_tag("worker").with_prefetch(5).no_ack();
        assert_eq!(opts.consumer_tag.as_deref(), Some("worker"));
        assert_eq!(opts.prefetch, Some(5));
        assert!(opts.no_ack);
    }

    #[tokio::test]
    async fn test_subscription_stream_ends_when_sender_drops() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new("ctag".into(), "q", rx);

        let envelope = Envelope::new(Message::new("a"), "", "q");
        tx.send(Delivery::new(1, Some("ctag".into()), "q", &envelope))
            .unwrap();
        drop(tx);

        let first = sub.next().await.unwrap();
        assert_eq!(first.tag, 1);
        assert!(sub.next().await.is_none());
    }
}
