//! Queues.
//!
//! A queue holds a FIFO of ready messages and, through its dispatcher, the
//! ledger of delivered but unacknowledged ones. A message copy is always in
//! exactly one of the two. Every operation on a queue takes its own lock, so
//! unrelated queues never contend.

use crate::connection::ConnectionId;
use crate::consumer::ConsumerTag;
use crate::dispatcher::{ConsumerSlot, DispatchPass, Dispatcher};
use crate::error::BrokerError;
use crate::message::{Delivery, DeliveryTag, Envelope, MessageId};
use crate::metrics;
use crate::store::{MessageStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

/// Declared shape of a queue, as stored by durability backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDef {
    pub name: String,
    pub durable: bool,
}

/// Queue declaration options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueOptions {
    /// Survive a broker restart.
    pub durable: bool,
    /// Owned by the declaring connection and deleted when it closes.
    pub exclusive: bool,
}

impl QueueOptions {
    #[must_use]
    pub fn transient() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn durable() -> Self {
        Self {
            durable: true,
            exclusive: false,
        }
    }

    #[must_use]
    pub fn exclusive() -> Self {
        Self {
            durable: false,
            exclusive: true,
        }
    }
}

/// Queue status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    /// Ready messages.
    pub message_count: usize,
    pub consumer_count: usize,
    pub unacked_count: usize,
}

#[derive(Debug)]
struct QueueState {
    ready: VecDeque<Envelope>,
    dispatcher: Dispatcher,
    deleted: bool,
}

/// A named queue.
#[derive(Debug)]
pub struct Queue {
    name: String,
    durable: bool,
    exclusive_owner: Option<ConnectionId>,
    /// Set when persistent messages in this queue must be written through.
    store: Option<Arc<dyn MessageStore>>,
    state: Mutex<QueueState>,
}

impl Queue {
    pub(crate) fn new(
        name: impl Into<String>,
        options: QueueOptions,
        owner: Option<ConnectionId>,
        store: Option<Arc<dyn MessageStore>>,
    ) -> Self {
        Self {
            name: name.into(),
            durable: options.durable,
            exclusive_owner: if options.exclusive { owner } else { None },
            store,
            state: Mutex::new(QueueState {
                ready: VecDeque::new(),
                dispatcher: Dispatcher::new(),
                deleted: false,
            }),
        }
    }

    /// Draw delivery tags from a counter shared with other queues.
    pub(crate) fn with_delivery_tags(mut self, tags: Arc<AtomicU64>) -> Self {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.dispatcher = Dispatcher::with_tags(tags);
        self
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.exclusive_owner.is_some()
    }

    #[must_use]
    pub fn exclusive_owner(&self) -> Option<&ConnectionId> {
        self.exclusive_owner.as_ref()
    }

    #[must_use]
    pub fn is_owned_by(&self, connection: &ConnectionId) -> bool {
        self.exclusive_owner.as_ref() == Some(connection)
    }

    #[must_use]
    pub fn def(&self) -> QueueDef {
        QueueDef {
            name: self.name.clone(),
            durable: self.durable,
        }
    }

    #[must_use]
    pub fn info(&self) -> QueueInfo {
        let state = self.lock();
        QueueInfo {
            name: self.name.clone(),
            message_count: state.ready.len(),
            consumer_count: state.dispatcher.consumer_count(),
            unacked_count: state.dispatcher.unacked_count(),
        }
    }

    /// Outstanding deliveries of a consumer on this queue.
    #[must_use]
    pub fn outstanding(&self, consumer_tag: &str) -> Option<usize> {
        self.lock().dispatcher.outstanding(consumer_tag)
    }

    /// Fail with `ResourceLocked` unless `connection` may use this queue.
    pub(crate) fn check_access(&self, connection: &ConnectionId) -> Result<(), BrokerError> {
        match &self.exclusive_owner {
            Some(owner) if owner != connection => Err(BrokerError::ResourceLocked(self.name.clone())),
            _ => Ok(()),
        }
    }

    pub(crate) fn persists_messages(&self) -> bool {
        self.store.is_some()
    }

    /// Write a persistent message through to the store.
    ///
    /// Returns `true` if a record was written.
    pub(crate) fn persist(&self, envelope: &Envelope) -> Result<bool, StoreError> {
        match &self.store {
            Some(store) if envelope.message.is_persistent() => {
                store.persist(&self.name, envelope)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub(crate) fn discard_persisted(&self, id: MessageId) {
        if let Some(store) = &self.store {
            if let Err(e) = store.remove_persisted(&self.name, id) {
                // The record may resurface after a restart, which
                // at-least-once delivery allows.
                warn!(queue = %self.name, message = id, error = %e, "Failed to remove persisted message");
            }
        }
    }

    /// Destroy envelopes that left the queue for good.
    fn settle(&self, envelopes: impl IntoIterator<Item = Envelope>) {
        for envelope in envelopes {
            if envelope.message.is_persistent() {
                self.discard_persisted(envelope.message.id());
            }
        }
    }

    fn run_dispatch(&self, state: &mut QueueState) {
        let pass = state.dispatcher.dispatch(&self.name, &mut state.ready);
        self.finish_pass(pass);
        metrics::set_queue_depth(
            &self.name,
            state.ready.len(),
            state.dispatcher.unacked_count(),
        );
    }

    fn finish_pass(&self, pass: DispatchPass) {
        if pass.delivered > 0 {
            metrics::record_deliveries(pass.delivered, pass.redelivered);
        }
        for tag in &pass.lost {
            debug!(queue = %self.name, consumer = %tag, "Dropped consumer with closed subscription");
        }
        self.settle(pass.settled);
    }

    /// Append a message to `ready` and dispatch.
    ///
    /// Returns `false` if the queue has been deleted in the meantime.
    pub(crate) fn enqueue(&self, envelope: Envelope) -> bool {
        let mut state = self.lock();
        if state.deleted {
            return false;
        }
        trace!(queue = %self.name, message = envelope.message.id(), "Enqueued");
        state.ready.push_back(envelope);
        self.run_dispatch(&mut state);
        true
    }

    /// Load recovered messages into `ready`.
    pub(crate) fn restore(&self, envelopes: Vec<Envelope>) {
        let mut state = self.lock();
        state.ready.extend(envelopes);
        self.run_dispatch(&mut state);
    }

    /// Register a consumer and dispatch to it.
    ///
    /// Returns `false` if the queue has been deleted in the meantime.
    pub(crate) fn add_consumer(&self, slot: ConsumerSlot) -> bool {
        let mut state = self.lock();
        if state.deleted {
            return false;
        }
        state.dispatcher.add_consumer(slot);
        self.run_dispatch(&mut state);
        true
    }

    /// Stop deliveries to a consumer. Its outstanding deliveries stay unacked.
    pub(crate) fn cancel_consumer(&self, tag: &str) -> bool {
        let removed = self.lock().dispatcher.remove_consumer(tag);
        if removed {
            debug!(queue = %self.name, consumer = %tag, "Consumer cancelled");
        }
        removed
    }

    /// Requeue everything a lost consumer held and redispatch.
    pub(crate) fn consumer_lost(&self, tag: &str) -> bool {
        let mut state = self.lock();
        if !state.dispatcher.has_consumer(tag) {
            return false;
        }
        let state = &mut *state;
        state.dispatcher.consumer_lost(tag, &mut state.ready);
        self.run_dispatch(state);
        true
    }

    /// Requeue everything a closed connection held, drop its consumers and
    /// redispatch. Returns the removed consumer tags.
    pub(crate) fn connection_lost(&self, connection: &ConnectionId) -> Vec<ConsumerTag> {
        let mut state = self.lock();
        let state = &mut *state;
        let (requeued, tags) = state.dispatcher.connection_lost(connection, &mut state.ready);
        if requeued > 0 || !tags.is_empty() {
            debug!(
                queue = %self.name,
                connection = %connection,
                requeued = requeued,
                consumers = tags.len(),
                "Connection lost"
            );
            self.run_dispatch(state);
        }
        tags
    }

    /// Acknowledge a delivery held by `connection`, destroying the message.
    pub(crate) fn ack(
        &self,
        connection: &ConnectionId,
        tag: DeliveryTag,
    ) -> Result<(), BrokerError> {
        let mut state = self.lock();
        let settled = state
            .dispatcher
            .ack(connection, tag)
            .ok_or_else(|| self.unknown_tag(tag))?;
        metrics::record_ack(settled.delivered_at.elapsed());
        trace!(queue = %self.name, tag = tag, "Acked");
        self.settle([settled.envelope]);
        self.run_dispatch(&mut state);
        Ok(())
    }

    /// Negatively acknowledge a delivery, requeuing it to the head of the
    /// queue or dropping it.
    pub(crate) fn nack(
        &self,
        connection: &ConnectionId,
        tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        let mut state = self.lock();
        let state = &mut *state;
        let dropped = state
            .dispatcher
            .nack(connection, tag, requeue, &mut state.ready)
            .map_err(|()| self.unknown_tag(tag))?;
        metrics::record_nack(requeue);
        trace!(queue = %self.name, tag = tag, requeue = requeue, "Nacked");
        self.settle(dropped);
        self.run_dispatch(state);
        Ok(())
    }

    fn unknown_tag(&self, tag: DeliveryTag) -> BrokerError {
        BrokerError::UnknownDeliveryTag {
            queue: self.name.clone(),
            tag,
        }
    }

    /// Pull the head of the queue.
    pub(crate) fn get(&self, connection: &ConnectionId, no_ack: bool) -> Option<Delivery> {
        let mut state = self.lock();
        let state = &mut *state;
        let (delivery, settled) =
            state
                .dispatcher
                .get(&self.name, connection, no_ack, &mut state.ready)?;
        self.settle(settled);
        metrics::record_deliveries(1, usize::from(delivery.redelivered));
        metrics::set_queue_depth(
            &self.name,
            state.ready.len(),
            state.dispatcher.unacked_count(),
        );
        Some(delivery)
    }

    /// Drop every ready message. Unacknowledged deliveries are untouched.
    pub(crate) fn purge(&self) -> usize {
        let mut state = self.lock();
        let purged: Vec<Envelope> = state.ready.drain(..).collect();
        let count = purged.len();
        self.settle(purged);
        metrics::set_queue_depth(&self.name, 0, state.dispatcher.unacked_count());
        debug!(queue = %self.name, purged = count, "Purged");
        count
    }

    /// Mark the queue deleted, end every subscription and discard all
    /// contents. Returns the number of discarded ready messages and the
    /// consumer tags that were registered.
    pub(crate) fn close(&self) -> (usize, Vec<ConsumerTag>) {
        let mut state = self.lock();
        state.deleted = true;
        let tags = state.dispatcher.clear_consumers();
        let discarded = state.ready.len();
        state.ready.clear();
        state.dispatcher.drain_unacked();
        metrics::set_queue_depth(&self.name, 0, 0);
        (discarded, tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;

    fn envelope(payload: &'static str, persistent: bool) -> Envelope {
        Envelope::new(
            Message::new(payload).with_persistent(persistent),
            "",
            "q",
        )
    }

    fn conn() -> ConnectionId {
        "conn".into()
    }

    fn slot(tag: &str, prefetch: u16) -> (ConsumerSlot, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            ConsumerSlot::new(tag.into(), "conn".into(), prefetch, false, tx),
            rx,
        )
    }

    #[test]
    fn test_enqueue_preserves_order() {
        let queue = Queue::new("q", QueueOptions::transient(), None, None);
        for p in ["A", "B", "C"] {
            assert!(queue.enqueue(envelope(p, false)));
        }
        assert_eq!(queue.info().message_count, 3);

        let conn: ConnectionId = "conn".into();
        let got: Vec<_> = std::iter::from_fn(|| queue.get(&conn, true))
            .map(|d| d.payload().clone())
            .collect();
        assert_eq!(got, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_double_ack_fails() {
        let queue = Queue::new("q", QueueOptions::transient(), None, None);
        let (slot, mut rx) = slot("c1", 1);
        queue.add_consumer(slot);
        queue.enqueue(envelope("A", false));

        let delivery = rx.try_recv().unwrap();
        queue.ack(&conn(), delivery.tag).unwrap();
        assert!(matches!(
            queue.ack(&conn(), delivery.tag),
            Err(BrokerError::UnknownDeliveryTag { tag, .. }) if tag == delivery.tag
        ));
    }

    #[test]
    fn test_exclusive_access() {
        let owner: ConnectionId = "owner".into();
        let queue = Queue::new("q", QueueOptions::exclusive(), Some(owner.clone()), None);
        assert!(queue.is_owned_by(&owner));
        assert!(queue.check_access(&owner).is_ok());
        assert!(matches!(
            queue.check_access(&"intruder".into()),
            Err(BrokerError::ResourceLocked(_))
        ));
    }

    #[test]
    fn test_ack_removes_persisted_copy() {
        let store = MemoryStore::new();
        let queue = Queue::new(
            "q",
            QueueOptions::durable(),
            None,
            Some(Arc::new(store.clone())),
        );
        let env = envelope("A", true);
        assert!(queue.persist(&env).unwrap());
        assert!(!queue.persist(&envelope("B", false)).unwrap());
        queue.enqueue(env);
        assert_eq!(store.persisted_count("q"), 1);

        let (slot, mut rx) = slot("c1", 1);
        queue.add_consumer(slot);
        let delivery = rx.try_recv().unwrap();
        assert_eq!(store.persisted_count("q"), 1);
        queue.ack(&conn(), delivery.tag).unwrap();
        assert_eq!(store.persisted_count("q"), 0);
    }

    #[test]
    fn test_nack_without_requeue_drops() {
        let queue = Queue::new("q", QueueOptions::transient(), None, None);
        let (slot, mut rx) = slot("c1", 1);
        queue.add_consumer(slot);
        queue.enqueue(envelope("A", false));
        queue.enqueue(envelope("B", false));

        let first = rx.try_recv().unwrap();
        queue.nack(&conn(), first.tag, false).unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(second.payload(), "B");
        assert!(!second.redelivered);
    }

    #[test]
    fn test_close_ends_subscriptions() {
        let queue = Queue::new("q", QueueOptions::transient(), None, None);
        let (slot, mut rx) = slot("c1", 1);
        queue.add_consumer(slot);
        queue.enqueue(envelope("A", false));
        queue.enqueue(envelope("B", false));

        let (discarded, tags) = queue.close();
        assert_eq!(discarded, 1);
        assert_eq!(tags, vec!["c1".to_string()]);
        assert!(rx.try_recv().is_ok());
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(!queue.enqueue(envelope("C", false)));
    }

    #[test]
    fn test_purge_keeps_unacked() {
        let queue = Queue::new("q", QueueOptions::transient(), None, None);
        let (slot, _rx) = slot("c1", 1);
        queue.add_consumer(slot);
        for p in ["A", "B", "C"] {
            queue.enqueue(envelope(p, false));
        }
        assert_eq!(queue.purge(), 2);
        let info = queue.info();
        assert_eq!(info.message_count, 0);
        assert_eq!(info.unacked_count, 1);
    }
}
