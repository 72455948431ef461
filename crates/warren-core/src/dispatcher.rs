//! Per-queue fair dispatch.
//!
//! The dispatcher owns a queue's consumers and its unacknowledged ledger.
//! Ready messages are handed out round-robin to consumers that are below
//! their prefetch limit; nothing is pinned to a consumer ahead of time.
//!
//! All methods run under the owning queue's lock.

use crate::connection::ConnectionId;
use crate::consumer::ConsumerTag;
use crate::message::{Delivery, DeliveryTag, Envelope};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A registered consumer.
#[derive(Debug)]
pub(crate) struct ConsumerSlot {
    tag: ConsumerTag,
    serial: u64,
    connection: ConnectionId,
    /// `0` = unlimited.
    prefetch: u16,
    no_ack: bool,
    outstanding: usize,
    sender: mpsc::UnboundedSender<Delivery>,
}

impl ConsumerSlot {
    pub(crate) fn new(
        tag: ConsumerTag,
        connection: ConnectionId,
        prefetch: u16,
        no_ack: bool,
        sender: mpsc::UnboundedSender<Delivery>,
    ) -> Self {
        Self {
            tag,
            serial: 0,
            connection,
            prefetch,
            no_ack,
            outstanding: 0,
            sender,
        }
    }

    fn has_capacity(&self) -> bool {
        self.no_ack || self.prefetch == 0 || self.outstanding < usize::from(self.prefetch)
    }
}

/// Who holds an unacknowledged delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Owner {
    connection: ConnectionId,
    /// `(tag, serial)` of the consumer; `None` for pulled messages.
    consumer: Option<(ConsumerTag, u64)>,
}

#[derive(Debug)]
struct Unacked {
    envelope: Envelope,
    owner: Owner,
    delivered_at: Instant,
}

/// A delivery taken off the ledger by ack.
#[derive(Debug)]
pub(crate) struct Settled {
    pub envelope: Envelope,
    pub delivered_at: Instant,
}

/// Outcome of a dispatch pass.
#[derive(Debug, Default)]
pub(crate) struct DispatchPass {
    /// Messages pushed to consumers.
    pub delivered: usize,
    /// How many of those were redeliveries.
    pub redelivered: usize,
    /// Envelopes settled at delivery by no-ack consumers.
    pub settled: Vec<Envelope>,
    /// Consumers found gone during the pass.
    pub lost: Vec<ConsumerTag>,
}

#[derive(Debug)]
pub(crate) struct Dispatcher {
    consumers: Vec<ConsumerSlot>,
    /// Round-robin position into `consumers`.
    cursor: usize,
    unacked: BTreeMap<DeliveryTag, Unacked>,
    /// Next delivery tag, shared by every queue of a broker so a tag is
    /// never reused while the broker runs.
    tags: Arc<AtomicU64>,
    next_serial: u64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self {
            consumers: Vec::new(),
            cursor: 0,
            unacked: BTreeMap::new(),
            tags: Arc::new(AtomicU64::new(1)),
            next_serial: 1,
        }
    }
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Draw delivery tags from a shared counter.
    pub(crate) fn with_tags(tags: Arc<AtomicU64>) -> Self {
        Self {
            tags,
            ..Self::default()
        }
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub(crate) fn unacked_count(&self) -> usize {
        self.unacked.len()
    }

    pub(crate) fn has_consumer(&self, tag: &str) -> bool {
        self.consumers.iter().any(|c| c.tag == tag)
    }

    /// Outstanding deliveries of a registered consumer.
    pub(crate) fn outstanding(&self, tag: &str) -> Option<usize> {
        self.consumers
            .iter()
            .find(|c| c.tag == tag)
            .map(|c| c.outstanding)
    }

    fn take_tag(&mut self) -> DeliveryTag {
        self.tags.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn add_consumer(&mut self, mut slot: ConsumerSlot) {
        slot.serial = self.next_serial;
        self.next_serial += 1;
        debug!(consumer = %slot.tag, prefetch = slot.prefetch, no_ack = slot.no_ack, "Consumer registered");
        self.consumers.push(slot);
    }

    /// Unregister a consumer without touching its outstanding deliveries.
    pub(crate) fn remove_consumer(&mut self, tag: &str) -> bool {
        let Some(pos) = self.consumers.iter().position(|c| c.tag == tag) else {
            return false;
        };
        self.consumers.remove(pos);
        if pos < self.cursor {
            self.cursor -= 1;
        }
        true
    }

    /// Drop every consumer, closing their subscriptions.
    pub(crate) fn clear_consumers(&mut self) -> Vec<ConsumerTag> {
        self.cursor = 0;
        self.consumers.drain(..).map(|c| c.tag).collect()
    }

    /// Next consumer below its limit, starting at the round-robin cursor.
    fn next_eligible(&self) -> Option<usize> {
        let n = self.consumers.len();
        (0..n)
            .map(|offset| (self.cursor + offset) % n)
            .find(|&i| self.consumers[i].has_capacity())
    }

    /// Hand out ready messages until `ready` is empty or every consumer is full.
    pub(crate) fn dispatch(&mut self, queue: &str, ready: &mut VecDeque<Envelope>) -> DispatchPass {
        let mut pass = DispatchPass::default();

        let closed: Vec<ConsumerTag> = self
            .consumers
            .iter()
            .filter(|c| c.sender.is_closed())
            .map(|c| c.tag.clone())
            .collect();
        for tag in closed {
            self.consumer_lost(&tag, ready);
            pass.lost.push(tag);
        }

        while !ready.is_empty() {
            let Some(idx) = self.next_eligible() else {
                break;
            };
            let Some(envelope) = ready.pop_front() else {
                break;
            };
            let tag = self.take_tag();

            let slot = &self.consumers[idx];
            let delivery = Delivery::new(tag, Some(slot.tag.clone()), queue, &envelope);
            if slot.sender.send(delivery).is_err() {
                // Receiver dropped: the consumer is gone.
                ready.push_front(envelope);
                let lost = slot.tag.clone();
                self.consumer_lost(&lost, ready);
                pass.lost.push(lost);
                continue;
            }

            self.cursor = idx + 1;
            pass.delivered += 1;
            if envelope.redelivered {
                pass.redelivered += 1;
            }

            let slot = &mut self.consumers[idx];
            trace!(queue = %queue, consumer = %slot.tag, tag = tag, "Delivered");
            if slot.no_ack {
                pass.settled.push(envelope);
                continue;
            }
            slot.outstanding += 1;
            let owner = Owner {
                connection: slot.connection.clone(),
                consumer: Some((slot.tag.clone(), slot.serial)),
            };
            self.unacked.insert(
                tag,
                Unacked {
                    envelope,
                    owner,
                    delivered_at: Instant::now(),
                },
            );
        }

        pass
    }

    /// Pop the head of `ready` for a pull. Without `no_ack` it enters the
    /// ledger owned by `connection`.
    pub(crate) fn get(
        &mut self,
        queue: &str,
        connection: &ConnectionId,
        no_ack: bool,
        ready: &mut VecDeque<Envelope>,
    ) -> Option<(Delivery, Option<Envelope>)> {
        let envelope = ready.pop_front()?;
        let tag = self.take_tag();
        let delivery = Delivery::new(tag, None, queue, &envelope);
        if no_ack {
            return Some((delivery, Some(envelope)));
        }
        self.unacked.insert(
            tag,
            Unacked {
                envelope,
                owner: Owner {
                    connection: connection.clone(),
                    consumer: None,
                },
                delivered_at: Instant::now(),
            },
        );
        Some((delivery, None))
    }

    fn release(&mut self, owner: &Owner) {
        let Some((tag, serial)) = &owner.consumer else {
            return;
        };
        if let Some(slot) = self
            .consumers
            .iter_mut()
            .find(|c| &c.tag == tag && c.serial == *serial)
        {
            slot.outstanding = slot.outstanding.saturating_sub(1);
        }
    }

    /// Take a ledger entry, provided `connection` holds it.
    fn take_unacked(&mut self, connection: &ConnectionId, tag: DeliveryTag) -> Option<Unacked> {
        if !self
            .unacked
            .get(&tag)
            .is_some_and(|entry| &entry.owner.connection == connection)
        {
            return None;
        }
        self.unacked.remove(&tag)
    }

    /// Remove an acknowledged delivery from the ledger.
    pub(crate) fn ack(&mut self, connection: &ConnectionId, tag: DeliveryTag) -> Option<Settled> {
        let entry = self.take_unacked(connection, tag)?;
        self.release(&entry.owner);
        Some(Settled {
            envelope: entry.envelope,
            delivered_at: entry.delivered_at,
        })
    }

    /// Negatively acknowledge. With `requeue` the message goes back to the
    /// head of `ready` and `Ok(None)` is returned; otherwise the dropped
    /// envelope is returned. `Err(())` if `connection` holds no such tag.
    pub(crate) fn nack(
        &mut self,
        connection: &ConnectionId,
        tag: DeliveryTag,
        requeue: bool,
        ready: &mut VecDeque<Envelope>,
    ) -> Result<Option<Envelope>, ()> {
        let entry = self.take_unacked(connection, tag).ok_or(())?;
        self.release(&entry.owner);
        let mut envelope = entry.envelope;
        if requeue {
            envelope.redelivered = true;
            ready.push_front(envelope);
            Ok(None)
        } else {
            Ok(Some(envelope))
        }
    }

    /// Requeue matching ledger entries to the head of `ready`, keeping their
    /// original relative order ahead of everything already there.
    fn requeue_where(&mut self, ready: &mut VecDeque<Envelope>, pred: impl Fn(&Owner) -> bool) -> usize {
        let tags: Vec<DeliveryTag> = self
            .unacked
            .iter()
            .filter(|(_, entry)| pred(&entry.owner))
            .map(|(tag, _)| *tag)
            .collect();

        for tag in tags.iter().rev() {
            if let Some(entry) = self.unacked.remove(tag) {
                self.release(&entry.owner);
                let mut envelope = entry.envelope;
                envelope.redelivered = true;
                ready.push_front(envelope);
            }
        }
        tags.len()
    }

    /// A consumer went away: requeue what it held and unregister it.
    pub(crate) fn consumer_lost(&mut self, tag: &str, ready: &mut VecDeque<Envelope>) -> usize {
        let Some(serial) = self.consumers.iter().find(|c| c.tag == tag).map(|c| c.serial) else {
            return 0;
        };
        let requeued = self.requeue_where(ready, |owner| {
            owner.consumer.as_ref().is_some_and(|(t, s)| t == tag && *s == serial)
        });
        self.remove_consumer(tag);
        debug!(consumer = %tag, requeued = requeued, "Consumer lost");
        requeued
    }

    /// A connection closed: requeue everything it held and unregister its
    /// consumers. Returns the number of requeued messages and the removed
    /// consumer tags.
    pub(crate) fn connection_lost(
        &mut self,
        connection: &ConnectionId,
        ready: &mut VecDeque<Envelope>,
    ) -> (usize, Vec<ConsumerTag>) {
        let requeued = self.requeue_where(ready, |owner| &owner.connection == connection);
        let tags: Vec<ConsumerTag> = self
            .consumers
            .iter()
            .filter(|c| &c.connection == connection)
            .map(|c| c.tag.clone())
            .collect();
        for tag in &tags {
            self.remove_consumer(tag);
        }
        (requeued, tags)
    }

    /// Drop the whole ledger, returning the envelopes it held.
    pub(crate) fn drain_unacked(&mut self) -> Vec<Envelope> {
        for slot in &mut self.consumers {
            slot.outstanding = 0;
        }
        std::mem::take(&mut self.unacked)
            .into_values()
            .map(|entry| entry.envelope)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn ready_of(payloads: &[&str]) -> VecDeque<Envelope> {
        payloads
            .iter()
            .map(|p| Envelope::new(Message::new(p.to_string()), "", "q"))
            .collect()
    }

    fn payloads(ready: &VecDeque<Envelope>) -> Vec<String> {
        ready
            .iter()
            .map(|e| String::from_utf8_lossy(e.message.payload()).into_owned())
            .collect()
    }

    fn consumer(
        dispatcher: &mut Dispatcher,
        tag: &str,
        conn: &str,
        prefetch: u16,
    ) -> mpsc::UnboundedReceiver<Delivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        dispatcher.add_consumer(ConsumerSlot::new(tag.into(), conn.into(), prefetch, false, tx));
        rx
    }

    #[test]
    fn test_prefetch_one_holds_back() {
        let mut d = Dispatcher::new();
        let mut ready = ready_of(&["A", "B", "C"]);
        let mut rx = consumer(&mut d, "c1", "conn", 1);

        let pass = d.dispatch("q", &mut ready);
        assert_eq!(pass.delivered, 1);
        let first = rx.try_recv().unwrap();
        assert_eq!(first.tag, 1);
        assert!(rx.try_recv().is_err());
        assert_eq!(payloads(&ready), vec!["B", "C"]);

        assert!(d.ack(&"other".into(), first.tag).is_none());
        assert!(d.ack(&"conn".into(), first.tag).is_some());
        d.dispatch("q", &mut ready);
        assert_eq!(rx.try_recv().unwrap().tag, 2);
        assert_eq!(d.outstanding("c1"), Some(1));
    }

    #[test]
    fn test_round_robin() {
        let mut d = Dispatcher::new();
        let mut ready = ready_of(&["1", "2", "3", "4"]);
        let mut rx1 = consumer(&mut d, "c1", "conn", 0);
        let mut rx2 = consumer(&mut d, "c2", "conn", 0);

        d.dispatch("q", &mut ready);
        let got1: Vec<_> = std::iter::from_fn(|| rx1.try_recv().ok()).map(|d| d.tag).collect();
        let got2: Vec<_> = std::iter::from_fn(|| rx2.try_recv().ok()).map(|d| d.tag).collect();
        assert_eq!(got1, vec![1, 3]);
        assert_eq!(got2, vec![2, 4]);
    }

    #[test]
    fn test_shared_tags_never_repeat() {
        let tags = Arc::new(AtomicU64::new(1));
        let mut first = Dispatcher::with_tags(tags.clone());
        let mut second = Dispatcher::with_tags(tags);
        let mut ready_a = ready_of(&["A"]);
        let mut ready_b = ready_of(&["B"]);
        let mut rx1 = consumer(&mut first, "c1", "conn", 0);
        let mut rx2 = consumer(&mut second, "c2", "conn", 0);

        first.dispatch("q", &mut ready_a);
        second.dispatch("q", &mut ready_b);
        let a = rx1.try_recv().unwrap();
        let b = rx2.try_recv().unwrap();
        assert_eq!((a.tag, b.tag), (1, 2));
        assert!(second.ack(&"conn".into(), a.tag).is_none());
    }

    #[test]
    fn test_nack_requeues_to_front() {
        let mut d = Dispatcher::new();
        let mut ready = ready_of(&["A", "B"]);
        let mut rx = consumer(&mut d, "c1", "conn", 1);

        d.dispatch("q", &mut ready);
        let delivery = rx.try_recv().unwrap();
        assert_eq!(d.nack(&"conn".into(), delivery.tag, true, &mut ready), Ok(None));
        assert_eq!(payloads(&ready), vec!["A", "B"]);
        assert!(ready[0].redelivered);
        assert_eq!(d.nack(&"conn".into(), delivery.tag, true, &mut ready), Err(()));
    }

    #[test]
    fn test_dropped_receiver_is_lost() {
        let mut d = Dispatcher::new();
        let mut ready = ready_of(&["A", "B", "C"]);
        let rx = consumer(&mut d, "c1", "conn", 2);
        d.dispatch("q", &mut ready);
        assert_eq!(payloads(&ready), vec!["C"]);
        drop(rx);

        let mut keep = consumer(&mut d, "c2", "conn", 0);
        let pass = d.dispatch("q", &mut ready);
        assert_eq!(pass.lost, vec!["c1".to_string()]);
        assert_eq!(pass.delivered, 3);
        assert_eq!(pass.redelivered, 2);
        assert_eq!(d.consumer_count(), 1);

        let got: Vec<_> = std::iter::from_fn(|| keep.try_recv().ok()).collect();
        let bodies: Vec<_> = got.iter().map(|d| d.payload().clone()).collect();
        assert_eq!(bodies, vec!["A", "B", "C"]);
        assert!(got[0].redelivered && got[1].redelivered && !got[2].redelivered);
    }

    #[test]
    fn test_connection_lost_requeues_in_order() {
        let mut d = Dispatcher::new();
        let mut ready = ready_of(&["A", "B", "C", "D"]);
        let _rx = consumer(&mut d, "c1", "conn-1", 3);
        d.dispatch("q", &mut ready);
        assert_eq!(payloads(&ready), vec!["D"]);

        let (requeued, tags) = d.connection_lost(&"conn-1".into(), &mut ready);
        assert_eq!(requeued, 3);
        assert_eq!(tags, vec!["c1".to_string()]);
        assert_eq!(payloads(&ready), vec!["A", "B", "C", "D"]);
        assert_eq!(d.unacked_count(), 0);
    }

    #[test]
    fn test_get_enters_ledger() {
        let mut d = Dispatcher::new();
        let mut ready = ready_of(&["A"]);
        let conn: ConnectionId = "conn".into();
        let (delivery, settled) = d.get("q", &conn, false, &mut ready).unwrap();
        assert!(delivery.consumer_tag.is_none());
        assert!(settled.is_none());
        assert_eq!(d.unacked_count(), 1);
        assert!(d.get("q", &conn, false, &mut ready).is_none());
    }
}
