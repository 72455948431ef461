//! The broker registry.
//!
//! The broker owns every exchange and queue by name (two independent
//! namespaces) and exposes the publish/consume/ack surface. Registries are
//! sharded maps and every queue carries its own lock, so operations on
//! unrelated queues proceed independently.

use crate::binding::Binding;
use crate::config::BrokerConfig;
use crate::connection::ConnectionId;
use crate::consumer::{generate_consumer_tag, ConsumeOptions, ConsumerTag, Subscription};
use crate::dispatcher::ConsumerSlot;
use crate::error::{BrokerError, Entity};
use crate::exchange::{Exchange, ExchangeKind, DEFAULT_EXCHANGE};
use crate::message::{generate_message_id, observe_message_id, Delivery, DeliveryTag, Envelope, Message};
use crate::metrics;
use crate::queue::{Queue, QueueInfo, QueueOptions};
use crate::store::{MemoryStore, MessageStore};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Prefix reserved for broker-generated and built-in names.
const RESERVED_PREFIX: &str = "amq.";

/// Prefix of server-generated queue names.
const GENERATED_QUEUE_PREFIX: &str = "amq.gen-";

/// Validate an exchange or queue name.
fn validate_name(name: &str, max_len: usize) -> Result<(), BrokerError> {
    if name.is_empty() {
        return Err(BrokerError::InvalidName("Name cannot be empty"));
    }
    if name.len() > max_len {
        return Err(BrokerError::InvalidName("Name too long"));
    }
    if name.chars().any(char::is_control) {
        return Err(BrokerError::InvalidName("Name contains control characters"));
    }
    Ok(())
}

/// Where a consumer lives.
#[derive(Debug, Clone)]
struct ConsumerEntry {
    queue: String,
    connection: ConnectionId,
}

/// The central broker.
#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    store: Arc<dyn MessageStore>,
    exchanges: DashMap<String, Arc<Exchange>>,
    queues: DashMap<String, Arc<Queue>>,
    consumers: DashMap<ConsumerTag, ConsumerEntry>,
    connections: DashSet<ConnectionId>,
    /// Delivery tag counter shared by every queue, so a tag from a deleted
    /// queue never matches a delivery of its successor.
    delivery_tags: Arc<AtomicU64>,
}

impl Broker {
    /// Create a broker over a fresh in-memory store.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self::empty(config, Arc::new(MemoryStore::new()))
    }

    fn empty(config: BrokerConfig, store: Arc<dyn MessageStore>) -> Self {
        Self {
            config,
            store,
            exchanges: DashMap::new(),
            queues: DashMap::new(),
            consumers: DashMap::new(),
            connections: DashSet::new(),
            delivery_tags: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Open a broker over `store`, recovering durable exchanges, durable
    /// queues with their persisted messages, and the bindings between them.
    ///
    /// # Errors
    ///
    /// Returns `DurabilityFailure` if the store cannot be read.
    pub fn open(config: BrokerConfig, store: Arc<dyn MessageStore>) -> Result<Self, BrokerError> {
        let broker = Self::empty(config, store);
        let topology = broker.store.load_topology()?;

        for def in topology.exchanges {
            let exchange = Exchange::new(def.name.as_str(), def.kind, def.durable);
            broker.exchanges.insert(def.name, Arc::new(exchange));
        }

        let mut recovered = 0;
        for def in topology.queues {
            let queue = Queue::new(
                def.name.as_str(),
                QueueOptions::durable(),
                None,
                Some(broker.store.clone()),
            )
            .with_delivery_tags(broker.delivery_tags.clone());
            let mut envelopes = broker.store.load_on_startup(&def.name)?;
            for envelope in &mut envelopes {
                observe_message_id(envelope.message.id());
                // It may have been delivered before the restart.
                envelope.redelivered = true;
            }
            recovered += envelopes.len();
            queue.restore(envelopes);
            broker.queues.insert(def.name, Arc::new(queue));
        }

        for binding in topology.bindings {
            let exchange = broker.exchanges.get(&binding.exchange).map(|e| e.clone());
            match exchange {
                Some(exchange) if broker.queues.contains_key(&binding.queue) => {
                    exchange.bind(&binding.queue, &binding.routing_key);
                }
                _ => warn!(
                    exchange = %binding.exchange,
                    queue = %binding.queue,
                    "Skipping stored binding with missing endpoint"
                ),
            }
        }

        info!(
            exchanges = broker.exchanges.len(),
            queues = broker.queues.len(),
            messages = recovered,
            "Recovered durable state"
        );
        Ok(broker)
    }

    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Flush the durability backend.
    ///
    /// # Errors
    ///
    /// Returns `DurabilityFailure` if the backend cannot flush.
    pub fn flush(&self) -> Result<(), BrokerError> {
        self.store.flush()?;
        Ok(())
    }

    fn exchange(&self, name: &str) -> Result<Arc<Exchange>, BrokerError> {
        self.exchanges
            .get(name)
            .map(|e| e.clone())
            .ok_or_else(|| BrokerError::exchange_not_found(name))
    }

    fn queue(&self, name: &str) -> Result<Arc<Queue>, BrokerError> {
        self.queues
            .get(name)
            .map(|q| q.clone())
            .ok_or_else(|| BrokerError::queue_not_found(name))
    }

    /// Fail with `NotFound` unless `connection` is open.
    fn check_connection(&self, connection: &ConnectionId) -> Result<(), BrokerError> {
        if self.connections.contains(connection) {
            Ok(())
        } else {
            Err(BrokerError::NotFound(Entity::Connection(connection.to_string())))
        }
    }

    /// Look up a queue an open connection is allowed to use.
    fn accessible_queue(
        &self,
        connection: &ConnectionId,
        name: &str,
    ) -> Result<Arc<Queue>, BrokerError> {
        self.check_connection(connection)?;
        let queue = self.queue(name)?;
        queue.check_access(connection)?;
        Ok(queue)
    }

    // ---------------------------------------------------------------------
    // Connections
    // ---------------------------------------------------------------------

    /// Register a new connection.
    pub fn open_connection(&self) -> ConnectionId {
        let id = ConnectionId::generate();
        self.connections.insert(id.clone());
        debug!(connection = %id, "Connection opened");
        id
    }

    /// Tear down a connection.
    ///
    /// Every delivery the connection still holds is requeued ahead of newer
    /// messages, its consumers are removed, and the exclusive queues it owns
    /// are deleted. A message the client processed but never acknowledged is
    /// therefore delivered again: delivery is at-least-once.
    pub fn close_connection(&self, connection: &ConnectionId) {
        self.connections.remove(connection);
        self.consumers.retain(|_, entry| &entry.connection != connection);

        let queues: Vec<Arc<Queue>> = self.queues.iter().map(|q| q.value().clone()).collect();
        for queue in &queues {
            queue.connection_lost(connection);
        }
        for queue in queues.iter().filter(|q| q.is_owned_by(connection)) {
            self.delete_if_exclusive_owner_gone(queue.name(), connection);
        }
        debug!(connection = %connection, "Connection closed");
    }

    /// Delete `queue` if it is exclusive to `connection`, discarding its
    /// contents. Returns whether the queue was deleted.
    pub fn delete_if_exclusive_owner_gone(&self, queue: &str, connection: &ConnectionId) -> bool {
        let Some((_, queue)) = self.queues.remove_if(queue, |_, q| q.is_owned_by(connection)) else {
            return false;
        };
        let (discarded, _) = self.teardown_queue(&queue);
        debug!(queue = %queue.name(), discarded = discarded, "Deleted exclusive queue");
        true
    }

    // ---------------------------------------------------------------------
    // Exchanges
    // ---------------------------------------------------------------------

    /// Declare an exchange. Redeclaring with the same kind and durability is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DeclarationConflict` on a kind or durability mismatch,
    /// `InvalidName` for the default exchange or reserved names.
    pub fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool) -> Result<(), BrokerError> {
        if name == DEFAULT_EXCHANGE {
            return Err(BrokerError::InvalidName("The default exchange cannot be declared"));
        }
        validate_name(name, self.config.max_name_length)?;

        if let Some(existing) = self.exchanges.get(name) {
            return existing.check_redeclare(kind, durable);
        }
        if name.starts_with(RESERVED_PREFIX) {
            return Err(BrokerError::InvalidName("Exchange names starting with 'amq.' are reserved"));
        }
        if self.exchanges.len() >= self.config.max_exchanges {
            return Err(BrokerError::LimitReached("Maximum number of exchanges reached"));
        }

        match self.exchanges.entry(name.to_string()) {
            Entry::Occupied(existing) => existing.get().check_redeclare(kind, durable),
            Entry::Vacant(slot) => {
                let exchange = Exchange::new(name, kind, durable);
                if durable {
                    self.store.save_exchange(&exchange.def())?;
                }
                slot.insert(Arc::new(exchange));
                info!(exchange = %name, kind = %kind, durable = durable, "Exchange declared");
                Ok(())
            }
        }
    }

    /// Delete an exchange and all of its bindings.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the exchange does not exist.
    pub fn delete_exchange(&self, name: &str) -> Result<(), BrokerError> {
        if name == DEFAULT_EXCHANGE {
            return Err(BrokerError::InvalidName("The default exchange cannot be deleted"));
        }
        let (_, exchange) = self
            .exchanges
            .remove(name)
            .ok_or_else(|| BrokerError::exchange_not_found(name))?;
        if exchange.is_durable() {
            self.store.delete_exchange(name)?;
        }
        info!(exchange = %name, bindings = exchange.binding_count(), "Exchange deleted");
        Ok(())
    }

    #[must_use]
    pub fn exchange_exists(&self, name: &str) -> bool {
        name == DEFAULT_EXCHANGE || self.exchanges.contains_key(name)
    }

    // ---------------------------------------------------------------------
    // Queues
    // ---------------------------------------------------------------------

    /// Declare a queue on behalf of `connection`.
    ///
    /// An empty name asks the broker to generate one. Redeclaring with the
    /// same options is a no-op that reports the current counts.
    ///
    /// # Errors
    ///
    /// Returns `DeclarationConflict` on a durability or exclusivity
    /// mismatch, `ResourceLocked` if another connection owns the queue.
    /// `NotFound` if the connection is not open.
    pub fn declare_queue(
        &self,
        connection: &ConnectionId,
        name: &str,
        options: QueueOptions,
    ) -> Result<QueueInfo, BrokerError> {
        self.check_connection(connection)?;
        let name = if name.is_empty() {
            format!("{GENERATED_QUEUE_PREFIX}{:x}", generate_message_id())
        } else {
            validate_name(name, self.config.max_name_length)?;
            if let Some(existing) = self.queues.get(name).map(|q| q.clone()) {
                return Self::redeclare_queue(&existing, connection, options);
            }
            if name.starts_with(RESERVED_PREFIX) {
                return Err(BrokerError::InvalidName("Queue names starting with 'amq.' are reserved"));
            }
            name.to_string()
        };
        if self.queues.len() >= self.config.max_queues {
            return Err(BrokerError::LimitReached("Maximum number of queues reached"));
        }

        let queue = match self.queues.entry(name.clone()) {
            Entry::Occupied(existing) => {
                let existing = existing.get().clone();
                return Self::redeclare_queue(&existing, connection, options);
            }
            Entry::Vacant(slot) => {
                // Exclusive queues die with their connection and are never stored.
                let stored = options.durable && !options.exclusive;
                let queue = Queue::new(
                    name.as_str(),
                    options,
                    Some(connection.clone()),
                    stored.then(|| self.store.clone()),
                )
                .with_delivery_tags(self.delivery_tags.clone());
                if stored {
                    self.store.save_queue(&queue.def())?;
                }
                let queue = Arc::new(queue);
                slot.insert(queue.clone());
                queue
            }
        };

        info!(
            queue = %name,
            durable = options.durable,
            exclusive = options.exclusive,
            "Queue declared"
        );
        Ok(queue.info())
    }

    fn redeclare_queue(
        queue: &Queue,
        connection: &ConnectionId,
        options: QueueOptions,
    ) -> Result<QueueInfo, BrokerError> {
        queue.check_access(connection)?;
        let reason = if queue.is_durable() != options.durable {
            format!(
                "declared with durable={}, requested durable={}",
                queue.is_durable(),
                options.durable
            )
        } else if queue.is_exclusive() != options.exclusive {
            format!(
                "declared with exclusive={}, requested exclusive={}",
                queue.is_exclusive(),
                options.exclusive
            )
        } else {
            return Ok(queue.info());
        };
        Err(BrokerError::DeclarationConflict {
            entity: Entity::Queue(queue.name().to_string()),
            reason,
        })
    }

    /// Report a queue's counts.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the queue does not exist.
    pub fn queue_info(&self, name: &str) -> Result<QueueInfo, BrokerError> {
        Ok(self.queue(name)?.info())
    }

    #[must_use]
    pub fn queue_exists(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    /// Drop every ready message in a queue, returning how many were dropped.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `ResourceLocked`.
    pub fn purge_queue(&self, connection: &ConnectionId, name: &str) -> Result<usize, BrokerError> {
        Ok(self.accessible_queue(connection, name)?.purge())
    }

    /// Delete a queue with its bindings, consumers and contents. Returns the
    /// number of ready messages discarded.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `ResourceLocked`.
    pub fn delete_queue(&self, connection: &ConnectionId, name: &str) -> Result<usize, BrokerError> {
        self.accessible_queue(connection, name)?;
        let (_, queue) = self
            .queues
            .remove(name)
            .ok_or_else(|| BrokerError::queue_not_found(name))?;
        let (discarded, persist_error) = self.teardown_queue(&queue);
        info!(queue = %name, discarded = discarded, "Queue deleted");
        match persist_error {
            Some(e) => Err(e),
            None => Ok(discarded),
        }
    }

    /// Common cleanup once a queue has left the registry.
    fn teardown_queue(&self, queue: &Queue) -> (usize, Option<BrokerError>) {
        let (discarded, tags) = queue.close();
        for tag in &tags {
            self.consumers.remove(tag);
        }

        let exchanges: Vec<Arc<Exchange>> = self.exchanges.iter().map(|e| e.value().clone()).collect();
        for exchange in exchanges {
            exchange.unbind_queue(queue.name());
        }

        let mut error = None;
        if queue.persists_messages() {
            if let Err(e) = self.store.delete_queue(queue.name()) {
                warn!(queue = %queue.name(), error = %e, "Failed to delete stored queue");
                error = Some(e.into());
            }
        }
        (discarded, error)
    }

    // ---------------------------------------------------------------------
    // Bindings
    // ---------------------------------------------------------------------

    /// Bind a queue to an exchange. Binding twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the exchange or queue is missing.
    pub fn bind(
        &self,
        connection: &ConnectionId,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        if exchange == DEFAULT_EXCHANGE {
            return Err(BrokerError::InvalidName("The default exchange cannot be bound"));
        }
        let ex = self.exchange(exchange)?;
        let q = self.accessible_queue(connection, queue)?;
        if ex.has_binding(queue, routing_key) {
            return Ok(());
        }

        if ex.is_durable() && q.persists_messages() {
            self.store
                .save_binding(&Binding::new(exchange, queue, routing_key))?;
        }
        ex.bind(queue, routing_key);
        debug!(exchange = %exchange, queue = %queue, routing_key = %routing_key, "Bound");
        Ok(())
    }

    /// Remove a binding.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the exchange, queue or binding is missing.
    pub fn unbind(
        &self,
        connection: &ConnectionId,
        exchange: &str,
        queue: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        if exchange == DEFAULT_EXCHANGE {
            return Err(BrokerError::InvalidName("The default exchange cannot be unbound"));
        }
        let ex = self.exchange(exchange)?;
        let q = self.accessible_queue(connection, queue)?;
        if !ex.unbind(queue, routing_key) {
            return Err(BrokerError::NotFound(Entity::Binding {
                exchange: exchange.to_string(),
                queue: queue.to_string(),
                routing_key: routing_key.to_string(),
            }));
        }

        if ex.is_durable() && q.persists_messages() {
            self.store
                .delete_binding(&Binding::new(exchange, queue, routing_key))?;
        }
        debug!(exchange = %exchange, queue = %queue, routing_key = %routing_key, "Unbound");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Publishing
    // ---------------------------------------------------------------------

    /// Publish a message through an exchange.
    ///
    /// Each matching queue gets its own copy. A message that matches no
    /// queue is dropped and `Ok(0)` is returned. Persistent messages are
    /// written to every durable target before any copy becomes ready; if a
    /// write fails nothing is enqueued.
    ///
    /// Returns the number of queues the message was enqueued to.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown exchange and `DurabilityFailure` if
    /// a required write failed.
    pub fn publish(&self, exchange: &str, routing_key: &str, message: Message) -> Result<usize, BrokerError> {
        let targets: Vec<Arc<Queue>> = if exchange == DEFAULT_EXCHANGE {
            self.queues.get(routing_key).map(|q| q.clone()).into_iter().collect()
        } else {
            self.exchange(exchange)?
                .route(routing_key)
                .iter()
                .filter_map(|name| self.queues.get(name).map(|q| q.clone()))
                .collect()
        };
        metrics::record_publish();

        if targets.is_empty() {
            trace!(exchange = %exchange, routing_key = %routing_key, "Unroutable message dropped");
            metrics::record_unroutable();
            return Ok(0);
        }

        let envelope = Envelope::new(message, exchange, routing_key);
        let id = envelope.message.id();

        // Phase 1: commit to every durable target.
        let mut written: Vec<&Arc<Queue>> = Vec::new();
        for queue in &targets {
            match queue.persist(&envelope) {
                Ok(true) => written.push(queue),
                Ok(false) => {}
                Err(e) => {
                    for queue in written {
                        queue.discard_persisted(id);
                    }
                    warn!(queue = %queue.name(), message = id, error = %e, "Persist failed, publish rejected");
                    metrics::record_durability_failure();
                    return Err(e.into());
                }
            }
        }

        // Phase 2: make the copies ready.
        let mut routed = 0;
        for queue in &targets {
            if queue.enqueue(envelope.clone()) {
                routed += 1;
            } else if written.iter().any(|w| Arc::ptr_eq(*w, queue)) {
                queue.discard_persisted(id);
            }
        }

        metrics::record_routed(routed);
        trace!(exchange = %exchange, routing_key = %routing_key, queues = routed, "Published");
        Ok(routed)
    }

    // ---------------------------------------------------------------------
    // Consuming
    // ---------------------------------------------------------------------

    /// Register a consumer on a queue.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown queue or a connection that is not
    /// open, `ResourceLocked` or `ConsumerTagInUse`.
    pub fn consume(
        &self,
        connection: &ConnectionId,
        queue: &str,
        options: ConsumeOptions,
    ) -> Result<Subscription, BrokerError> {
        let q = self.accessible_queue(connection, queue)?;
        let tag = options.consumer_tag.unwrap_or_else(generate_consumer_tag);

        let entry = ConsumerEntry {
            queue: queue.to_string(),
            connection: connection.clone(),
        };
        match self.consumers.entry(tag.clone()) {
            // A dropped subscription leaves its tag behind until reused.
            Entry::Occupied(mut stale) if !self.consumer_registered(&tag, &stale.get().queue) => {
                stale.insert(entry);
            }
            Entry::Occupied(_) => return Err(BrokerError::ConsumerTagInUse(tag)),
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }

        let prefetch = options.prefetch.unwrap_or(self.config.default_prefetch);
        let (sender, receiver) = mpsc::unbounded_channel();
        let slot = ConsumerSlot::new(tag.clone(), connection.clone(), prefetch, options.no_ack, sender);
        if !q.add_consumer(slot) {
            self.consumers.remove(&tag);
            return Err(BrokerError::queue_not_found(queue));
        }

        debug!(queue = %queue, consumer = %tag, connection = %connection, "Consuming");
        Ok(Subscription::new(tag, queue, receiver))
    }

    fn consumer_registered(&self, tag: &str, queue: &str) -> bool {
        self.queues
            .get(queue)
            .is_some_and(|q| q.outstanding(tag).is_some())
    }

    fn consumer_queue(&self, tag: &str) -> Result<ConsumerEntry, BrokerError> {
        self.consumers
            .get(tag)
            .map(|c| c.clone())
            .ok_or_else(|| BrokerError::NotFound(Entity::Consumer(tag.to_string())))
    }

    /// Cancel a consumer. New deliveries stop immediately; deliveries it
    /// still holds stay unacknowledged until acked, nacked, or its
    /// connection closes.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown consumer.
    pub fn cancel(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        let entry = self.consumer_queue(consumer_tag)?;
        self.consumers.remove(consumer_tag);
        if let Ok(queue) = self.queue(&entry.queue) {
            queue.cancel_consumer(consumer_tag);
        }
        Ok(())
    }

    /// The transport lost a consumer: requeue what it held and redispatch.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown consumer.
    pub fn consumer_disconnected(&self, consumer_tag: &str) -> Result<(), BrokerError> {
        let entry = self.consumer_queue(consumer_tag)?;
        self.consumers.remove(consumer_tag);
        if let Ok(queue) = self.queue(&entry.queue) {
            queue.consumer_lost(consumer_tag);
        }
        Ok(())
    }

    /// Pull one message. Without `no_ack` it must be acked or nacked like a
    /// pushed delivery.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `ResourceLocked`.
    pub fn get(
        &self,
        connection: &ConnectionId,
        queue: &str,
        no_ack: bool,
    ) -> Result<Option<Delivery>, BrokerError> {
        Ok(self.accessible_queue(connection, queue)?.get(connection, no_ack))
    }

    /// Acknowledge a delivery held by `connection`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDeliveryTag` if the connection holds no such
    /// outstanding tag, including a second ack of the same tag.
    pub fn ack(
        &self,
        connection: &ConnectionId,
        queue: &str,
        tag: DeliveryTag,
    ) -> Result<(), BrokerError> {
        self.queue(queue)?.ack(connection, tag)
    }

    /// Negatively acknowledge a delivery held by `connection`. With
    /// `requeue` the message goes back to the head of the queue; otherwise
    /// it is dropped.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDeliveryTag` if the connection holds no such
    /// outstanding tag.
    pub fn nack(
        &self,
        connection: &ConnectionId,
        queue: &str,
        tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        self.queue(queue)?.nack(connection, tag, requeue)
    }

    /// Reject a single delivery. Same as [`nack`](Self::nack).
    ///
    /// # Errors
    ///
    /// Returns `UnknownDeliveryTag` if the connection holds no such
    /// outstanding tag.
    pub fn reject(
        &self,
        connection: &ConnectionId,
        queue: &str,
        tag: DeliveryTag,
        requeue: bool,
    ) -> Result<(), BrokerError> {
        self.nack(connection, queue, tag, requeue)
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    /// Get broker statistics.
    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        let queues: Vec<QueueInfo> = self.queues.iter().map(|q| q.info()).collect();
        BrokerStats {
            exchange_count: self.exchanges.len(),
            queue_count: queues.len(),
            consumer_count: queues.iter().map(|q| q.consumer_count).sum(),
            connection_count: self.connections.len(),
            ready_messages: queues.iter().map(|q| q.message_count).sum(),
            unacked_messages: queues.iter().map(|q| q.unacked_count).sum(),
        }
    }

    /// Snapshot every queue.
    #[must_use]
    pub fn queues(&self) -> Vec<QueueInfo> {
        let mut infos: Vec<QueueInfo> = self.queues.iter().map(|q| q.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Bindings of an exchange.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the exchange does not exist.
    pub fn bindings(&self, exchange: &str) -> Result<Vec<Binding>, BrokerError> {
        Ok(self.exchange(exchange)?.bindings())
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

/// Broker statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    pub exchange_count: usize,
    pub queue_count: usize,
    pub consumer_count: usize,
    pub connection_count: usize,
    pub ready_messages: usize,
    pub unacked_messages: usize,
}
