//! In-memory durability backend.
//!
//! Nothing survives the process, but clones share state, so opening a new
//! broker over a clone behaves like a restart. Used by default and in tests.

use super::{MessageStore, StoreError, Topology};
use crate::binding::Binding;
use crate::exchange::ExchangeDef;
use crate::message::{Envelope, MessageId};
use crate::queue::QueueDef;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    messages: HashMap<String, BTreeMap<MessageId, Envelope>>,
    exchanges: BTreeMap<String, ExchangeDef>,
    queues: BTreeMap<String, QueueDef>,
    bindings: BTreeSet<Binding>,
}

/// Shared in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of persisted messages held for `queue`.
    #[must_use]
    pub fn persisted_count(&self, queue: &str) -> usize {
        self.lock().messages.get(queue).map_or(0, BTreeMap::len)
    }
}

impl MessageStore for MemoryStore {
    fn persist(&self, queue: &str, envelope: &Envelope) -> Result<(), StoreError> {
        let mut stored = envelope.clone();
        stored.redelivered = false;
        self.lock()
            .messages
            .entry(queue.to_string())
            .or_default()
            .insert(envelope.message.id(), stored);
        Ok(())
    }

    fn remove_persisted(&self, queue: &str, id: MessageId) -> Result<(), StoreError> {
        if let Some(messages) = self.lock().messages.get_mut(queue) {
            messages.remove(&id);
        }
        Ok(())
    }

    fn load_on_startup(&self, queue: &str) -> Result<Vec<Envelope>, StoreError> {
        Ok(self
            .lock()
            .messages
            .get(queue)
            .map(|messages| messages.values().cloned().collect())
            .unwrap_or_default())
    }

    fn save_exchange(&self, def: &ExchangeDef) -> Result<(), StoreError> {
        self.lock().exchanges.insert(def.name.clone(), def.clone());
        Ok(())
    }

    fn delete_exchange(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.exchanges.remove(name);
        inner.bindings.retain(|b| b.exchange != name);
        Ok(())
    }

    fn save_queue(&self, def: &QueueDef) -> Result<(), StoreError> {
        self.lock().queues.insert(def.name.clone(), def.clone());
        Ok(())
    }

    fn delete_queue(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.queues.remove(name);
        inner.messages.remove(name);
        inner.bindings.retain(|b| b.queue != name);
        Ok(())
    }

    fn save_binding(&self, binding: &Binding) -> Result<(), StoreError> {
        self.lock().bindings.insert(binding.clone());
        Ok(())
    }

    fn delete_binding(&self, binding: &Binding) -> Result<(), StoreError> {
        self.lock().bindings.remove(binding);
        Ok(())
    }

    fn load_topology(&self) -> Result<Topology, StoreError> {
        let inner = self.lock();
        Ok(Topology {
            exchanges: inner.exchanges.values().cloned().collect(),
            queues: inner.queues.values().cloned().collect(),
            bindings: inner.bindings.iter().cloned().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeKind;
    use crate::message::Message;

    #[test]
    fn test_persist_and_load_in_publish_order() {
        let store = MemoryStore::new();
        let envelopes: Vec<_> = ["A", "B", "C"]
            .into_iter()
            .map(|p| Envelope::new(Message::persistent(p), "", "task_queue"))
            .collect();
        for envelope in &envelopes {
            store.persist("task_queue", envelope).unwrap();
        }

        store
            .remove_persisted("task_queue", envelopes[1].message.id())
            .unwrap();
        let loaded = store.load_on_startup("task_queue").unwrap();
        let payloads: Vec<_> = loaded.iter().map(|e| e.message.payload().clone()).collect();
        assert_eq!(payloads, vec!["A", "C"]);
        assert!(store.load_on_startup("other").unwrap().is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let store = MemoryStore::new();
        let clone = store.clone();
        store
            .save_exchange(&ExchangeDef {
                name: "logs".into(),
                kind: ExchangeKind::Fanout,
                durable: true,
            })
            .unwrap();
        assert_eq!(clone.load_topology().unwrap().exchanges.len(), 1);
    }

    #[test]
    fn test_delete_queue_drops_contents_and_bindings() {
        let store = MemoryStore::new();
        store
            .save_queue(&QueueDef {
                name: "q".into(),
                durable: true,
            })
            .unwrap();
        store.save_binding(&Binding::new("ex", "q", "k")).unwrap();
        store
            .persist("q", &Envelope::new(Message::persistent("x"), "ex", "k"))
            .unwrap();

        store.delete_queue("q").unwrap();
        assert_eq!(store.persisted_count("q"), 0);
        assert_eq!(store.load_topology().unwrap(), Topology::default());
    }
}
