//! Durability backend backed by `sled`.
//!
//! Each durable queue gets its own tree keyed by the big-endian message id,
//! so iteration yields messages in publish order. Exchanges, queues and
//! bindings live in a single `topology` tree under prefixed keys.

use super::codec::{self, decode, encode};
use super::{MessageStore, StoreError, Topology};
use crate::binding::Binding;
use crate::exchange::ExchangeDef;
use crate::message::{Envelope, MessageId};
use crate::queue::QueueDef;
use sled::{Db, Tree};
use std::path::Path;
use tracing::debug;

const TOPOLOGY_TREE: &str = "topology";
const QUEUE_TREE_PREFIX: &str = "queue:";
const EXCHANGE_KEY_PREFIX: &[u8] = b"exchange:";
const QUEUE_KEY_PREFIX: &[u8] = b"queue:";
const BINDING_KEY_PREFIX: &[u8] = b"binding:";

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

fn prefixed(prefix: &[u8], rest: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + rest.len());
    key.extend_from_slice(prefix);
    key.extend_from_slice(rest);
    key
}

fn queue_tree_name(queue: &str) -> String {
    format!("{QUEUE_TREE_PREFIX}{queue}")
}

/// `sled`-backed store.
#[derive(Clone)]
pub struct SledStore {
    db: Db,
    topology: Tree,
    flush_on_persist: bool,
}

impl SledStore {
    /// Open or create a store at `path`.
    ///
    /// With `flush_on_persist`, every persisted message is flushed to disk
    /// before `persist` returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>, flush_on_persist: bool) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        let topology = db.open_tree(TOPOLOGY_TREE)?;
        debug!(path = %path.display(), "Opened sled store");
        Ok(Self {
            db,
            topology,
            flush_on_persist,
        })
    }

    fn queue_tree(&self, queue: &str) -> Result<Tree, StoreError> {
        Ok(self.db.open_tree(queue_tree_name(queue))?)
    }

    fn scan<T: serde::de::DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>, StoreError> {
        self.topology
            .scan_prefix(prefix)
            .map(|entry| {
                let (_, value) = entry?;
                decode(&value)
            })
            .collect()
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("flush_on_persist", &self.flush_on_persist)
            .finish()
    }
}

impl MessageStore for SledStore {
    fn persist(&self, queue: &str, envelope: &Envelope) -> Result<(), StoreError> {
        let tree = self.queue_tree(queue)?;
        let record = codec::encode_envelope(envelope)?;
        tree.insert(envelope.message.id().to_be_bytes(), record)?;
        if self.flush_on_persist {
            tree.flush()?;
        }
        Ok(())
    }

    fn remove_persisted(&self, queue: &str, id: MessageId) -> Result<(), StoreError> {
        self.queue_tree(queue)?.remove(id.to_be_bytes())?;
        Ok(())
    }

    fn load_on_startup(&self, queue: &str) -> Result<Vec<Envelope>, StoreError> {
        self.queue_tree(queue)?
            .iter()
            .values()
            .map(|value| codec::decode_envelope(&value?))
            .collect()
    }

    fn save_exchange(&self, def: &ExchangeDef) -> Result<(), StoreError> {
        let key = prefixed(EXCHANGE_KEY_PREFIX, def.name.as_bytes());
        self.topology.insert(key, encode(def)?)?;
        self.topology.flush()?;
        Ok(())
    }

    fn delete_exchange(&self, name: &str) -> Result<(), StoreError> {
        self.topology
            .remove(prefixed(EXCHANGE_KEY_PREFIX, name.as_bytes()))?;
        for binding in self.scan::<Binding>(BINDING_KEY_PREFIX)? {
            if binding.exchange == name {
                self.delete_binding(&binding)?;
            }
        }
        self.topology.flush()?;
        Ok(())
    }

    fn save_queue(&self, def: &QueueDef) -> Result<(), StoreError> {
        let key = prefixed(QUEUE_KEY_PREFIX, def.name.as_bytes());
        self.topology.insert(key, encode(def)?)?;
        self.topology.flush()?;
        Ok(())
    }

    fn delete_queue(&self, name: &str) -> Result<(), StoreError> {
        self.topology
            .remove(prefixed(QUEUE_KEY_PREFIX, name.as_bytes()))?;
        for binding in self.scan::<Binding>(BINDING_KEY_PREFIX)? {
            if binding.queue == name {
                self.delete_binding(&binding)?;
            }
        }
        self.db.drop_tree(queue_tree_name(name))?;
        self.topology.flush()?;
        Ok(())
    }

    fn save_binding(&self, binding: &Binding) -> Result<(), StoreError> {
        let record = encode(binding)?;
        self.topology
            .insert(prefixed(BINDING_KEY_PREFIX, &record), record)?;
        self.topology.flush()?;
        Ok(())
    }

    fn delete_binding(&self, binding: &Binding) -> Result<(), StoreError> {
        let record = encode(binding)?;
        self.topology
            .remove(prefixed(BINDING_KEY_PREFIX, &record))?;
        Ok(())
    }

    fn load_topology(&self) -> Result<Topology, StoreError> {
        Ok(Topology {
            exchanges: self.scan(EXCHANGE_KEY_PREFIX)?,
            queues: self.scan(QUEUE_KEY_PREFIX)?,
            bindings: self.scan(BINDING_KEY_PREFIX)?,
        })
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
