//! Durability backends.
//!
//! The broker writes persistent messages routed to durable queues through a
//! [`MessageStore`] before enqueuing them, and removes them once they are
//! acknowledged or dropped. Durable exchanges, durable queues and bindings
//! between them are stored as well so the topology survives a restart.

mod codec;
mod memory;
mod sled_store;

pub use self::memory::MemoryStore;
pub use self::sled_store::SledStore;

use crate::binding::Binding;
use crate::exchange::ExchangeDef;
use crate::message::{Envelope, MessageId};
use crate::queue::QueueDef;
use std::fmt;
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying storage engine failure.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Record is unreadable.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Durable topology recovered at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    pub exchanges: Vec<ExchangeDef>,
    pub queues: Vec<QueueDef>,
    pub bindings: Vec<Binding>,
}

/// A durability backend.
///
/// A message handed to [`persist`](MessageStore::persist) must not be lost
/// before the matching [`remove_persisted`](MessageStore::remove_persisted)
/// returns.
pub trait MessageStore: Send + Sync + fmt::Debug {
    /// Write a message copy for `queue`.
    fn persist(&self, queue: &str, envelope: &Envelope) -> Result<(), StoreError>;

    /// Remove a previously persisted message copy.
    fn remove_persisted(&self, queue: &str, id: MessageId) -> Result<(), StoreError>;

    /// Load the persisted contents of `queue` in publish order.
    fn load_on_startup(&self, queue: &str) -> Result<Vec<Envelope>, StoreError>;

    fn save_exchange(&self, def: &ExchangeDef) -> Result<(), StoreError>;

    fn delete_exchange(&self, name: &str) -> Result<(), StoreError>;

    fn save_queue(&self, def: &QueueDef) -> Result<(), StoreError>;

    /// Remove a queue definition together with its persisted messages.
    fn delete_queue(&self, name: &str) -> Result<(), StoreError>;

    fn save_binding(&self, binding: &Binding) -> Result<(), StoreError>;

    fn delete_binding(&self, binding: &Binding) -> Result<(), StoreError>;

    fn load_topology(&self) -> Result<Topology, StoreError>;

    /// Force buffered writes to stable storage.
    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
