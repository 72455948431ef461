//! Exchanges and routing.
//!
//! An exchange resolves a published message's routing key to a set of target
//! queues through its [`BindingTable`]. An empty target set means the message
//! is dropped; publishers are never told whether anyone was listening.

use crate::binding::{Binding, BindingTable};
use crate::error::{BrokerError, Entity};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{PoisonError, RwLock};
use tracing::trace;

/// Name of the default exchange.
///
/// Every queue is implicitly bound to it under its own name, so publishing
/// here with a queue name as routing key sends straight to that queue.
pub const DEFAULT_EXCHANGE: &str = "";

/// Exchange routing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Route to queues whose binding key equals the routing key.
    Direct,
    /// Route to every bound queue.
    Fanout,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeKind::Direct => f.write_str("direct"),
            ExchangeKind::Fanout => f.write_str("fanout"),
        }
    }
}

/// Declared shape of an exchange, as stored by durability backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDef {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

/// A named exchange with its bindings.
#[derive(Debug)]
pub struct Exchange {
    name: String,
    kind: ExchangeKind,
    durable: bool,
    bindings: RwLock<BindingTable>,
}

impl Exchange {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: ExchangeKind, durable: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            durable,
            bindings: RwLock::new(BindingTable::new()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> ExchangeKind {
        self.kind
    }

    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.durable
    }

    #[must_use]
    pub fn def(&self) -> ExchangeDef {
        ExchangeDef {
            name: self.name.clone(),
            kind: self.kind,
            durable: self.durable,
        }
    }

    /// Check that a redeclaration matches this exchange.
    ///
    /// # Errors
    ///
    /// Returns `DeclarationConflict` if kind or durability differ.
    pub fn check_redeclare(&self, kind: ExchangeKind, durable: bool) -> Result<(), BrokerError> {
        let reason = if self.kind != kind {
            format!("declared as {}, requested {}", self.kind, kind)
        } else if self.durable != durable {
            format!("declared with durable={}, requested durable={}", self.durable, durable)
        } else {
            return Ok(());
        };
        Err(BrokerError::DeclarationConflict {
            entity: Entity::Exchange(self.name.clone()),
            reason,
        })
    }

    /// Add a binding. Returns `false` if an identical binding existed.
    pub fn bind(&self, queue: &str, routing_key: &str) -> bool {
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(queue, routing_key)
    }

    /// Remove a binding. Returns `false` if it did not exist.
    pub fn unbind(&self, queue: &str, routing_key: &str) -> bool {
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(queue, routing_key)
    }

    /// Drop every binding to `queue`, returning the removed bindings.
    pub fn unbind_queue(&self, queue: &str) -> Vec<Binding> {
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_queue(queue)
            .into_iter()
            .map(|key| Binding::new(self.name.as_str(), queue, key))
            .collect()
    }

    #[must_use]
    pub fn has_binding(&self, queue: &str, routing_key: &str) -> bool {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(queue, routing_key)
    }

    /// Resolve the target queues for `routing_key`.
    #[must_use]
    pub fn route(&self, routing_key: &str) -> Vec<String> {
        let table = self.bindings.read().unwrap_or_else(PoisonError::into_inner);
        let targets = match self.kind {
            ExchangeKind::Fanout => table.all_queues(),
            ExchangeKind::Direct => table.matching(routing_key),
        };
        trace!(
            exchange = %self.name,
            routing_key = %routing_key,
            targets = targets.len(),
            "Routed"
        );
        targets
    }

    #[must_use]
    pub fn bindings(&self) -> Vec<Binding> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .bindings(&self.name)
    }

    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
