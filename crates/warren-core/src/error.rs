//! Broker errors.

use crate::message::DeliveryTag;
use crate::store::StoreError;
use std::fmt;
use thiserror::Error;

/// An entity an operation referred to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    /// An exchange, by name.
    Exchange(String),
    /// A queue, by name.
    Queue(String),
    /// A binding between an exchange and a queue.
    Binding {
        exchange: String,
        queue: String,
        routing_key: String,
    },
    /// A consumer, by tag.
    Consumer(String),
    /// A connection that was never opened or is already closed.
    Connection(String),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Exchange(name) => write!(f, "exchange '{name}'"),
            Entity::Queue(name) => write!(f, "queue '{name}'"),
            Entity::Binding {
                exchange,
                queue,
                routing_key,
            } => write!(
                f,
                "binding '{exchange}' -> '{queue}' (routing key '{routing_key}')"
            ),
            Entity::Consumer(tag) => write!(f, "consumer '{tag}'"),
            Entity::Connection(id) => write!(f, "connection '{id}'"),
        }
    }
}

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Redeclaration with a different kind, durability or exclusivity.
    #[error("Declaration conflict for {entity}: {reason}")]
    DeclarationConflict { entity: Entity, reason: String },

    /// Unknown exchange, queue, binding, consumer or connection.
    #[error("Not found: {0}")]
    NotFound(Entity),

    /// Ack or nack on a tag that is not outstanding.
    #[error("Unknown delivery tag {tag} on queue '{queue}'")]
    UnknownDeliveryTag { queue: String, tag: DeliveryTag },

    /// The durability backend failed to commit a required write.
    #[error("Durability failure: {0}")]
    DurabilityFailure(#[from] StoreError),

    /// Exclusive queue accessed from a connection that does not own it.
    #[error("Queue '{0}' is exclusive to another connection")]
    ResourceLocked(String),

    /// Invalid or reserved name.
    #[error("Invalid name: {0}")]
    InvalidName(&'static str),

    /// Consumer tag already registered.
    #[error("Consumer tag already in use: {0}")]
    ConsumerTagInUse(String),

    /// A configured limit would be exceeded.
    #[error("Limit reached: {0}")]
    LimitReached(&'static str),
}

impl BrokerError {
    pub(crate) fn exchange_not_found(name: &str) -> Self {
        Self::NotFound(Entity::Exchange(name.to_string()))
    }

    pub(crate) fn queue_not_found(name: &str) -> Self {
        Self::NotFound(Entity::Queue(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_display() {
        let binding = Entity::Binding {
            exchange: "logs_direct".into(),
            queue: "errors".into(),
            routing_key: "error".into(),
        };
        assert_eq!(
            binding.to_string(),
            "binding 'logs_direct' -> 'errors' (routing key 'error')"
        );
        assert_eq!(
            BrokerError::queue_not_found("task_queue").to_string(),
            "Not found: queue 'task_queue'"
        );
        assert_eq!(
            BrokerError::NotFound(Entity::Connection("conn_1".into())).to_string(),
            "Not found: connection 'conn_1'"
        );
    }
}
