//! # warren-core
//!
//! Routing and delivery engine for the Warren message broker.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Exchange** - Fanout and direct routing policies over a binding table
//! - **Queue** - Ordered ready buffer plus the unacknowledged ledger
//! - **Dispatcher** - Prefetch-limited, round-robin fair dispatch
//! - **Broker** - Registry of exchanges and queues tying it all together
//! - **Store** - Durability backends for durable queues and persistent messages
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Publisher  │────▶│  Exchange   │────▶│    Queue    │────▶│  Consumer   │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │                    │
//!                                                ▼                    │ ack / nack
//!                                         ┌─────────────┐             │
//!                                         │    Store    │◀────────────┘
//!                                         └─────────────┘
//! ```
//!
//! Delivery is at-least-once. A consumer that disconnects while holding
//! unacknowledged deliveries gets them requeued and redelivered elsewhere,
//! so a message it processed but never acknowledged will be seen twice.

pub mod binding;
pub mod broker;
pub mod config;
pub mod connection;
pub mod consumer;
mod dispatcher;
pub mod error;
pub mod exchange;
pub mod message;
pub mod metrics;
pub mod queue;
pub mod store;

pub use binding::{Binding, BindingTable};
pub use broker::{Broker, BrokerStats};
pub use config::BrokerConfig;
pub use connection::ConnectionId;
pub use consumer::{ConsumeOptions, ConsumerTag, Subscription};
pub use error::{BrokerError, Entity};
pub use exchange::{Exchange, ExchangeKind, DEFAULT_EXCHANGE};
pub use message::{Delivery, DeliveryTag, Envelope, Message, MessageId};
pub use queue::{Queue, QueueInfo, QueueOptions};
pub use store::{MemoryStore, MessageStore, SledStore, StoreError};
