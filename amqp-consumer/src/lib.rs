//! # amqp-consumer
//!
//! A shared AMQP consumption manager: one broker connection and channel,
//! multiplexed across many independently-registered message handlers
//! ("providers"), each bound to a queue.
//!
//! ## Overview
//!
//! Processes that consume from several queues usually do not want a
//! connection per consumer. A [`QueueConsumer`] owns a single connection
//! and channel, enforces one channel-level prefetch budget across every
//! provider it serves, and lets providers be registered and unregistered at
//! runtime without tearing the connection down. Unregistering drains: the
//! provider stops receiving new deliveries immediately, but the underlying
//! broker consumer is only cancelled once every in-flight message has been
//! acknowledged.
//!
//! ## Key behaviors
//!
//! - **Shared connection**: all queues are served over one channel owned by
//!   a background event loop
//! - **Dynamic registration**: providers come and go at runtime; underlying
//!   broker consumers are created and cancelled to match
//! - **Drain before cancel**: removal waits for pending acknowledgments, so
//!   no delivered message loses its ack opportunity
//! - **Manager-wide prefetch**: one in-flight budget across all providers;
//!   isolation requires separate manager instances
//! - **Indefinite retry**: connection failures keep the manager in
//!   `Starting` (or reconnecting) until the provider set empties
//!
//! ## Usage
//!
//! ```rust,ignore
//! use amqp_consumer::{Provider, QueueConsumer};
//! use std::sync::Arc;
//!
//! let consumer = Arc::new(QueueConsumer::new("amqp://localhost:5672", 10));
//!
//! let handler: Arc<dyn Provider> = Arc::new(OrderHandler::new(consumer.clone()));
//! consumer.register_provider(handler.clone());
//! consumer.start();
//!
//! // ... the handler receives deliveries and acks them via
//! // consumer.ack_message(&delivery) ...
//!
//! // Blocks until in-flight messages are acked and the broker-side
//! // consumer is cancelled.
//! consumer.unregister_provider(&handler).await;
//! ```
//!
//! ## Architecture
//!
//! 1. **Registration**: providers are recorded in a registry keyed by queue;
//!    no broker I/O happens on the caller's task
//! 2. **Event loop**: a background task connects (retrying indefinitely),
//!    activates one broker consumer per registered queue, and pumps
//!    deliveries to providers in registration order
//! 3. **Ack tracking**: each dispatched message is counted against its queue
//!    until `ack_message` (or `requeue_message`) resolves it
//! 4. **Drain**: when a queue's last provider is removed, its consumer is
//!    cancelled only after the pending count reaches zero, and the
//!    unregister call returns only after the cancel completes
//! 5. **Shutdown**: once the registry is empty the loop exits; the manager
//!    is single-shot

pub mod amqp;
pub mod connector;
pub mod consumer;
pub mod delivery;
pub mod error;
pub mod provider;
pub mod types;

mod registry;
mod worker;

// Re-export main types for convenience
pub use amqp::AmqpConnector;
pub use connector::{Acknowledge, BrokerChannel, Connector, ConsumerHandle, LoopEvent, RawDelivery};
pub use consumer::QueueConsumer;
pub use delivery::Delivery;
pub use error::{BrokerError, ConsumerError, HandlerError, Result};
pub use provider::Provider;
pub use types::{ConsumerConfig, ConsumerState, ExchangeKind, ExchangeSpec, QueueSpec};

/// Prelude module for convenient imports
///
/// Use this to import the most commonly used types and traits:
///
/// ```rust
/// use amqp_consumer::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        ConsumerConfig, ConsumerError, ConsumerState, Delivery, ExchangeKind, ExchangeSpec,
        HandlerError, Provider, QueueConsumer, QueueSpec, Result,
    };
}
