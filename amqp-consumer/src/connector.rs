//! Broker-client seam consumed by the event loop.
//!
//! The loop depends on these capability traits instead of a concrete AMQP
//! client so connection establishment can be substituted: production code
//! wires in [`AmqpConnector`](crate::amqp::AmqpConnector), while tests inject
//! failing or in-memory connectors without touching the loop.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::BrokerError;
use crate::types::QueueSpec;

/// Terminal outcomes for one delivered message.
///
/// Exactly one of `ack` or `requeue` is expected per delivery; the manager
/// enforces this through its pending-ack tracking, not here.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Acknowledge the message with the broker.
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Return the message to the broker for redelivery.
    async fn requeue(&self) -> Result<(), BrokerError>;
}

/// A message as it arrives from the broker, before the manager assigns its
/// tracking id.
pub struct RawDelivery {
    /// Raw message payload
    pub body: Vec<u8>,
    /// Whether the broker flagged this delivery as a redelivery
    pub redelivered: bool,
    /// Terminal-outcome handle for this delivery
    pub acker: Arc<dyn Acknowledge>,
}

/// Events pumped from broker consumers into the event loop.
pub enum LoopEvent {
    /// A message was delivered on `queue`.
    Delivery {
        /// Queue the message arrived on
        queue: String,
        /// The message itself
        delivery: RawDelivery,
    },
    /// The consumer stream for `queue` ended. Expected after a cancel;
    /// anything else means the connection is in trouble.
    ConsumerClosed {
        /// Queue whose consumer closed
        queue: String,
        /// The failure that ended the stream, if it did not end cleanly
        error: Option<BrokerError>,
    },
}

/// Handle to one active broker-side consumer.
#[async_trait]
pub trait ConsumerHandle: Send {
    /// Cancel the broker-side consumer.
    ///
    /// Deliveries already sent by the broker are unaffected: their
    /// acknowledgments remain valid on the channel after cancellation.
    async fn cancel(&mut self) -> Result<(), BrokerError>;
}

/// One open channel to the broker, with the manager's prefetch budget
/// already applied.
#[async_trait]
pub trait BrokerChannel: Send {
    /// Declare the queue described by `spec` (and its binding, if any),
    /// start a consumer on it, and forward every delivery into `events`.
    ///
    /// Implementations send [`LoopEvent::ConsumerClosed`] once the consumer
    /// stream ends, whether from cancellation or connection failure.
    async fn consume(
        &mut self,
        spec: &QueueSpec,
        events: mpsc::Sender<LoopEvent>,
    ) -> Result<Box<dyn ConsumerHandle>, BrokerError>;
}

/// One connection attempt to the broker.
///
/// Implementations perform a single attempt per call. The event loop owns
/// the retry cycle so it can re-check the provider registry at every attempt
/// boundary and abort once the registry empties.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Attempt to connect and open a channel with `prefetch_count` applied.
    async fn connect(&self, prefetch_count: u16) -> Result<Box<dyn BrokerChannel>, BrokerError>;
}
