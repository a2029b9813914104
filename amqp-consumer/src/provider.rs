//! Provider trait for queue-bound message handlers.

use async_trait::async_trait;

use crate::delivery::Delivery;
use crate::error::HandlerError;
use crate::types::QueueSpec;

/// A registered message handler bound to one queue.
///
/// Multiple providers may target the same queue; they share one underlying
/// broker consumer and each receives every delivery for that queue, in
/// registration order. Provider identity is reference equality: the manager
/// compares `Arc` pointers, so registering the same `Arc` twice is a no-op
/// while two separately-allocated providers with the same queue are two
/// distinct subscribers.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; handlers are invoked from the
/// manager's event loop task.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Queue this provider consumes from.
    fn queue(&self) -> QueueSpec;

    /// Handle one delivered message.
    ///
    /// `body` is the raw message payload. `message` is the handle to pass to
    /// [`QueueConsumer::ack_message`](crate::QueueConsumer::ack_message) once
    /// processing is done; it may be cloned and acknowledged later from
    /// another task. The manager never acknowledges on the provider's
    /// behalf.
    ///
    /// The handler runs on the event loop: a handler that suspends without
    /// returning stalls every queue served by this manager, which is how the
    /// shared prefetch budget applies backpressure.
    ///
    /// # Errors
    ///
    /// Returned errors are logged and isolated per message; other providers
    /// registered on the same queue still receive the delivery.
    async fn handle_message(&self, body: &[u8], message: &Delivery) -> Result<(), HandlerError>;
}
