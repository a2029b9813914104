//! Delivered-message handle passed to providers and back to the manager.

use std::fmt;
use std::sync::Arc;

use crate::connector::Acknowledge;

/// Handle for one delivered message.
///
/// The handle is clonable so application code can carry it to wherever the
/// acknowledgment decision is made. Exactly one terminal outcome
/// ([`ack_message`](crate::QueueConsumer::ack_message) or
/// [`requeue_message`](crate::QueueConsumer::requeue_message)) is expected
/// per delivery; further attempts are rejected as unknown.
#[derive(Clone)]
pub struct Delivery {
    pub(crate) id: u64,
    pub(crate) queue: String,
    pub(crate) redelivered: bool,
    pub(crate) acker: Arc<dyn Acknowledge>,
}

impl Delivery {
    pub(crate) fn new(
        id: u64,
        queue: String,
        redelivered: bool,
        acker: Arc<dyn Acknowledge>,
    ) -> Self {
        Self {
            id,
            queue,
            redelivered,
            acker,
        }
    }

    /// Queue this message was delivered from.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Whether the broker flagged this delivery as a redelivery.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("queue", &self.queue)
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
