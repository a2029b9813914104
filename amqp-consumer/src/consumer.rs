//! Public control surface of the consumption manager.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::amqp::AmqpConnector;
use crate::connector::Connector;
use crate::delivery::Delivery;
use crate::error::{ConsumerError, Result};
use crate::provider::Provider;
use crate::registry::{Registry, Unregistered};
use crate::types::{ConsumerConfig, ConsumerState};
use crate::worker::EventLoop;

/// State shared between the control surface and the event loop.
pub(crate) struct Shared {
    registry: Mutex<Registry>,
    state: Mutex<ConsumerState>,
    /// Wakes the event loop whenever the registry or a pending count changed
    pub(crate) wake: Notify,
}

impl Shared {
    fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::new()),
            state: Mutex::new(ConsumerState::Idle),
            wake: Notify::new(),
        }
    }

    /// Lock the registry. The registry is never mutated across an await
    /// point, so a poisoned lock still holds a consistent value and is
    /// reclaimed rather than propagated.
    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn state(&self) -> ConsumerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_state(&self, state: ConsumerState) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *guard != state {
            debug!(from = ?*guard, to = ?state, "consumer state changed");
            *guard = state;
        }
    }
}

/// Shared AMQP consumption manager.
///
/// One `QueueConsumer` owns one broker connection and channel and
/// multiplexes it across independently-registered [`Provider`]s, each bound
/// to a queue. Providers can be added and removed at runtime without
/// tearing down the connection; removal drains in-flight messages before the
/// underlying broker consumer is cancelled.
///
/// The channel-level prefetch budget is manager-wide: a slow provider can
/// exhaust it and stall the other providers sharing this manager. Providers
/// needing isolation belong on separate manager instances.
///
/// # Example
///
/// ```rust,ignore
/// use amqp_consumer::QueueConsumer;
/// use std::sync::Arc;
///
/// let consumer = Arc::new(QueueConsumer::new("amqp://localhost:5672", 10));
/// consumer.register_provider(handler.clone());
/// consumer.start();
///
/// // ... handlers receive deliveries and call consumer.ack_message(...) ...
///
/// consumer.unregister_provider(&handler).await; // blocks until drained
/// ```
pub struct QueueConsumer {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    config: ConsumerConfig,
}

impl QueueConsumer {
    /// Create a manager that connects to `amqp_uri` with the given
    /// channel-level prefetch budget.
    pub fn new(amqp_uri: impl Into<String>, prefetch_count: u16) -> Self {
        let config = ConsumerConfig {
            prefetch_count,
            ..ConsumerConfig::default()
        };
        Self::with_connector(Arc::new(AmqpConnector::new(amqp_uri)), config)
    }

    /// Create a manager over an injected connection strategy.
    ///
    /// This is the seam fault-injection tests use to substitute a failing or
    /// in-memory connector for the real broker client.
    pub fn with_connector(connector: Arc<dyn Connector>, config: ConsumerConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            connector,
            config,
        }
    }

    /// Spawn the event loop.
    ///
    /// Idempotent: a second call while the loop is starting or running (or
    /// after it stopped) is a no-op and never spawns a second loop. Returns
    /// once the spawn request is issued; it does not wait for the connection
    /// to be established. Connection progress is observed via [`state`].
    ///
    /// [`state`]: QueueConsumer::state
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) {
        {
            let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != ConsumerState::Idle {
                debug!(state = ?*state, "start ignored; consumer already started");
                return;
            }
            *state = ConsumerState::Starting;
        }

        let event_loop = EventLoop::new(
            Arc::clone(&self.shared),
            Arc::clone(&self.connector),
            self.config.clone(),
        );
        tokio::spawn(event_loop.run());
        info!("queue consumer started");
    }

    /// Register `provider` for deliveries on its queue.
    ///
    /// Never blocks and performs no broker I/O; the event loop picks up the
    /// change at its next scheduling point and activates an underlying
    /// consumer if the queue does not have one yet. Registering the same
    /// `Arc` twice is a no-op.
    pub fn register_provider(&self, provider: Arc<dyn Provider>) {
        let queue = provider.queue().name().to_string();
        let added = self.shared.registry().register(provider);
        if added {
            debug!(%queue, "provider registered");
            self.shared.wake.notify_one();
        } else {
            debug!(%queue, "provider already registered");
        }
    }

    /// Remove `provider` and, if it was the last provider on its queue, wait
    /// for the queue to drain and its underlying consumer to be cancelled.
    ///
    /// No delivery arriving after this call begins is routed to the removed
    /// provider. Messages already dispatched keep their acknowledgment
    /// opportunity: the underlying consumer is only cancelled once the
    /// queue's pending-ack count reaches zero. Messages published after
    /// cancellation stay on the broker, unconsumed.
    ///
    /// There is no internal timeout; callers needing a bound wrap this in
    /// `tokio::time::timeout`. Unregistering a provider that was never
    /// registered returns immediately.
    pub async fn unregister_provider(&self, provider: &Arc<dyn Provider>) {
        let queue = provider.queue().name().to_string();
        let outcome = self.shared.registry().unregister(provider);

        match outcome {
            Unregistered::NotRegistered => {
                debug!(%queue, "unregister ignored; provider not registered");
            }
            Unregistered::OthersRemain => {
                debug!(%queue, "provider removed; queue keeps other providers");
                self.shared.wake.notify_one();
            }
            Unregistered::LastProvider(waiter) => {
                // A loop that is not running cannot complete the drain, so
                // entries that never got a consumer are cleaned up inline.
                let loop_alive = matches!(
                    self.state(),
                    ConsumerState::Starting | ConsumerState::Running
                );
                if !loop_alive {
                    let waiters = self.shared.registry().remove_inactive_empty();
                    for w in waiters {
                        let _ = w.send(());
                    }
                }
                self.shared.wake.notify_one();

                debug!(%queue, "last provider removed; waiting for drain");
                let _ = waiter.await;
                debug!(%queue, "drain complete");
            }
        }
    }

    /// Acknowledge a delivered message with the broker and release its slot
    /// in the pending-ack tracking.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::UnknownDelivery`] if the handle was never
    /// issued by this manager or has already reached a terminal outcome; no
    /// pending count is altered in that case. Broker failures surface as
    /// [`ConsumerError::Broker`].
    pub async fn ack_message(&self, message: &Delivery) -> Result<()> {
        let queue = self
            .shared
            .registry()
            .resolve_delivery(message.id)
            .ok_or(ConsumerError::UnknownDelivery(message.id))?;

        message.acker.ack().await?;
        debug!(%queue, id = message.id, "message acknowledged");
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Return a delivered message to the broker for redelivery.
    ///
    /// The negative counterpart of [`ack_message`](QueueConsumer::ack_message):
    /// it resolves the same pending-ack claim, so a drain waiting on this
    /// queue still completes. Providers that want redelivery after a
    /// handling failure call this before returning their error.
    ///
    /// # Errors
    ///
    /// Same contract as [`ack_message`](QueueConsumer::ack_message).
    pub async fn requeue_message(&self, message: &Delivery) -> Result<()> {
        let queue = self
            .shared
            .registry()
            .resolve_delivery(message.id)
            .ok_or(ConsumerError::UnknownDelivery(message.id))?;

        message.acker.requeue().await?;
        debug!(%queue, id = message.id, "message requeued");
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Current lifecycle state of the manager.
    pub fn state(&self) -> ConsumerState {
        self.shared.state()
    }

    /// Number of providers currently registered on `queue`.
    pub fn provider_count(&self, queue: &str) -> usize {
        self.shared.registry().provider_count(queue)
    }

    /// Messages dispatched on `queue` that have not reached a terminal
    /// outcome yet.
    pub fn pending_acks(&self, queue: &str) -> usize {
        self.shared.registry().pending_acks(queue)
    }
}
