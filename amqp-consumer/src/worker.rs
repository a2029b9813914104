//! Background event loop owning the broker connection.
//!
//! The loop is the only task that touches the connection and channel. It:
//! - establishes the connection, retrying until the provider registry empties
//! - activates an underlying broker consumer per queue that needs one
//! - pumps deliveries to the registered providers, in registration order
//! - cancels consumers once their queue has no providers and no pending acks
//! - reconnects when a consumer stream dies without having been cancelled
//! - exits once the registry is fully drained

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::connector::{BrokerChannel, Connector, ConsumerHandle, LoopEvent, RawDelivery};
use crate::consumer::Shared;
use crate::delivery::Delivery;
use crate::error::{BrokerError, HandlerError};
use crate::types::{ConsumerConfig, ConsumerState};

pub(crate) struct EventLoop {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    config: ConsumerConfig,
}

impl EventLoop {
    pub(crate) fn new(
        shared: Arc<Shared>,
        connector: Arc<dyn Connector>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            shared,
            connector,
            config,
        }
    }

    pub(crate) async fn run(self) {
        info!("event loop starting");

        'connection: loop {
            let Some(mut channel) = self.establish_channel().await else {
                // Registry emptied while (re)connecting.
                break;
            };
            self.shared.set_state(ConsumerState::Running);

            let (events_tx, mut events_rx) =
                mpsc::channel::<LoopEvent>(self.config.delivery_buffer_size);
            let mut consumers: HashMap<String, Box<dyn ConsumerHandle>> = HashMap::new();

            loop {
                match self
                    .reconcile(channel.as_mut(), &events_tx, &mut consumers)
                    .await
                {
                    Ok(true) => {
                        Self::flush_undispatched(&mut events_rx).await;
                        break 'connection;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(error = %e, "broker channel failed; reconnecting");
                        self.shared.registry().reset_after_disconnect();
                        continue 'connection;
                    }
                }

                tokio::select! {
                    event = events_rx.recv() => {
                        match event {
                            Some(LoopEvent::Delivery { queue, delivery }) => {
                                self.dispatch(queue, delivery).await;
                            }
                            Some(LoopEvent::ConsumerClosed { queue, error }) => {
                                if consumers.contains_key(&queue) {
                                    warn!(
                                        %queue,
                                        error = ?error,
                                        "consumer stream closed unexpectedly; reconnecting"
                                    );
                                    self.shared.registry().reset_after_disconnect();
                                    continue 'connection;
                                }
                                debug!(%queue, "consumer stream closed after cancel");
                            }
                            None => {
                                self.shared.registry().reset_after_disconnect();
                                continue 'connection;
                            }
                        }
                    }
                    _ = self.shared.wake.notified() => {}
                }
            }
        }

        self.shared.set_state(ConsumerState::Stopped);
        let waiters = self.shared.registry().remove_inactive_empty();
        for waiter in waiters {
            let _ = waiter.send(());
        }
        info!("event loop stopped");
    }

    /// Establish the connection, one attempt at a time.
    ///
    /// The registry is re-checked at every attempt boundary and every wake
    /// signal, so unregistering the last provider terminates the loop
    /// promptly even against an unreachable broker. Returns None once the
    /// registry is empty.
    async fn establish_channel(&self) -> Option<Box<dyn BrokerChannel>> {
        loop {
            // Entries whose last provider left while disconnected have no
            // consumer to drain; complete their waiters here so the
            // emptiness check below sees through them.
            let (waiters, empty) = {
                let mut registry = self.shared.registry();
                let waiters = registry.remove_inactive_empty();
                (waiters, registry.is_empty())
            };
            for waiter in waiters {
                let _ = waiter.send(());
            }
            if empty {
                debug!("registry empty; abandoning connection attempts");
                return None;
            }

            tokio::select! {
                result = self.connector.connect(self.config.prefetch_count) => {
                    match result {
                        Ok(channel) => return Some(channel),
                        Err(e) => {
                            warn!(error = %e, "broker connection attempt failed; retrying");
                            tokio::select! {
                                _ = sleep(self.config.reconnect_backoff) => {}
                                _ = self.shared.wake.notified() => {}
                            }
                        }
                    }
                }
                _ = self.shared.wake.notified() => {}
            }
        }
    }

    /// Bring the broker-side consumers in line with the registry.
    ///
    /// Activates queues that gained providers, cancels queues whose
    /// providers left and whose pending acks drained, and completes drain
    /// waiters. Returns Ok(true) once the registry is fully drained and the
    /// loop should stop; Err means the channel is unusable and the loop
    /// should reconnect.
    async fn reconcile(
        &self,
        channel: &mut dyn BrokerChannel,
        events_tx: &mpsc::Sender<LoopEvent>,
        consumers: &mut HashMap<String, Box<dyn ConsumerHandle>>,
    ) -> Result<bool, BrokerError> {
        let waiters = self.shared.registry().remove_inactive_empty();
        for waiter in waiters {
            let _ = waiter.send(());
        }

        let to_activate = self.shared.registry().needs_activation();
        for spec in to_activate {
            let handle = channel.consume(&spec, events_tx.clone()).await?;
            consumers.insert(spec.name().to_string(), handle);
            self.shared.registry().mark_active(spec.name());
            info!(queue = %spec.name(), "consumer activated");
        }

        let to_cancel = self.shared.registry().ready_to_cancel();
        for queue in to_cancel {
            let Some(mut handle) = consumers.remove(&queue) else {
                continue;
            };
            handle.cancel().await?;
            let waiters = self.shared.registry().remove_cancelled(&queue);
            for waiter in waiters {
                let _ = waiter.send(());
            }
            info!(%queue, "consumer cancelled after drain");
        }

        Ok(self.shared.registry().is_empty() && consumers.is_empty())
    }

    /// Hand back deliveries that were pumped into the loop but never
    /// dispatched, so they stay visible on the broker after shutdown.
    async fn flush_undispatched(events_rx: &mut mpsc::Receiver<LoopEvent>) {
        events_rx.close();
        while let Some(event) = events_rx.recv().await {
            if let LoopEvent::Delivery { queue, delivery } = event {
                debug!(%queue, "returning undispatched delivery at shutdown");
                if let Err(e) = delivery.acker.requeue().await {
                    debug!(%queue, error = %e, "requeue at shutdown failed");
                }
            }
        }
    }

    /// Route one delivery to every provider registered on its queue.
    async fn dispatch(&self, queue: String, raw: RawDelivery) {
        let RawDelivery {
            body,
            redelivered,
            acker,
        } = raw;

        let claim = {
            let mut registry = self.shared.registry();
            registry
                .claim_delivery(&queue)
                .map(|id| (id, registry.providers_for(&queue)))
        };

        let Some((id, providers)) = claim else {
            // Raced the removal of the queue's last provider. Hand the
            // message back so it stays visible on the broker.
            debug!(%queue, "delivery raced provider removal; requeueing");
            if let Err(e) = acker.requeue().await {
                warn!(%queue, error = %e, "requeue of unroutable delivery failed");
            }
            return;
        };

        let delivery = Delivery::new(id, queue.clone(), redelivered, acker);

        // Every provider sees the delivery, regardless of earlier handler
        // failures on the same message.
        for provider in providers {
            let outcome = AssertUnwindSafe(provider.handle_message(&body, &delivery))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(HandlerError::Transient(reason))) => {
                    warn!(%queue, id, %reason, "handler failed");
                }
                Ok(Err(HandlerError::Permanent(reason))) => {
                    error!(%queue, id, %reason, "handler failed permanently");
                }
                Err(_) => {
                    error!(%queue, id, "handler panicked; continuing");
                }
            }
        }
    }
}
