//! Provider registry and pending-ack bookkeeping.
//!
//! One structure holds everything the control surface and the event loop
//! share: per-queue provider sets, activation flags, pending-ack counts,
//! drain waiters, and the delivery claim map. It all lives under a single
//! mutex so the loop's cancellation check always observes ack decrements
//! atomically with provider removals.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::provider::Provider;
use crate::types::QueueSpec;

/// Per-queue registry entry.
struct QueueEntry {
    /// Declaration spec from the first registrant
    spec: QueueSpec,
    /// Registered providers, in registration order
    providers: Vec<Arc<dyn Provider>>,
    /// Whether the event loop has a live broker consumer for this queue
    active: bool,
    /// Messages dispatched on this queue and not yet acknowledged
    pending_acks: usize,
    /// Callers blocked in unregister until this queue drains and cancels
    drain_waiters: Vec<oneshot::Sender<()>>,
}

/// Outcome of removing a provider from the registry.
pub(crate) enum Unregistered {
    /// The provider was not registered; nothing to wait for.
    NotRegistered,
    /// Other providers remain on the queue; the consumer stays up.
    OthersRemain,
    /// The last provider left. The receiver completes once the queue has
    /// drained and its consumer is cancelled.
    LastProvider(oneshot::Receiver<()>),
}

pub(crate) struct Registry {
    entries: HashMap<String, QueueEntry>,
    /// Delivery id -> queue name. An id is claimed exactly once; a second
    /// claim attempt is how double-acks are rejected.
    pending: HashMap<u64, String>,
    next_delivery_id: u64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            pending: HashMap::new(),
            next_delivery_id: 0,
        }
    }

    /// Add `provider` to its queue's entry, creating the entry if absent.
    ///
    /// Idempotent per provider instance; returns false if this exact `Arc`
    /// was already registered.
    pub(crate) fn register(&mut self, provider: Arc<dyn Provider>) -> bool {
        let spec = provider.queue();
        let entry = self
            .entries
            .entry(spec.name().to_string())
            .or_insert_with(|| QueueEntry {
                spec,
                providers: Vec::new(),
                active: false,
                pending_acks: 0,
                drain_waiters: Vec::new(),
            });

        if entry.providers.iter().any(|p| Arc::ptr_eq(p, &provider)) {
            return false;
        }
        entry.providers.push(provider);
        true
    }

    /// Remove `provider` from its queue's entry.
    ///
    /// Removal is immediate: no later delivery is routed to the provider.
    /// Cancelling the underlying consumer is deferred to the event loop's
    /// drain protocol; when the last provider leaves, a drain waiter is
    /// installed for the caller to block on.
    pub(crate) fn unregister(&mut self, provider: &Arc<dyn Provider>) -> Unregistered {
        let queue = provider.queue();
        let Some(entry) = self.entries.get_mut(queue.name()) else {
            return Unregistered::NotRegistered;
        };

        let before = entry.providers.len();
        entry.providers.retain(|p| !Arc::ptr_eq(p, provider));
        if entry.providers.len() == before {
            return Unregistered::NotRegistered;
        }
        if !entry.providers.is_empty() {
            return Unregistered::OthersRemain;
        }

        let (tx, rx) = oneshot::channel();
        entry.drain_waiters.push(tx);
        Unregistered::LastProvider(rx)
    }

    /// Providers currently registered on `queue`, in registration order.
    pub(crate) fn providers_for(&self, queue: &str) -> Vec<Arc<dyn Provider>> {
        self.entries
            .get(queue)
            .map(|e| e.providers.clone())
            .unwrap_or_default()
    }

    /// Claim a delivery id for a dispatch on `queue`, incrementing its
    /// pending count. Returns None if the queue has no providers left, in
    /// which case the caller should hand the message back to the broker.
    pub(crate) fn claim_delivery(&mut self, queue: &str) -> Option<u64> {
        let entry = self.entries.get_mut(queue)?;
        if entry.providers.is_empty() {
            return None;
        }

        let id = self.next_delivery_id;
        self.next_delivery_id += 1;
        entry.pending_acks += 1;
        self.pending.insert(id, queue.to_string());
        Some(id)
    }

    /// Resolve a terminal outcome for delivery `id`: remove the claim and
    /// decrement its queue's pending count. Returns the queue name, or None
    /// if the id is unknown or already resolved (no count is altered).
    pub(crate) fn resolve_delivery(&mut self, id: u64) -> Option<String> {
        let queue = self.pending.remove(&id)?;
        if let Some(entry) = self.entries.get_mut(&queue) {
            entry.pending_acks = entry.pending_acks.saturating_sub(1);
        }
        Some(queue)
    }

    /// Mark `queue` as having a live broker consumer.
    pub(crate) fn mark_active(&mut self, queue: &str) {
        if let Some(entry) = self.entries.get_mut(queue) {
            entry.active = true;
        }
    }

    /// Queues with providers but no live consumer yet.
    pub(crate) fn needs_activation(&self) -> Vec<QueueSpec> {
        self.entries
            .values()
            .filter(|e| !e.active && !e.providers.is_empty())
            .map(|e| e.spec.clone())
            .collect()
    }

    /// Active queues whose provider set emptied and whose dispatched
    /// messages have all been acknowledged. These are safe to cancel.
    pub(crate) fn ready_to_cancel(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, e)| e.active && e.providers.is_empty() && e.pending_acks == 0)
            .map(|(queue, _)| queue.clone())
            .collect()
    }

    /// Remove entries that never got a consumer and have no providers left,
    /// returning their drain waiters for immediate completion.
    pub(crate) fn remove_inactive_empty(&mut self) -> Vec<oneshot::Sender<()>> {
        let mut waiters = Vec::new();
        self.entries.retain(|_, entry| {
            if !entry.active && entry.providers.is_empty() {
                waiters.append(&mut entry.drain_waiters);
                false
            } else {
                true
            }
        });
        waiters
    }

    /// Remove `queue` after its consumer was cancelled, returning its drain
    /// waiters.
    pub(crate) fn remove_cancelled(&mut self, queue: &str) -> Vec<oneshot::Sender<()>> {
        self.entries
            .remove(queue)
            .map(|e| e.drain_waiters)
            .unwrap_or_default()
    }

    /// Whether no entries remain at all.
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending-ack count for `queue`.
    pub(crate) fn pending_acks(&self, queue: &str) -> usize {
        self.entries.get(queue).map(|e| e.pending_acks).unwrap_or(0)
    }

    /// Number of providers registered on `queue`.
    pub(crate) fn provider_count(&self, queue: &str) -> usize {
        self.entries
            .get(queue)
            .map(|e| e.providers.len())
            .unwrap_or(0)
    }

    /// The connection was lost: every consumer is gone and the broker will
    /// redeliver whatever was unacknowledged. Outstanding delivery claims
    /// are dropped, so stale handles resolve as unknown from here on.
    pub(crate) fn reset_after_disconnect(&mut self) {
        self.pending.clear();
        for entry in self.entries.values_mut() {
            entry.active = false;
            entry.pending_acks = 0;
        }
    }
}
