//! Core types for the amqp-consumer crate.

use std::time::Duration;

/// AMQP exchange kinds supported for queue bindings.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum ExchangeKind {
    /// Route on exact routing-key match
    Direct,
    /// Route to every bound queue, ignoring the routing key
    Fanout,
    /// Route on routing-key pattern match
    Topic,
    /// Route on header table match
    Headers,
}

/// Declaration parameters for the exchange a queue is bound to.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExchangeSpec {
    /// Exchange name on the broker
    pub name: String,
    /// Exchange kind used when declaring
    pub kind: ExchangeKind,
    /// Whether the exchange survives a broker restart
    pub durable: bool,
    /// Whether the broker deletes the exchange once unused
    pub auto_delete: bool,
}

impl ExchangeSpec {
    /// Create a direct exchange spec with default flags.
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Direct,
            durable: false,
            auto_delete: false,
        }
    }

    /// Create a fanout exchange spec with default flags.
    pub fn fanout(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Fanout,
            durable: false,
            auto_delete: false,
        }
    }
}

/// Identity of the queue a provider consumes from, plus the binding
/// metadata needed to declare it on activation.
///
/// Two providers whose specs share a queue name share one underlying broker
/// consumer; the first registrant's spec is used for declaration.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct QueueSpec {
    /// Broker-side queue name
    pub queue: String,
    /// Exchange the queue is bound to, if any
    pub exchange: Option<ExchangeSpec>,
    /// Routing key used for the binding
    pub routing_key: String,
    /// Whether the queue survives a broker restart
    pub durable: bool,
    /// Whether the broker deletes the queue once unused
    pub auto_delete: bool,
    /// Whether the queue is exclusive to this connection
    pub exclusive: bool,
}

impl QueueSpec {
    /// Create a spec for an unbound queue with default flags.
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            exchange: None,
            routing_key: String::new(),
            durable: false,
            auto_delete: false,
            exclusive: false,
        }
    }

    /// Bind the queue to `exchange` with `routing_key`.
    pub fn bound_to(mut self, exchange: ExchangeSpec, routing_key: impl Into<String>) -> Self {
        self.exchange = Some(exchange);
        self.routing_key = routing_key.into();
        self
    }

    /// Mark the queue durable.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Get the queue name.
    pub fn name(&self) -> &str {
        &self.queue
    }
}

impl std::fmt::Display for QueueSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.queue)
    }
}

/// Lifecycle state of a [`QueueConsumer`](crate::QueueConsumer).
///
/// `Idle` until the first `start`, `Starting` while the connection is being
/// established, `Running` once deliveries are being served, and `Stopped`
/// after the provider set empties and the event loop exits. The manager is
/// single-shot: `Stopped` is terminal.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConsumerState {
    /// Never started
    Idle,
    /// Event loop spawned, connection not yet established
    Starting,
    /// Connected and serving deliveries
    Running,
    /// Provider set emptied and the event loop exited
    Stopped,
}

/// Configuration for the consumption manager.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Channel-level cap on unacknowledged in-flight messages, shared across
    /// every queue and provider served by the manager
    pub prefetch_count: u16,
    /// Wait between failed connection attempts
    pub reconnect_backoff: Duration,
    /// Size of the delivery buffer between broker consumers and the event loop
    pub delivery_buffer_size: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            prefetch_count: 10,
            reconnect_backoff: Duration::from_secs(2),
            delivery_buffer_size: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_spec_defaults() {
        let spec = QueueSpec::new("orders");
        assert_eq!(spec.name(), "orders");
        assert!(spec.exchange.is_none());
        assert!(spec.routing_key.is_empty());
        assert!(!spec.durable);
        assert!(!spec.exclusive);
    }

    #[test]
    fn test_queue_spec_binding() {
        let spec = QueueSpec::new("orders")
            .bound_to(ExchangeSpec::direct("commerce"), "order.created")
            .durable();

        assert_eq!(spec.name(), "orders");
        assert!(spec.durable);
        let exchange = spec.exchange.expect("binding should be present");
        assert_eq!(exchange.name, "commerce");
        assert_eq!(exchange.kind, ExchangeKind::Direct);
        assert_eq!(spec.routing_key, "order.created");
    }

    #[test]
    fn test_queue_spec_display() {
        let spec = QueueSpec::new("orders");
        assert_eq!(spec.to_string(), "orders");
    }

    #[test]
    fn test_config_defaults() {
        let config = ConsumerConfig::default();
        assert_eq!(config.prefetch_count, 10);
        assert_eq!(config.reconnect_backoff, Duration::from_secs(2));
        assert_eq!(config.delivery_buffer_size, 64);
    }
}
