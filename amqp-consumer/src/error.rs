//! Error types for the amqp-consumer crate.

/// Errors from the underlying broker transport.
///
/// Connection-phase errors are retryable and never surface to callers of the
/// control surface; the event loop logs them and keeps attempting to connect
/// until the provider set empties.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// Connecting to the broker failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Opening the channel or applying the prefetch budget failed
    #[error("Channel setup failed: {0}")]
    ChannelSetup(String),

    /// Declaring or consuming from a queue failed
    #[error("Consume failed on queue {queue}: {reason}")]
    ConsumeFailed {
        /// The queue being consumed
        queue: String,
        /// The underlying failure
        reason: String,
    },

    /// Cancelling a broker-side consumer failed
    #[error("Cancel failed for consumer {consumer_tag}: {reason}")]
    CancelFailed {
        /// Tag of the consumer being cancelled
        consumer_tag: String,
        /// The underlying failure
        reason: String,
    },

    /// Acknowledging or requeueing a delivery failed
    #[error("Acknowledge failed: {0}")]
    AckFailed(String),
}

/// Errors surfaced by the [`QueueConsumer`](crate::QueueConsumer) control surface.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The delivery handle was never issued by this manager or has already
    /// reached its terminal outcome
    #[error("Unknown or already acknowledged delivery: {0}")]
    UnknownDelivery(u64),

    /// The broker rejected the operation
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
}

/// Errors returned by provider message handlers.
///
/// The manager logs handler failures and keeps serving; it never
/// acknowledges or requeues on a provider's behalf. A provider that wants a
/// failed message redelivered must requeue it itself before returning the
/// error.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The failure is expected to clear on redelivery
    #[error("Transient handler failure: {0}")]
    Transient(String),

    /// The failure will recur no matter how often the message is redelivered
    #[error("Permanent handler failure: {0}")]
    Permanent(String),
}

/// Convenience type alias for Results using ConsumerError.
pub type Result<T> = std::result::Result<T, ConsumerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_error_display() {
        let error = BrokerError::ConnectionFailed("connection refused".to_string());
        assert_eq!(error.to_string(), "Connection failed: connection refused");

        let error = BrokerError::ConsumeFailed {
            queue: "ham".to_string(),
            reason: "access refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Consume failed on queue ham: access refused"
        );

        let error = BrokerError::CancelFailed {
            consumer_tag: "ctag-1".to_string(),
            reason: "channel closed".to_string(),
        };
        assert!(error.to_string().contains("ctag-1"));
        assert!(error.to_string().contains("channel closed"));

        let error = BrokerError::AckFailed("channel closed".to_string());
        assert_eq!(error.to_string(), "Acknowledge failed: channel closed");
    }

    #[test]
    fn test_consumer_error_display() {
        let error = ConsumerError::UnknownDelivery(42);
        assert_eq!(
            error.to_string(),
            "Unknown or already acknowledged delivery: 42"
        );
    }

    #[test]
    fn test_handler_error_display() {
        let error = HandlerError::Transient("db connection lost".to_string());
        assert_eq!(
            error.to_string(),
            "Transient handler failure: db connection lost"
        );

        let error = HandlerError::Permanent("malformed payload".to_string());
        assert_eq!(
            error.to_string(),
            "Permanent handler failure: malformed payload"
        );
    }

    #[test]
    fn test_error_conversion_from_broker_error() {
        let broker_error = BrokerError::AckFailed("channel closed".to_string());
        let consumer_error: ConsumerError = broker_error.into();

        match consumer_error {
            ConsumerError::Broker(e) => {
                assert_eq!(e.to_string(), "Acknowledge failed: channel closed");
            }
            _ => panic!("Expected Broker variant"),
        }
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }

        assert_eq!(returns_result().unwrap(), 42);
    }
}
