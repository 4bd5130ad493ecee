use thiserror::Error;

use crate::HandlerError;

/// Errors raised by a message broker client.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Failed to connect to the broker.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The broker refused or failed a publish.
    #[error("Publish to exchange '{exchange}' with routing key '{routing_key}' failed: {reason}")]
    Publish {
        exchange: String,
        routing_key: String,
        reason: String,
    },

    /// Failed to subscribe to a queue.
    #[error("Subscription to queue '{queue}' failed: {reason}")]
    Subscribe { queue: String, reason: String },

    /// Failed to ack or reject a delivery.
    #[error("Acknowledgement failed: {0}")]
    Acknowledge(String),

    /// A message body could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// AMQP protocol or transport error.
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

/// Errors raised while translating a domain event for publication.
#[derive(Debug, Error)]
pub enum TranslationError {
    /// The routing table has no entry for the event name.
    #[error("No route for event '{0}'")]
    UnroutedEvent(String),

    /// The payload mapper rejected the event.
    #[error("Cannot map event '{event_name}': {reason}")]
    Mapping { event_name: String, reason: String },
}

impl TranslationError {
    /// Shorthand for a [`TranslationError::Mapping`].
    pub fn mapping(event_name: impl Into<String>, reason: impl ToString) -> Self {
        TranslationError::Mapping {
            event_name: event_name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Startup configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A producible event has no route.
    #[error("Event '{0}' has no route; declare it as published or internal-only")]
    UnroutedEvent(String),

    /// The same event name was routed twice.
    #[error("Event '{0}' is routed more than once")]
    DuplicateRoute(String),
}

/// Errors surfaced by the consume path.
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// The handler failed on a message that did not come from the broker.
    /// The original error is returned untouched.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// Republishing to the delayed exchange failed; the delivery was
    /// rejected with requeue.
    #[error("Requeue failed: {0}")]
    RequeueFailed(#[source] BrokerError),

    /// Acking or rejecting the delivery failed.
    #[error("Acknowledgement failed: {0}")]
    Acknowledge(#[source] BrokerError),
}
