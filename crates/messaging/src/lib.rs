//! Outbound integration events and inbound message handling.
//!
//! Outbound, a [`RoutingTable`] decides which domain events leave the
//! process and under which exchange and routing key. The
//! [`EventTranslator`] turns a domain event into an [`IntegrationEvent`]
//! and the [`IntegrationEventPublisher`] hands it to a [`MessageBroker`].
//!
//! Inbound, a [`MessageConsumer`] runs a [`MessageHandler`] per delivery and
//! routes failures through the [`RetryFilter`]: non-retryable errors are
//! dropped, retryable ones are republished to a delayed exchange with an
//! incremented `x-retry-count` until the retry budget runs out.

pub mod amqp;
pub mod broker;
pub mod consumer;
pub mod error;
pub mod handler;
pub mod headers;
pub mod integration_event;
pub mod memory;
pub mod publisher;
pub mod retry;
pub mod routing;

pub use amqp::{AmqpBroker, QueueTopology};
pub use broker::{Acknowledger, Delivery, DeliveryStream, MessageBroker, OutgoingMessage, Transport};
pub use consumer::MessageConsumer;
pub use error::{BrokerError, ConfigurationError, ConsumeError, TranslationError};
pub use handler::{ErrorKind, HandlerError, MessageHandler};
pub use headers::{
    DELAY_HEADER, HeaderValue, MessageHeaders, ORIGINAL_EXCHANGE_HEADER,
    ORIGINAL_ROUTING_KEY_HEADER, RETRY_COUNT_HEADER,
};
pub use integration_event::IntegrationEvent;
pub use memory::{AckOutcome, InMemoryBroker, RecordingAcker};
pub use publisher::IntegrationEventPublisher;
pub use retry::{BackoffStrategy, Disposition, DropReason, ErrorClassifier, RetryFilter, RetryPolicy};
pub use routing::{
    EventRoute, EventTranslator, PayloadMapper, RoutedEvent, RoutingTable, RoutingTableBuilder,
    Translation, passthrough,
};
