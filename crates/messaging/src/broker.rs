//! The message broker seam.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{BrokerError, MessageHeaders};

/// Content type of every integration event body.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A message to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub headers: MessageHeaders,
    pub correlation_id: Option<String>,
}

impl OutgoingMessage {
    /// A JSON message with no headers.
    pub fn json(exchange: impl Into<String>, routing_key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            body,
            content_type: JSON_CONTENT_TYPE.to_string(),
            headers: MessageHeaders::new(),
            correlation_id: None,
        }
    }
}

/// Where a delivery came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// A broker queue; the delivery must be acked or rejected.
    Broker,
    /// An in-process call; there is nothing to ack and no way to requeue.
    Direct,
}

/// Settles a delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;

    /// Rejects the delivery. With `requeue = false` the broker discards it
    /// or routes it to the queue's dead letter exchange.
    async fn reject(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// Acknowledger for [`Transport::Direct`] deliveries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAcker;

#[async_trait]
impl Acknowledger for NoopAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn reject(&self, _requeue: bool) -> Result<(), BrokerError> {
        Ok(())
    }
}

/// An inbound message.
#[derive(Clone)]
pub struct Delivery {
    pub body: Vec<u8>,
    pub exchange: String,
    pub routing_key: String,
    pub headers: MessageHeaders,
    pub correlation_id: Option<String>,
    pub transport: Transport,
    pub acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    /// A delivery handed over in-process, outside any broker.
    pub fn direct(routing_key: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            body,
            exchange: String::new(),
            routing_key: routing_key.into(),
            headers: MessageHeaders::new(),
            correlation_id: None,
            transport: Transport::Direct,
            acker: Arc::new(NoopAcker),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("headers", &self.headers)
            .field("correlation_id", &self.correlation_id)
            .field("transport", &self.transport)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

/// A stream of deliveries from one queue.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, BrokerError>> + Send>>;

/// Publish/subscribe client of a message broker.
///
/// Publishing is not transactional with any database. Delivery guarantees
/// such as publisher confirms belong to the implementation.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, message: OutgoingMessage) -> Result<(), BrokerError>;

    async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, BrokerError>;
}
