use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::{
    Acknowledger, BrokerError, Delivery, DeliveryStream, MessageBroker, OutgoingMessage, Transport,
};

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acked,
    Rejected { requeue: bool },
}

/// [`Acknowledger`] that records every call, for tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingAcker {
    outcomes: Arc<Mutex<Vec<AckOutcome>>>,
}

impl RecordingAcker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every settlement so far, oldest first.
    pub async fn outcomes(&self) -> Vec<AckOutcome> {
        self.outcomes.lock().await.clone()
    }
}

#[async_trait]
impl Acknowledger for RecordingAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.outcomes.lock().await.push(AckOutcome::Acked);
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.outcomes
            .lock()
            .await
            .push(AckOutcome::Rejected { requeue });
        Ok(())
    }
}

#[derive(Default)]
struct BrokerState {
    published: Vec<OutgoingMessage>,
    failures_remaining: usize,
    /// `(exchange, routing_key) -> queues`
    bindings: HashMap<(String, String), Vec<String>>,
    subscribers: HashMap<String, mpsc::UnboundedSender<Delivery>>,
}

/// In-memory message broker for testing.
///
/// Records every published message and routes it to the queues bound to
/// its exchange and routing key. Delayed exchanges deliver immediately;
/// the `x-delay` header is only recorded.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<RwLock<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes messages published to `exchange` with `routing_key` to `queue`.
    pub async fn bind(
        &self,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        queue: impl Into<String>,
    ) {
        self.state
            .write()
            .await
            .bindings
            .entry((exchange.into(), routing_key.into()))
            .or_default()
            .push(queue.into());
    }

    /// Makes the next `count` publishes fail.
    pub async fn fail_next_publishes(&self, count: usize) {
        self.state.write().await.failures_remaining = count;
    }

    /// Every successfully published message, oldest first.
    pub async fn published(&self) -> Vec<OutgoingMessage> {
        self.state.read().await.published.clone()
    }

    pub async fn publish_count(&self) -> usize {
        self.state.read().await.published.len()
    }

    /// Drops every recorded message.
    pub async fn clear(&self) {
        self.state.write().await.published.clear();
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, message: OutgoingMessage) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(BrokerError::Publish {
                exchange: message.exchange,
                routing_key: message.routing_key,
                reason: "injected publish failure".to_string(),
            });
        }

        let key = (message.exchange.clone(), message.routing_key.clone());
        let queues = state.bindings.get(&key).cloned().unwrap_or_default();
        for queue in queues {
            if let Some(sender) = state.subscribers.get(&queue) {
                let delivery = Delivery {
                    body: message.body.clone(),
                    exchange: message.exchange.clone(),
                    routing_key: message.routing_key.clone(),
                    headers: message.headers.clone(),
                    correlation_id: message.correlation_id.clone(),
                    transport: Transport::Broker,
                    acker: Arc::new(RecordingAcker::new()),
                };
                // A dropped stream just means nobody listens any more.
                let _ = sender.send(delivery);
            }
        }

        state.published.push(message);
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.state
            .write()
            .await
            .subscribers
            .insert(queue.to_string(), sender);

        let deliveries = stream::unfold(receiver, |mut receiver| async move {
            receiver
                .recv()
                .await
                .map(|delivery| (Ok(delivery), receiver))
        });
        Ok(Box::pin(deliveries))
    }
}
