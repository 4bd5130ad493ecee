use std::sync::Arc;

use tracing::{debug, warn};

use crate::{BrokerError, MessageBroker, OutgoingMessage, RoutedEvent};

/// Publishes routed integration events as JSON messages.
#[derive(Clone)]
pub struct IntegrationEventPublisher {
    broker: Arc<dyn MessageBroker>,
}

impl IntegrationEventPublisher {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self { broker }
    }

    /// Sends one integration event.
    ///
    /// The body is the JSON form of the event; the correlation id is carried
    /// as a message property. There is no transaction with any store: a
    /// failure here leaves already committed state in place.
    #[tracing::instrument(
        skip(self, routed),
        fields(
            event_name = %routed.event.event_name,
            exchange = %routed.exchange,
            routing_key = %routed.routing_key,
        )
    )]
    pub async fn publish(&self, routed: &RoutedEvent) -> Result<(), BrokerError> {
        let mut message = OutgoingMessage::json(
            routed.exchange.clone(),
            routed.routing_key.clone(),
            routed.event.to_body()?,
        );
        message.correlation_id = Some(routed.correlation_id.to_string());

        match self.broker.publish(message).await {
            Ok(()) => {
                metrics::counter!("integration_events_published_total").increment(1);
                debug!("Integration event published");
                Ok(())
            }
            Err(e) => {
                metrics::counter!("integration_events_publish_failures_total").increment(1);
                warn!(error = %e, "Integration event publish failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::CorrelationId;
    use serde_json::json;

    use super::*;
    use crate::{IntegrationEvent, InMemoryBroker, broker::JSON_CONTENT_TYPE};

    fn routed() -> RoutedEvent {
        RoutedEvent {
            exchange: "amq.direct".to_string(),
            routing_key: "videos.convert".to_string(),
            event: IntegrationEvent {
                event_name: "VideoAudioMediaUploadedIntegrationEvent".to_string(),
                payload: json!({ "resource_id": "1.video", "file_path": "raw/1.mp4" }),
                event_version: 1,
                occurred_on: Utc::now(),
            },
            correlation_id: CorrelationId::from("evt-1"),
        }
    }

    #[tokio::test]
    async fn publishes_json_with_correlation_id() {
        let broker = Arc::new(InMemoryBroker::new());
        let publisher = IntegrationEventPublisher::new(broker.clone());
        let routed = routed();

        publisher.publish(&routed).await.unwrap();

        let published = broker.published().await;
        assert_eq!(published.len(), 1);
        let message = &published[0];
        assert_eq!(message.exchange, "amq.direct");
        assert_eq!(message.routing_key, "videos.convert");
        assert_eq!(message.content_type, JSON_CONTENT_TYPE);
        assert_eq!(message.correlation_id.as_deref(), Some("evt-1"));

        let body: IntegrationEvent = serde_json::from_slice(&message.body).unwrap();
        assert_eq!(body, routed.event);
    }

    #[tokio::test]
    async fn broker_failure_is_returned() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.fail_next_publishes(1).await;
        let publisher = IntegrationEventPublisher::new(broker.clone());

        let err = publisher.publish(&routed()).await.unwrap_err();

        assert!(matches!(err, BrokerError::Publish { .. }));
        assert_eq!(broker.publish_count().await, 0);
    }
}
