use std::future::Future;

use futures_util::StreamExt;
use tracing::{error, info, warn};

use crate::{ConsumeError, Delivery, DeliveryStream, Disposition, MessageHandler, RetryFilter};

/// Runs a [`MessageHandler`] over a stream of deliveries.
///
/// Success acks the delivery; failure goes to the [`RetryFilter`]. The
/// consumer never waits out a retry delay itself.
pub struct MessageConsumer<H> {
    handler: H,
    retry: RetryFilter,
}

impl<H: MessageHandler> MessageConsumer<H> {
    pub fn new(handler: H, retry: RetryFilter) -> Self {
        Self { handler, retry }
    }

    /// Handles and settles a single delivery.
    pub async fn process(&self, delivery: Delivery) -> Result<Disposition, ConsumeError> {
        let result = self.handler.handle(&delivery).await;

        let disposition = match result {
            Ok(()) => {
                delivery
                    .acker
                    .ack()
                    .await
                    .map_err(ConsumeError::Acknowledge)?;
                Disposition::Acked
            }
            Err(e) => self.retry.handle(&delivery, e).await?,
        };

        let outcome = match disposition {
            Disposition::Acked => "acked",
            Disposition::Dropped(_) => "dropped",
            Disposition::Requeued { .. } => "requeued",
        };
        metrics::counter!("messages_consumed_total", "outcome" => outcome).increment(1);
        Ok(disposition)
    }

    /// Consumes until `shutdown` resolves or the stream ends.
    pub async fn run(&self, mut deliveries: DeliveryStream, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!("Consumer started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Consumer shutting down");
                    break;
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        if let Err(e) = self.process(delivery).await {
                            error!(error = %e, "Failed to settle delivery");
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "Delivery stream error"),
                    None => {
                        info!("Delivery stream closed");
                        break;
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{AckOutcome, BrokerError, HandlerError, InMemoryBroker, RecordingAcker, Transport};

    struct CountingHandler {
        calls: AtomicUsize,
        fail_with: Option<HandlerError>,
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _delivery: &Delivery) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.fail_with {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    fn broker_delivery(acker: &RecordingAcker) -> Delivery {
        let mut delivery = Delivery::direct("videos.convert", b"{}".to_vec());
        delivery.transport = Transport::Broker;
        delivery.acker = Arc::new(acker.clone());
        delivery
    }

    fn consumer(fail_with: Option<HandlerError>) -> MessageConsumer<CountingHandler> {
        MessageConsumer::new(
            CountingHandler {
                calls: AtomicUsize::new(0),
                fail_with,
            },
            RetryFilter::new(Arc::new(InMemoryBroker::new())),
        )
    }

    #[tokio::test]
    async fn success_acks() {
        let acker = RecordingAcker::new();
        let disposition = consumer(None)
            .process(broker_delivery(&acker))
            .await
            .unwrap();

        assert_eq!(disposition, Disposition::Acked);
        assert_eq!(acker.outcomes().await, vec![AckOutcome::Acked]);
    }

    #[tokio::test]
    async fn direct_failure_passes_error_through() {
        let error = HandlerError::internal("boom");
        let result = consumer(Some(error.clone()))
            .process(Delivery::direct("videos.convert", Vec::new()))
            .await;

        assert!(matches!(result, Err(ConsumeError::Handler(e)) if e == error));
    }

    #[tokio::test]
    async fn run_drains_stream_until_it_ends() {
        let acker = RecordingAcker::new();
        let deliveries: DeliveryStream = Box::pin(futures_util::stream::iter(vec![
            Ok::<_, BrokerError>(broker_delivery(&acker)),
            Ok(broker_delivery(&acker)),
        ]));

        let consumer = consumer(None);
        consumer.run(deliveries, std::future::pending()).await;

        assert_eq!(consumer.handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(acker.outcomes().await.len(), 2);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let deliveries: DeliveryStream = Box::pin(futures_util::stream::pending::<Result<Delivery, BrokerError>>());

        let consumer = consumer(None);
        consumer.run(deliveries, async {}).await;

        assert_eq!(consumer.handler.calls.load(Ordering::SeqCst), 0);
    }
}
