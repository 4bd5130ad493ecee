//! Consume-side retry behaviour against the in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use messaging::{
    AckOutcome, ConsumeError, DELAY_HEADER, Delivery, Disposition, DropReason, ErrorKind,
    HandlerError, HeaderValue, InMemoryBroker, MessageBroker, MessageConsumer, MessageHandler,
    MessageHeaders, ORIGINAL_EXCHANGE_HEADER, ORIGINAL_ROUTING_KEY_HEADER, RETRY_COUNT_HEADER,
    RecordingAcker, RetryFilter, RetryPolicy, Transport,
};

const QUEUE: &str = "videos.convert.queue";
const ROUTING_KEY: &str = "videos.convert";

fn delivery_with_count(retry_count: Option<i64>, acker: &RecordingAcker) -> Delivery {
    let mut headers = MessageHeaders::new();
    headers.insert("x-origin", "catalog");
    if let Some(count) = retry_count {
        headers.insert(RETRY_COUNT_HEADER, count);
    }

    let mut delivery = Delivery::direct(ROUTING_KEY, br#"{"video":{}}"#.to_vec());
    delivery.exchange = "amq.direct".to_string();
    delivery.transport = Transport::Broker;
    delivery.headers = headers;
    delivery.correlation_id = Some("evt-42".to_string());
    delivery.acker = Arc::new(acker.clone());
    delivery
}

fn filter(broker: &Arc<InMemoryBroker>) -> RetryFilter {
    RetryFilter::new(broker.clone()).with_policy(
        RetryPolicy::builder()
            .max_retries(3)
            .fixed_delay(Duration::from_millis(5000))
            .build(),
    )
}

#[tokio::test]
async fn retryable_failure_is_republished_with_incremented_count() {
    let broker = Arc::new(InMemoryBroker::new());
    let acker = RecordingAcker::new();
    let delivery = delivery_with_count(Some(1), &acker);

    let disposition = filter(&broker)
        .handle(&delivery, HandlerError::internal("storage unavailable"))
        .await
        .unwrap();

    assert_eq!(
        disposition,
        Disposition::Requeued {
            retry_count: 2,
            delay: Duration::from_millis(5000),
        }
    );

    let published = broker.published().await;
    assert_eq!(published.len(), 1);
    let copy = &published[0];
    assert_eq!(copy.exchange, RetryFilter::DEFAULT_DELAYED_EXCHANGE);
    assert_eq!(copy.routing_key, ROUTING_KEY);
    assert_eq!(copy.body, delivery.body);
    assert_eq!(copy.correlation_id.as_deref(), Some("evt-42"));
    assert_eq!(copy.headers.get(RETRY_COUNT_HEADER), Some(&HeaderValue::Int(2)));
    assert_eq!(copy.headers.get(DELAY_HEADER), Some(&HeaderValue::Int(5000)));
    assert_eq!(
        copy.headers.get("x-origin"),
        Some(&HeaderValue::String("catalog".to_string()))
    );
    assert_eq!(
        copy.headers.get(ORIGINAL_EXCHANGE_HEADER),
        Some(&HeaderValue::from("amq.direct"))
    );
    assert_eq!(
        copy.headers.get(ORIGINAL_ROUTING_KEY_HEADER),
        Some(&HeaderValue::from(ROUTING_KEY))
    );

    assert_eq!(acker.outcomes().await, vec![AckOutcome::Acked]);
}

#[tokio::test]
async fn missing_header_counts_as_zero() {
    let broker = Arc::new(InMemoryBroker::new());
    let acker = RecordingAcker::new();

    let disposition = filter(&broker)
        .handle(
            &delivery_with_count(None, &acker),
            HandlerError::internal("boom"),
        )
        .await
        .unwrap();

    assert!(matches!(disposition, Disposition::Requeued { retry_count: 1, .. }));
    let published = broker.published().await;
    assert_eq!(published[0].headers.retry_count(), 1);
}

#[tokio::test]
async fn exhausted_retries_reject_without_republish() {
    let broker = Arc::new(InMemoryBroker::new());
    let acker = RecordingAcker::new();

    let disposition = filter(&broker)
        .handle(
            &delivery_with_count(Some(3), &acker),
            HandlerError::internal("boom"),
        )
        .await
        .unwrap();

    assert_eq!(disposition, Disposition::Dropped(DropReason::RetriesExhausted));
    assert_eq!(broker.publish_count().await, 0);
    assert_eq!(
        acker.outcomes().await,
        vec![AckOutcome::Rejected { requeue: false }]
    );
}

#[tokio::test]
async fn non_retryable_failure_is_dropped_on_first_attempt() {
    let broker = Arc::new(InMemoryBroker::new());

    for kind in [
        ErrorKind::Validation,
        ErrorKind::NotFound,
        ErrorKind::MalformedMessage,
    ] {
        let acker = RecordingAcker::new();
        let disposition = filter(&broker)
            .handle(
                &delivery_with_count(Some(0), &acker),
                HandlerError::new(kind, "will never succeed"),
            )
            .await
            .unwrap();

        assert_eq!(disposition, Disposition::Dropped(DropReason::NonRetryable));
        assert_eq!(
            acker.outcomes().await,
            vec![AckOutcome::Rejected { requeue: false }]
        );
    }
    assert_eq!(broker.publish_count().await, 0);
}

#[tokio::test]
async fn direct_transport_returns_the_original_error() {
    let broker = Arc::new(InMemoryBroker::new());
    let error = HandlerError::internal("boom");

    let result = filter(&broker)
        .handle(&Delivery::direct(ROUTING_KEY, Vec::new()), error.clone())
        .await;

    assert!(matches!(result, Err(ConsumeError::Handler(e)) if e == error));
    assert_eq!(broker.publish_count().await, 0);
}

#[tokio::test]
async fn failed_republish_returns_message_to_queue() {
    let broker = Arc::new(InMemoryBroker::new());
    broker.fail_next_publishes(1).await;
    let acker = RecordingAcker::new();

    let result = filter(&broker)
        .handle(
            &delivery_with_count(Some(1), &acker),
            HandlerError::internal("boom"),
        )
        .await;

    assert!(matches!(result, Err(ConsumeError::RequeueFailed(_))));
    assert_eq!(
        acker.outcomes().await,
        vec![AckOutcome::Rejected { requeue: true }]
    );
}

struct AlwaysFailing;

#[async_trait]
impl MessageHandler for AlwaysFailing {
    async fn handle(&self, _delivery: &Delivery) -> Result<(), HandlerError> {
        Err(HandlerError::new(ErrorKind::Unavailable, "encoder offline"))
    }
}

#[tokio::test]
async fn poison_message_stops_after_max_retries() {
    let broker = Arc::new(InMemoryBroker::new());
    broker
        .bind(RetryFilter::DEFAULT_DELAYED_EXCHANGE, ROUTING_KEY, QUEUE)
        .await;
    let mut deliveries = broker.subscribe(QUEUE).await.unwrap();
    let consumer = MessageConsumer::new(AlwaysFailing, filter(&broker));

    let first_acker = RecordingAcker::new();
    let mut disposition = consumer
        .process(delivery_with_count(None, &first_acker))
        .await
        .unwrap();
    let mut attempts = 1;

    while let Disposition::Requeued { .. } = disposition {
        let redelivered = deliveries.next().await.unwrap().unwrap();
        assert_eq!(redelivered.exchange, RetryFilter::DEFAULT_DELAYED_EXCHANGE);
        assert_eq!(redelivered.headers.original_exchange(), Some("amq.direct"));
        assert_eq!(redelivered.headers.original_routing_key(), Some(ROUTING_KEY));
        disposition = consumer.process(redelivered).await.unwrap();
        attempts += 1;
    }

    assert_eq!(attempts, 4);
    assert_eq!(disposition, Disposition::Dropped(DropReason::RetriesExhausted));
    assert_eq!(broker.publish_count().await, 3);
    let counts: Vec<u32> = broker
        .published()
        .await
        .iter()
        .map(|message| message.headers.retry_count())
        .collect();
    assert_eq!(counts, vec![1, 2, 3]);
}
