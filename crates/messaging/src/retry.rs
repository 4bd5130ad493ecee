//! Consume-side error classification and delayed requeue.
//!
//! When a handler fails on a broker delivery the [`RetryFilter`] either
//! drops the message or republishes it to a delay-capable exchange:
//!
//! ```text
//! handler error
//!   ├─ non-retryable kind ─────────────────────► reject (dead letter)
//!   ├─ retryable, x-retry-count < max ─────────► republish to delayed exchange
//!   │                                            with x-retry-count + 1, then ack
//!   └─ retryable, x-retry-count >= max ────────► reject (poison message)
//! ```
//!
//! The consumer never sleeps: the delayed exchange holds the copy back for
//! `x-delay` milliseconds before routing it to the queue again.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::broker::JSON_CONTENT_TYPE;
use crate::{
    ConsumeError, Delivery, ErrorKind, HandlerError, MessageBroker, OutgoingMessage, Transport,
};

/// Delay applied before each redelivery.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Same delay for every retry.
    Fixed(Duration),
    /// `initial * multiplier^(retry - 1)`, capped at `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Fixed(Duration::from_millis(5000))
    }
}

impl BackoffStrategy {
    /// Delay before redelivery number `retry_count`, counting from 1.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed(delay) => *delay,
            BackoffStrategy::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exponent = i32::try_from(retry_count.saturating_sub(1)).unwrap_or(i32::MAX);
                let delay_ms = initial.as_millis() as f64 * multiplier.powi(exponent);
                let delay = Duration::from_millis(delay_ms.min(max.as_millis() as f64) as u64);
                delay.min(*max)
            }
        }
    }
}

/// How many times a message may be requeued and how long each wait is.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `backoff`: fixed 5000 ms
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: RetryPolicy::default(),
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn fixed_delay(mut self, delay: Duration) -> Self {
        self.policy.backoff = BackoffStrategy::Fixed(delay);
        self
    }

    #[must_use]
    pub fn exponential(mut self, initial: Duration, multiplier: f64, max: Duration) -> Self {
        self.policy.backoff = BackoffStrategy::Exponential {
            initial,
            multiplier,
            max,
        };
        self
    }

    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Decides which handler errors are worth retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassifier {
    non_retryable: BTreeSet<ErrorKind>,
}

impl Default for ErrorClassifier {
    /// Validation failures, missing entities and malformed messages will
    /// fail the same way every time.
    fn default() -> Self {
        Self::new([
            ErrorKind::Validation,
            ErrorKind::NotFound,
            ErrorKind::MalformedMessage,
        ])
    }
}

impl ErrorClassifier {
    pub fn new(non_retryable: impl IntoIterator<Item = ErrorKind>) -> Self {
        Self {
            non_retryable: non_retryable.into_iter().collect(),
        }
    }

    pub fn is_retryable(&self, error: &HandlerError) -> bool {
        !self.non_retryable.contains(&error.kind)
    }
}

/// Why a message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NonRetryable,
    RetriesExhausted,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::NonRetryable => "non_retryable",
            DropReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// What happened to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Handled successfully and acked.
    Acked,
    /// Rejected without requeue.
    Dropped(DropReason),
    /// Republished to the delayed exchange, original acked.
    Requeued { retry_count: u32, delay: Duration },
}

/// Turns handler errors on broker deliveries into drop or delayed requeue.
#[derive(Clone)]
pub struct RetryFilter {
    broker: Arc<dyn MessageBroker>,
    classifier: ErrorClassifier,
    policy: RetryPolicy,
    delayed_exchange: String,
}

impl RetryFilter {
    /// Exchange declared with the delayed message exchange type.
    pub const DEFAULT_DELAYED_EXCHANGE: &'static str = "direct.delayed";

    /// A filter with the default classifier, policy and delayed exchange.
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            broker,
            classifier: ErrorClassifier::default(),
            policy: RetryPolicy::default(),
            delayed_exchange: Self::DEFAULT_DELAYED_EXCHANGE.to_string(),
        }
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_delayed_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.delayed_exchange = exchange.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The disposition for an error on a message already retried
    /// `retry_count` times. Never returns [`Disposition::Acked`].
    pub fn decide(&self, error: &HandlerError, retry_count: u32) -> Disposition {
        if !self.classifier.is_retryable(error) {
            return Disposition::Dropped(DropReason::NonRetryable);
        }
        if retry_count < self.policy.max_retries {
            let next = retry_count + 1;
            return Disposition::Requeued {
                retry_count: next,
                delay: self.policy.backoff.delay_for(next),
            };
        }
        Disposition::Dropped(DropReason::RetriesExhausted)
    }

    /// Settles a delivery whose handler failed.
    ///
    /// Deliveries that did not come from a broker are not settled: the
    /// original error is returned as [`ConsumeError::Handler`]. If the
    /// republish fails the delivery is rejected with requeue, so the broker
    /// redelivers it and nothing is lost.
    #[tracing::instrument(
        skip(self, delivery, error),
        fields(routing_key = %delivery.routing_key, error_kind = %error.kind)
    )]
    pub async fn handle(
        &self,
        delivery: &Delivery,
        error: HandlerError,
    ) -> Result<Disposition, ConsumeError> {
        if delivery.transport == Transport::Direct {
            return Err(ConsumeError::Handler(error));
        }

        let retry_count = delivery.headers.retry_count();
        let disposition = self.decide(&error, retry_count);

        match disposition {
            Disposition::Requeued {
                retry_count: next,
                delay,
            } => {
                let message = OutgoingMessage {
                    exchange: self.delayed_exchange.clone(),
                    routing_key: delivery.routing_key.clone(),
                    body: delivery.body.clone(),
                    content_type: JSON_CONTENT_TYPE.to_string(),
                    headers: delivery.headers.for_retry(
                        next,
                        delay,
                        &delivery.exchange,
                        &delivery.routing_key,
                    ),
                    correlation_id: delivery.correlation_id.clone(),
                };

                if let Err(e) = self.broker.publish(message).await {
                    error!(error = %e, retry_count, "Requeue failed, returning message to the queue");
                    delivery
                        .acker
                        .reject(true)
                        .await
                        .map_err(ConsumeError::Acknowledge)?;
                    return Err(ConsumeError::RequeueFailed(e));
                }
                delivery.acker.ack().await.map_err(ConsumeError::Acknowledge)?;

                metrics::counter!("messages_requeued_total").increment(1);
                info!(
                    error = %error,
                    retry_count = next,
                    delay_ms = delay.as_millis() as u64,
                    "Message requeued"
                );
            }
            Disposition::Dropped(reason) => {
                delivery
                    .acker
                    .reject(false)
                    .await
                    .map_err(ConsumeError::Acknowledge)?;

                metrics::counter!("messages_dropped_total", "reason" => reason.as_str())
                    .increment(1);
                warn!(
                    error = %error,
                    retry_count,
                    reason = reason.as_str(),
                    "Message dropped"
                );
            }
            Disposition::Acked => {}
        }

        Ok(disposition)
    }
}
