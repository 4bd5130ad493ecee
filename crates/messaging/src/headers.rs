//! Transport-neutral message headers.

use std::collections::BTreeMap;
use std::time::Duration;

/// Number of times a message has been requeued after a handler failure.
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Delay in milliseconds the delayed exchange holds a message back.
pub const DELAY_HEADER: &str = "x-delay";

/// Exchange the message was first delivered from, set on the first retry.
pub const ORIGINAL_EXCHANGE_HEADER: &str = "x-original-exchange";

/// Routing key the message was first delivered with, set on the first retry.
pub const ORIGINAL_ROUTING_KEY_HEADER: &str = "x-original-routing-key";

/// A single header value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

/// Headers of an inbound or outbound message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageHeaders {
    values: BTreeMap<String, HeaderValue>,
}

impl MessageHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, replacing any previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<HeaderValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The `x-retry-count` of the message.
    ///
    /// Absent, non-integer or negative values count as 0, so a message
    /// published by a producer that knows nothing about retries starts a
    /// fresh budget.
    pub fn retry_count(&self) -> u32 {
        match self.values.get(RETRY_COUNT_HEADER) {
            Some(HeaderValue::Int(count)) if *count > 0 => {
                u32::try_from(*count).unwrap_or(u32::MAX)
            }
            _ => 0,
        }
    }

    /// Exchange of the first delivery, if the message was ever retried.
    pub fn original_exchange(&self) -> Option<&str> {
        self.string(ORIGINAL_EXCHANGE_HEADER)
    }

    /// Routing key of the first delivery, if the message was ever retried.
    pub fn original_routing_key(&self) -> Option<&str> {
        self.string(ORIGINAL_ROUTING_KEY_HEADER)
    }

    fn string(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(HeaderValue::String(value)) => Some(value),
            _ => None,
        }
    }

    /// Copy of these headers carrying a new retry count and delay.
    ///
    /// `exchange` and `routing_key` are where the current delivery came
    /// from. They are recorded as the original exchange and routing key
    /// unless an earlier retry already recorded them. Every other header is
    /// preserved.
    pub fn for_retry(
        &self,
        retry_count: u32,
        delay: Duration,
        exchange: &str,
        routing_key: &str,
    ) -> Self {
        let mut headers = self.clone();
        if headers.original_exchange().is_none() {
            headers.insert(ORIGINAL_EXCHANGE_HEADER, exchange);
        }
        if headers.original_routing_key().is_none() {
            headers.insert(ORIGINAL_ROUTING_KEY_HEADER, routing_key);
        }
        headers.insert(RETRY_COUNT_HEADER, i64::from(retry_count));
        headers.insert(
            DELAY_HEADER,
            i64::try_from(delay.as_millis()).unwrap_or(i64::MAX),
        );
        headers
    }
}

impl FromIterator<(String, HeaderValue)> for MessageHeaders {
    fn from_iter<I: IntoIterator<Item = (String, HeaderValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_retry_count_is_zero() {
        assert_eq!(MessageHeaders::new().retry_count(), 0);
    }

    #[test]
    fn malformed_retry_count_is_zero() {
        let mut headers = MessageHeaders::new();
        headers.insert(RETRY_COUNT_HEADER, "two");
        assert_eq!(headers.retry_count(), 0);

        headers.insert(RETRY_COUNT_HEADER, -4i64);
        assert_eq!(headers.retry_count(), 0);

        headers.insert(RETRY_COUNT_HEADER, HeaderValue::Float(1.0));
        assert_eq!(headers.retry_count(), 0);
    }

    #[test]
    fn integer_retry_count_is_read() {
        let mut headers = MessageHeaders::new();
        headers.insert(RETRY_COUNT_HEADER, 2i64);
        assert_eq!(headers.retry_count(), 2);
    }

    #[test]
    fn for_retry_preserves_other_headers() {
        let mut headers = MessageHeaders::new();
        headers.insert("x-origin", "catalog");
        headers.insert(RETRY_COUNT_HEADER, 1i64);

        let retried =
            headers.for_retry(2, Duration::from_millis(5000), "amq.direct", "videos.convert");

        assert_eq!(retried.retry_count(), 2);
        assert_eq!(retried.get(DELAY_HEADER), Some(&HeaderValue::Int(5000)));
        assert_eq!(retried.get("x-origin"), Some(&HeaderValue::from("catalog")));
        assert_eq!(headers.retry_count(), 1);
    }

    #[test]
    fn first_retry_records_origin_and_later_retries_keep_it() {
        let first = MessageHeaders::new().for_retry(
            1,
            Duration::from_millis(5000),
            "amq.direct",
            "videos.convert.result",
        );
        assert_eq!(first.original_exchange(), Some("amq.direct"));
        assert_eq!(first.original_routing_key(), Some("videos.convert.result"));

        let second = first.for_retry(
            2,
            Duration::from_millis(5000),
            "direct.delayed",
            "videos.convert.result",
        );
        assert_eq!(second.original_exchange(), Some("amq.direct"));
        assert_eq!(second.original_routing_key(), Some("videos.convert.result"));
    }
}
