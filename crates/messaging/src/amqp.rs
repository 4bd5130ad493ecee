//! RabbitMQ client over `lapin`.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::acker::Acker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{debug, info};

use crate::{
    Acknowledger, BrokerError, Delivery, DeliveryStream, HeaderValue, MessageBroker,
    MessageHeaders, OutgoingMessage, Transport,
};

/// Persistent delivery mode.
const PERSISTENT: u8 = 2;

/// Queue and exchanges a consumer needs.
///
/// The delayed exchange uses the `x-delayed-message` type from the RabbitMQ
/// delayed message plugin, so a republished copy is held back for `x-delay`
/// milliseconds before it is routed to the queue again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub queue: String,
    /// `(exchange, routing_key)` pairs the queue receives from.
    pub bindings: Vec<(String, String)>,
    pub delayed_exchange: String,
    /// Where rejected messages go, if anywhere.
    pub dead_letter_exchange: Option<String>,
    pub prefetch: u16,
}

/// [`MessageBroker`] over one AMQP connection and channel.
///
/// Publisher confirms are enabled: `publish` returns once the broker has
/// taken responsibility for the message.
pub struct AmqpBroker {
    // Kept so the connection lives as long as the channel.
    _connection: Connection,
    channel: Channel,
}

impl AmqpBroker {
    pub async fn connect(uri: &str) -> Result<Self, BrokerError> {
        let connection = Connection::connect(uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        let channel = connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;

        info!("Connected to AMQP broker");
        Ok(Self {
            _connection: connection,
            channel,
        })
    }

    /// Declares the delayed exchange and the queue, and binds the queue to
    /// every routing key on both the source exchanges and the delayed one.
    pub async fn declare_topology(&self, topology: &QueueTopology) -> Result<(), BrokerError> {
        let mut exchange_args = FieldTable::default();
        exchange_args.insert(
            ShortString::from("x-delayed-type"),
            AMQPValue::LongString("direct".into()),
        );
        self.channel
            .exchange_declare(
                &topology.delayed_exchange,
                ExchangeKind::Custom("x-delayed-message".to_string()),
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                exchange_args,
            )
            .await?;

        let mut queue_args = FieldTable::default();
        if let Some(dlx) = &topology.dead_letter_exchange {
            queue_args.insert(
                ShortString::from("x-dead-letter-exchange"),
                AMQPValue::LongString(dlx.as_str().into()),
            );
        }
        self.channel
            .queue_declare(
                &topology.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_args,
            )
            .await?;

        for (exchange, routing_key) in &topology.bindings {
            for source in [exchange.as_str(), topology.delayed_exchange.as_str()] {
                self.channel
                    .queue_bind(
                        &topology.queue,
                        source,
                        routing_key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await?;
            }
        }

        self.channel
            .basic_qos(topology.prefetch, BasicQosOptions::default())
            .await?;

        debug!(queue = %topology.queue, "AMQP topology declared");
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for AmqpBroker {
    async fn publish(&self, message: OutgoingMessage) -> Result<(), BrokerError> {
        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from(message.content_type.as_str()))
            .with_delivery_mode(PERSISTENT)
            .with_headers(to_field_table(&message.headers));
        if let Some(correlation_id) = &message.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(correlation_id.as_str()));
        }

        let confirmation = self
            .channel
            .basic_publish(
                &message.exchange,
                &message.routing_key,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(BrokerError::Publish {
                exchange: message.exchange,
                routing_key: message.routing_key,
                reason: "broker returned a negative acknowledgement".to_string(),
            });
        }
        Ok(())
    }

    async fn subscribe(&self, queue: &str) -> Result<DeliveryStream, BrokerError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Subscribe {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        let deliveries = consumer.map(|result| result.map(into_delivery).map_err(BrokerError::from));
        Ok(Box::pin(deliveries))
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::Acknowledge(e.to_string()))
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.0
            .reject(BasicRejectOptions { requeue })
            .await
            .map_err(|e| BrokerError::Acknowledge(e.to_string()))
    }
}

fn into_delivery(delivery: lapin::message::Delivery) -> Delivery {
    let headers = delivery
        .properties
        .headers()
        .as_ref()
        .map(from_field_table)
        .unwrap_or_default();
    let correlation_id = delivery
        .properties
        .correlation_id()
        .as_ref()
        .map(|id| id.as_str().to_string());

    Delivery {
        exchange: delivery.exchange.as_str().to_string(),
        routing_key: delivery.routing_key.as_str().to_string(),
        headers,
        correlation_id,
        transport: Transport::Broker,
        body: delivery.data,
        acker: Arc::new(AmqpAcker(delivery.acker)),
    }
}

fn to_field_table(headers: &MessageHeaders) -> FieldTable {
    let mut table = FieldTable::default();
    for (name, value) in headers.iter() {
        let value = match value {
            HeaderValue::Int(v) => AMQPValue::LongLongInt(*v),
            HeaderValue::Float(v) => AMQPValue::Double(*v),
            HeaderValue::Bool(v) => AMQPValue::Boolean(*v),
            HeaderValue::String(v) => AMQPValue::LongString(v.as_str().into()),
        };
        table.insert(ShortString::from(name), value);
    }
    table
}

fn from_field_table(table: &FieldTable) -> MessageHeaders {
    table
        .inner()
        .iter()
        .filter_map(|(name, value)| {
            header_value(value).map(|value| (name.as_str().to_string(), value))
        })
        .collect()
}

/// Integer widths collapse to `Int`; nested tables and arrays are skipped.
fn header_value(value: &AMQPValue) -> Option<HeaderValue> {
    let value = match value {
        AMQPValue::ShortShortInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::ShortUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongUInt(v) => HeaderValue::Int(i64::from(*v)),
        AMQPValue::LongLongInt(v) => HeaderValue::Int(*v),
        AMQPValue::Float(v) => HeaderValue::Float(f64::from(*v)),
        AMQPValue::Double(v) => HeaderValue::Float(*v),
        AMQPValue::Boolean(v) => HeaderValue::Bool(*v),
        AMQPValue::ShortString(v) => HeaderValue::String(v.as_str().to_string()),
        AMQPValue::LongString(v) => {
            HeaderValue::String(String::from_utf8_lossy(v.as_bytes()).into_owned())
        }
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{DELAY_HEADER, RETRY_COUNT_HEADER};

    #[test]
    fn retry_headers_survive_the_wire_format() {
        let mut headers = MessageHeaders::new();
        headers.insert("x-origin", "catalog");
        let headers = headers.for_retry(
            2,
            Duration::from_millis(5000),
            "amq.direct",
            "videos.convert.result",
        );

        let decoded = from_field_table(&to_field_table(&headers));

        assert_eq!(decoded, headers);
        assert_eq!(decoded.retry_count(), 2);
        assert_eq!(decoded.original_exchange(), Some("amq.direct"));
    }

    #[test]
    fn narrow_integers_read_as_retry_count() {
        let mut table = FieldTable::default();
        table.insert(ShortString::from(RETRY_COUNT_HEADER), AMQPValue::ShortInt(3));
        table.insert(ShortString::from(DELAY_HEADER), AMQPValue::LongUInt(5000));

        let headers = from_field_table(&table);

        assert_eq!(headers.retry_count(), 3);
        assert_eq!(headers.get(DELAY_HEADER), Some(&HeaderValue::Int(5000)));
    }

    #[test]
    fn unsupported_values_are_skipped() {
        let mut table = FieldTable::default();
        table.insert(ShortString::from("x-nested"), AMQPValue::FieldTable(FieldTable::default()));

        assert!(from_field_table(&table).is_empty());
    }
}
