//! Domain events and the per-aggregate event buffer.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// Typed body of a domain event.
///
/// Implemented by the plain data structs each aggregate records. The name is
/// the routing key into the integration routing table, so it must be unique
/// across the whole catalog.
pub trait EventPayload: Serialize {
    /// Stable event name, past tense.
    const EVENT_NAME: &'static str;

    /// Schema version of the payload.
    const EVENT_VERSION: u32 = 1;
}

/// Something that happened to an aggregate.
///
/// Immutable once constructed: fields are only readable. The payload is the
/// JSON form of the typed [`EventPayload`] the aggregate recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    event_id: Uuid,
    aggregate_id: AggregateId,
    aggregate_type: String,
    event_name: String,
    event_version: u32,
    occurred_on: DateTime<Utc>,
    payload: serde_json::Value,
}

impl DomainEvent {
    /// Builds an event from a typed payload, stamping it with the current time.
    pub fn new<P: EventPayload>(
        aggregate_id: AggregateId,
        aggregate_type: &str,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event_id: Uuid::new_v4(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_name: P::EVENT_NAME.to_string(),
            event_version: P::EVENT_VERSION,
            occurred_on: Utc::now(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Unique id of this occurrence.
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    /// The aggregate the event belongs to.
    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    /// The aggregate type, e.g. `"Video"`.
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// The event name, e.g. `"VideoCreated"`.
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Payload schema version.
    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    /// When the event was recorded.
    pub fn occurred_on(&self) -> DateTime<Utc> {
        self.occurred_on
    }

    /// The raw JSON payload.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Deserializes the payload back into its typed form.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Returns true if this event carries the given payload type.
    pub fn is<P: EventPayload>(&self) -> bool {
        self.event_name == P::EVENT_NAME
    }
}

/// Pending domain events of one aggregate instance.
///
/// Lives only in process memory. Aggregates mark the field
/// `#[serde(skip)]` so the buffer never reaches the store, and only code in
/// this crate can append to it.
#[derive(Debug, Clone, Default)]
pub struct EventBuffer {
    pending: Vec<DomainEvent>,
}

impl EventBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record<P: EventPayload>(
        &mut self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        payload: &P,
    ) -> Result<(), serde_json::Error> {
        let event = DomainEvent::new(aggregate_id, aggregate_type, payload)?;
        self.pending.push(event);
        Ok(())
    }

    /// Pending events in the order they were recorded.
    pub fn peek(&self) -> &[DomainEvent] {
        &self.pending
    }

    /// Takes every pending event, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
