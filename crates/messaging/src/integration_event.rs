use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The public, versioned form of a domain event sent to other services.
///
/// Serialized as the message body:
/// `{"event_name", "payload", "event_version", "occurred_on"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationEvent {
    pub event_name: String,
    pub payload: serde_json::Value,
    pub event_version: u32,
    pub occurred_on: DateTime<Utc>,
}

impl IntegrationEvent {
    /// JSON bytes of the event.
    pub fn to_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
