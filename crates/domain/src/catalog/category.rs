//! Category aggregate.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateRoot;
use crate::error::{DomainError, FieldErrors};
use crate::event::EventBuffer;

use super::CategoryId;
use super::events::{CategoryCreated, CategoryDeleted};

const MAX_NAME_LENGTH: usize = 255;

/// Persisted shape of a [`Category`], without its event buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A category videos can be filed under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    id: CategoryId,
    name: String,
    description: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,

    #[serde(skip)]
    events: EventBuffer,
}

impl Category {
    /// Creates a category, recording `CategoryCreated`.
    pub fn create(
        name: impl Into<String>,
        description: Option<String>,
        is_active: bool,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        let mut errors = FieldErrors::new();
        if name.trim().is_empty() {
            errors.add("name", "must not be empty");
        } else if name.chars().count() > MAX_NAME_LENGTH {
            errors.add("name", format!("must be at most {MAX_NAME_LENGTH} characters"));
        }
        errors.into_result()?;

        let mut category = Self {
            id: CategoryId::new(),
            name,
            description,
            is_active,
            created_at: Utc::now(),
            events: EventBuffer::new(),
        };
        let created = CategoryCreated {
            category_id: category.id,
            name: category.name.clone(),
            is_active,
            created_at: category.created_at,
        };
        category.record(&created)?;
        Ok(category)
    }

    /// Marks the category as deleted, recording `CategoryDeleted`.
    ///
    /// The repository removes the row; the aggregate only reports the fact.
    pub fn mark_deleted(&mut self) -> Result<(), DomainError> {
        let deleted = CategoryDeleted {
            category_id: self.id,
        };
        self.record(&deleted)
    }

    /// Snapshot of the persistent state.
    pub fn to_record(&self) -> CategoryRecord {
        CategoryRecord {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            is_active: self.is_active,
            created_at: self.created_at,
        }
    }

    fn record<P: crate::event::EventPayload>(&mut self, payload: &P) -> Result<(), DomainError> {
        let aggregate_id = self.aggregate_id();
        self.events.record(aggregate_id, "Category", payload)?;
        Ok(())
    }

    pub fn id(&self) -> CategoryId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl From<CategoryRecord> for Category {
    fn from(record: CategoryRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            description: record.description,
            is_active: record.is_active,
            created_at: record.created_at,
            events: EventBuffer::new(),
        }
    }
}

impl AggregateRoot for Category {
    fn aggregate_type(&self) -> &'static str {
        "Category"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.id.into()
    }

    fn event_buffer(&self) -> &EventBuffer {
        &self.events
    }

    fn event_buffer_mut(&mut self) -> &mut EventBuffer {
        &mut self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;

    #[test]
    fn create_records_exactly_one_event() {
        let mut category = Category::create("Movies", None, true).unwrap();

        let events = category.pull_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name(), CategoryCreated::EVENT_NAME);
        let payload: CategoryCreated = events[0].payload_as().unwrap();
        assert_eq!(payload.category_id, category.id());
        assert_eq!(payload.name, "Movies");
    }

    #[test]
    fn create_rejects_blank_name() {
        let err = Category::create("  ", None, true).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn buffer_is_not_serialized() {
        let category = Category::create("Movies", Some("Feature films".into()), true).unwrap();
        let json = serde_json::to_value(&category).unwrap();
        assert!(json.get("events").is_none());

        let restored: Category = serde_json::from_value(json).unwrap();
        assert!(restored.pending_events().is_empty());
        assert_eq!(restored.description(), Some("Feature films"));
    }

    #[test]
    fn mark_deleted_records_deletion() {
        let mut category = Category::create("Movies", None, true).unwrap();
        category.pull_events();

        category.mark_deleted().unwrap();
        let events = category.pull_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_name(), CategoryDeleted::EVENT_NAME);
    }
}
