//! Routing of domain events to integration events.
//!
//! The [`RoutingTable`] is built once at startup and shared behind an
//! `Arc`. Every event name an aggregate can record must have an entry:
//! either a published route or an explicit internal-only marker.
//! [`RoutingTable::ensure_covers`] checks this before the service accepts
//! traffic, so an unrouted event is a startup failure rather than a silent
//! drop at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use common::CorrelationId;
use domain::DomainEvent;
use serde_json::Value;

use crate::{ConfigurationError, IntegrationEvent, TranslationError};

/// Builds the public payload of an integration event from a domain event.
pub type PayloadMapper = fn(&DomainEvent) -> Result<Value, TranslationError>;

/// Where one domain event goes.
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Published to `exchange` with `routing_key` as `integration_name`.
    Publish {
        exchange: String,
        routing_key: String,
        integration_name: String,
        mapper: PayloadMapper,
    },
    /// Delivered to in-process handlers only, never published.
    InternalOnly,
}

/// Immutable `event_name -> EventRoute` map.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<String, EventRoute>,
}

impl RoutingTable {
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder::default()
    }

    pub fn route(&self, event_name: &str) -> Option<&EventRoute> {
        self.routes.get(event_name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Fails with the first event name that has no route.
    pub fn ensure_covers<'a>(
        &self,
        event_names: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ConfigurationError> {
        for name in event_names {
            if !self.routes.contains_key(name) {
                return Err(ConfigurationError::UnroutedEvent(name.to_string()));
            }
        }
        Ok(())
    }
}

/// Builder for [`RoutingTable`].
#[derive(Debug, Default)]
pub struct RoutingTableBuilder {
    routes: Vec<(String, EventRoute)>,
}

impl RoutingTableBuilder {
    /// Publishes `event_name` under `integration_name`.
    #[must_use]
    pub fn publish(
        mut self,
        event_name: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        integration_name: impl Into<String>,
        mapper: PayloadMapper,
    ) -> Self {
        self.routes.push((
            event_name.into(),
            EventRoute::Publish {
                exchange: exchange.into(),
                routing_key: routing_key.into(),
                integration_name: integration_name.into(),
                mapper,
            },
        ));
        self
    }

    /// Keeps `event_name` in-process.
    #[must_use]
    pub fn internal(mut self, event_name: impl Into<String>) -> Self {
        self.routes
            .push((event_name.into(), EventRoute::InternalOnly));
        self
    }

    pub fn build(self) -> Result<RoutingTable, ConfigurationError> {
        let mut routes = HashMap::with_capacity(self.routes.len());
        for (name, route) in self.routes {
            if routes.contains_key(&name) {
                return Err(ConfigurationError::DuplicateRoute(name));
            }
            routes.insert(name, route);
        }
        Ok(RoutingTable { routes })
    }
}

/// An integration event with its destination.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub exchange: String,
    pub routing_key: String,
    pub event: IntegrationEvent,
    /// Id of the domain event this was translated from.
    pub correlation_id: CorrelationId,
}

/// Result of translating one domain event.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Publish(RoutedEvent),
    InternalOnly,
}

/// Translates domain events through a shared [`RoutingTable`].
#[derive(Debug, Clone)]
pub struct EventTranslator {
    table: Arc<RoutingTable>,
}

impl EventTranslator {
    pub fn new(table: Arc<RoutingTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Pure mapping from a domain event to its integration form.
    pub fn translate(&self, event: &DomainEvent) -> Result<Translation, TranslationError> {
        let route = self
            .table
            .route(event.event_name())
            .ok_or_else(|| TranslationError::UnroutedEvent(event.event_name().to_string()))?;

        match route {
            EventRoute::InternalOnly => Ok(Translation::InternalOnly),
            EventRoute::Publish {
                exchange,
                routing_key,
                integration_name,
                mapper,
            } => Ok(Translation::Publish(RoutedEvent {
                exchange: exchange.clone(),
                routing_key: routing_key.clone(),
                event: IntegrationEvent {
                    event_name: integration_name.clone(),
                    payload: mapper(event)?,
                    event_version: event.event_version(),
                    occurred_on: event.occurred_on(),
                },
                correlation_id: CorrelationId::from(event.event_id().to_string()),
            })),
        }
    }
}

/// Mapper that publishes the domain payload as is.
pub fn passthrough(event: &DomainEvent) -> Result<Value, TranslationError> {
    Ok(event.payload().clone())
}
