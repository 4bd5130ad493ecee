//! In-process dispatch of domain events before commit.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{AggregateRoot, DomainEvent};
use tracing::debug;

use crate::Result;

/// Reacts to domain events inside the command that raised them.
///
/// Handlers run after the use case and before commit. An error aborts the
/// whole command: the transaction is rolled back and nothing is published.
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Returns true if this handler wants events named `event_name`.
    fn handles(&self, event_name: &str) -> bool;

    async fn handle(&self, event: &DomainEvent) -> Result<()>;
}

/// Ordered set of [`DomainEventHandler`]s.
#[derive(Clone, Default)]
pub struct DomainEventMediator {
    handlers: Vec<Arc<dyn DomainEventHandler>>,
}

impl DomainEventMediator {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register(mut self, handler: Arc<dyn DomainEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs every interested handler on the pending events of each
    /// aggregate, in tracking order then record order.
    ///
    /// Events are peeked, not drained: they are still published after
    /// commit.
    pub async fn dispatch(&self, aggregates: &[Box<dyn AggregateRoot>]) -> Result<()> {
        if self.handlers.is_empty() {
            return Ok(());
        }

        for aggregate in aggregates {
            for event in aggregate.pending_events() {
                for handler in &self.handlers {
                    if handler.handles(event.event_name()) {
                        debug!(
                            handler = handler.name(),
                            event_name = event.event_name(),
                            aggregate_id = %event.aggregate_id(),
                            "Dispatching domain event"
                        );
                        handler.handle(event).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DomainEventMediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.handlers.iter().map(|h| h.name()).collect();
        f.debug_struct("DomainEventMediator")
            .field("handlers", &names)
            .finish()
    }
}
