//! Aggregate root abstraction.

use common::AggregateId;

use crate::event::{DomainEvent, EventBuffer};

/// A consistency boundary that records domain events as a side channel.
///
/// The trait is object safe: a unit of work tracks every aggregate a command
/// touched as `Box<dyn AggregateRoot>` and drains their buffers after commit.
pub trait AggregateRoot: Send + Sync + std::fmt::Debug + 'static {
    /// Aggregate type name, e.g. `"Video"`.
    fn aggregate_type(&self) -> &'static str;

    /// Identifier of this instance.
    fn aggregate_id(&self) -> AggregateId;

    /// The in-memory event buffer.
    fn event_buffer(&self) -> &EventBuffer;

    /// Mutable access to the buffer, for draining.
    fn event_buffer_mut(&mut self) -> &mut EventBuffer;

    /// Events recorded since the last drain, without removing them.
    fn pending_events(&self) -> &[DomainEvent] {
        self.event_buffer().peek()
    }

    /// Returns the pending events and clears the buffer.
    ///
    /// Draining twice returns an empty list the second time.
    fn pull_events(&mut self) -> Vec<DomainEvent> {
        self.event_buffer_mut().drain()
    }
}
