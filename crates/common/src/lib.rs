//! Shared identifier types used across the catalog crates.

mod types;

pub use types::{AggregateId, CorrelationId, ParseIdError};
