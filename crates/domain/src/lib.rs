//! Domain layer of the video catalog.
//!
//! This crate provides:
//! - [`DomainEvent`], the immutable record of a state change
//! - [`EventBuffer`], the per-aggregate side channel of pending events
//! - [`AggregateRoot`], the object-safe trait a unit of work tracks
//! - The `Category` and `Video` aggregates

pub mod aggregate;
pub mod catalog;
pub mod error;
pub mod event;

pub use aggregate::AggregateRoot;
pub use catalog::{
    AudioVideoMedia, Category, CategoryId, CategoryRecord, MediaKind, MediaStatus, NewVideo, Video,
    VideoId, VideoRecord,
};
pub use error::{DomainError, FieldErrors};
pub use event::{DomainEvent, EventBuffer, EventPayload};
