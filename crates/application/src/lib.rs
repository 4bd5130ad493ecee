//! Application layer of the video catalog.
//!
//! This crate provides:
//! - [`ApplicationService`], which runs each command in its own unit of work
//!   and publishes the resulting integration events only after commit
//! - [`DomainEventMediator`] for in-process reactions inside the transaction
//! - The catalog use cases and the encoder result consumer
//!
//! # Delivery guarantees
//!
//! Publishing happens after the database commit and outside it. If the
//! broker is unreachable at that moment the command still succeeds and the
//! event is handled by the configured [`PublishFailurePolicy`]:
//!
//! - `Log` drops it, so the event is lost;
//! - `DeadLetterLocally` keeps it in process memory until
//!   [`ApplicationService::redeliver_dead_letters`] runs, and loses it if
//!   the process exits first;
//! - `Retry` tries again a few times before giving up.
//!
//! There is no transactional outbox. Downstream, redelivery and the retry
//! filter make consumption at-least-once, so consumers must be idempotent.

pub mod catalog;
pub mod error;
pub mod mediator;
pub mod service;

pub use catalog::{
    CreateCategory, CreateVideo, DeleteCategory, DeleteVideo, MediaConversion,
    MediaConversionHandler, ProcessAudioVideoMedia, ReplaceVideoCategories, UploadAudioVideoMedia,
    catalog_routing_table,
};
pub use error::{ApplicationError, Result};
pub use mediator::{DomainEventHandler, DomainEventMediator};
pub use service::{
    ApplicationService, DeadLetter, LocalDeadLetters, PublishFailurePolicy, UseCase,
};
