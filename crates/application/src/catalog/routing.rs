//! Integration routing of catalog events.

use domain::catalog::events::{
    CategoryCreated, CategoryDeleted, EVENT_NAMES, VideoAudioMediaProcessed,
    VideoAudioMediaReplaced, VideoCategoriesReplaced, VideoCreated, VideoDeleted,
};
use domain::{DomainEvent, EventPayload};
use messaging::{ConfigurationError, RoutingTable, TranslationError};
use serde_json::{Value, json};

/// Exchange the encoder listens on.
pub const VIDEOS_CONVERT_EXCHANGE: &str = "amq.direct";
pub const VIDEOS_CONVERT_ROUTING_KEY: &str = "videos.convert";
pub const MEDIA_UPLOADED_EVENT: &str = "VideoAudioMediaUploadedIntegrationEvent";

/// The routing table of the catalog service.
///
/// Only `VideoAudioMediaReplaced` leaves the process. Fails if any event a
/// catalog aggregate can record is left without a route.
pub fn catalog_routing_table() -> Result<RoutingTable, ConfigurationError> {
    let table = RoutingTable::builder()
        .publish(
            VideoAudioMediaReplaced::EVENT_NAME,
            VIDEOS_CONVERT_EXCHANGE,
            VIDEOS_CONVERT_ROUTING_KEY,
            MEDIA_UPLOADED_EVENT,
            media_uploaded_payload,
        )
        .internal(CategoryCreated::EVENT_NAME)
        .internal(CategoryDeleted::EVENT_NAME)
        .internal(VideoCreated::EVENT_NAME)
        .internal(VideoCategoriesReplaced::EVENT_NAME)
        .internal(VideoAudioMediaProcessed::EVENT_NAME)
        .internal(VideoDeleted::EVENT_NAME)
        .build()?;

    table.ensure_covers(EVENT_NAMES.iter().copied())?;
    Ok(table)
}

/// `{resource_id: "<video_id>.<kind>", file_path: <raw location>}`
fn media_uploaded_payload(event: &DomainEvent) -> Result<Value, TranslationError> {
    let replaced: VideoAudioMediaReplaced = event
        .payload_as()
        .map_err(|e| TranslationError::mapping(event.event_name(), e))?;

    Ok(json!({
        "resource_id": format!("{}.{}", replaced.video_id, replaced.media_kind),
        "file_path": replaced.media.raw_location(),
    }))
}
