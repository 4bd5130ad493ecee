//! Catalog domain event payloads.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventPayload;

use super::{AudioVideoMedia, CategoryId, MediaKind, MediaStatus, VideoId};

/// Every event name the catalog aggregates can record.
///
/// The integration routing table must cover all of them.
pub const EVENT_NAMES: &[&str] = &[
    CategoryCreated::EVENT_NAME,
    CategoryDeleted::EVENT_NAME,
    VideoCreated::EVENT_NAME,
    VideoCategoriesReplaced::EVENT_NAME,
    VideoAudioMediaReplaced::EVENT_NAME,
    VideoAudioMediaProcessed::EVENT_NAME,
    VideoDeleted::EVENT_NAME,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCreated {
    pub category_id: CategoryId,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl EventPayload for CategoryCreated {
    const EVENT_NAME: &'static str = "CategoryCreated";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDeleted {
    pub category_id: CategoryId,
}

impl EventPayload for CategoryDeleted {
    const EVENT_NAME: &'static str = "CategoryDeleted";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoCreated {
    pub video_id: VideoId,
    pub title: String,
    pub year_launched: u16,
    pub duration: u32,
    pub category_ids: BTreeSet<CategoryId>,
    pub created_at: DateTime<Utc>,
}

impl EventPayload for VideoCreated {
    const EVENT_NAME: &'static str = "VideoCreated";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoCategoriesReplaced {
    pub video_id: VideoId,
    pub category_ids: BTreeSet<CategoryId>,
}

impl EventPayload for VideoCategoriesReplaced {
    const EVENT_NAME: &'static str = "VideoCategoriesReplaced";
}

/// A new trailer or video file replaced the previous one and awaits encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAudioMediaReplaced {
    pub video_id: VideoId,
    pub media_kind: MediaKind,
    pub media: AudioVideoMedia,
}

impl EventPayload for VideoAudioMediaReplaced {
    const EVENT_NAME: &'static str = "VideoAudioMediaReplaced";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoAudioMediaProcessed {
    pub video_id: VideoId,
    pub media_kind: MediaKind,
    pub status: MediaStatus,
    pub encoded_location: Option<String>,
}

impl EventPayload for VideoAudioMediaProcessed {
    const EVENT_NAME: &'static str = "VideoAudioMediaProcessed";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoDeleted {
    pub video_id: VideoId,
}

impl EventPayload for VideoDeleted {
    const EVENT_NAME: &'static str = "VideoDeleted";
}
