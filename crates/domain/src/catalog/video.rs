//! Video aggregate.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateRoot;
use crate::error::{DomainError, FieldErrors};
use crate::event::{EventBuffer, EventPayload};

use super::events::{
    VideoAudioMediaProcessed, VideoAudioMediaReplaced, VideoCategoriesReplaced, VideoCreated,
    VideoDeleted,
};
use super::{AudioVideoMedia, CategoryId, MediaKind, MediaStatus, VideoId};

const MAX_TITLE_LENGTH: usize = 255;
const FIRST_FILM_YEAR: u16 = 1888;

/// Input for [`Video::create`].
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub title: String,
    pub description: String,
    pub year_launched: u16,
    pub duration: u32,
    pub opened: bool,
    pub category_ids: BTreeSet<CategoryId>,
}

/// Persisted shape of a [`Video`], without its event buffer.
///
/// Repositories map rows to and from this struct; restoring a video from a
/// record never records events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub id: VideoId,
    pub title: String,
    pub description: String,
    pub year_launched: u16,
    pub duration: u32,
    pub opened: bool,
    pub published: bool,
    pub category_ids: BTreeSet<CategoryId>,
    pub trailer: Option<AudioVideoMedia>,
    pub video: Option<AudioVideoMedia>,
    pub created_at: DateTime<Utc>,
}

/// A catalog video with its trailer and main media.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    id: VideoId,
    title: String,
    description: String,
    year_launched: u16,
    /// Minutes.
    duration: u32,
    opened: bool,
    published: bool,
    category_ids: BTreeSet<CategoryId>,
    trailer: Option<AudioVideoMedia>,
    video: Option<AudioVideoMedia>,
    created_at: DateTime<Utc>,

    #[serde(skip)]
    events: EventBuffer,
}

impl Video {
    /// Creates a video, recording `VideoCreated`.
    pub fn create(input: NewVideo) -> Result<Self, DomainError> {
        validate(&input)?;

        let mut video = Self {
            id: VideoId::new(),
            title: input.title,
            description: input.description,
            year_launched: input.year_launched,
            duration: input.duration,
            opened: input.opened,
            published: false,
            category_ids: input.category_ids,
            trailer: None,
            video: None,
            created_at: Utc::now(),
            events: EventBuffer::new(),
        };

        let created = VideoCreated {
            video_id: video.id,
            title: video.title.clone(),
            year_launched: video.year_launched,
            duration: video.duration,
            category_ids: video.category_ids.clone(),
            created_at: video.created_at,
        };
        video.record(&created)?;
        Ok(video)
    }

    /// Replaces the whole set of categories.
    pub fn replace_categories(
        &mut self,
        category_ids: BTreeSet<CategoryId>,
    ) -> Result<(), DomainError> {
        if category_ids.is_empty() {
            let mut errors = FieldErrors::new();
            errors.add("category_ids", "must contain at least one category");
            return Err(DomainError::Validation(errors));
        }
        self.category_ids = category_ids;

        let replaced = VideoCategoriesReplaced {
            video_id: self.id,
            category_ids: self.category_ids.clone(),
        };
        self.record(&replaced)
    }

    /// Replaces the trailer or main video file, recording
    /// `VideoAudioMediaReplaced`. The new file starts out pending.
    pub fn replace_media(
        &mut self,
        kind: MediaKind,
        media: AudioVideoMedia,
    ) -> Result<(), DomainError> {
        *self.slot_mut(kind) = Some(media.clone());
        self.published = false;

        let replaced = VideoAudioMediaReplaced {
            video_id: self.id,
            media_kind: kind,
            media,
        };
        self.record(&replaced)
    }

    /// Applies an encoder result to a media slot.
    ///
    /// The video becomes published once both trailer and video are encoded.
    pub fn process_media(
        &mut self,
        kind: MediaKind,
        status: MediaStatus,
        encoded_location: Option<String>,
    ) -> Result<(), DomainError> {
        let Some(current) = self.slot(kind) else {
            return Err(DomainError::InvalidState(format!(
                "video {} has no {kind} media to process",
                self.id
            )));
        };

        let updated = match (status, encoded_location.as_deref()) {
            (MediaStatus::Completed, Some(location)) => current.completed(location),
            (MediaStatus::Completed, None) => {
                let mut errors = FieldErrors::new();
                errors.add("encoded_location", "required when media is completed");
                return Err(DomainError::Validation(errors));
            }
            (MediaStatus::Failed, _) => current.failed(),
            (other, _) => {
                return Err(DomainError::InvalidState(format!(
                    "encoder result must be completed or failed, got {other:?}"
                )));
            }
        };
        *self.slot_mut(kind) = Some(updated);
        self.published = self.all_media_completed();

        let processed = VideoAudioMediaProcessed {
            video_id: self.id,
            media_kind: kind,
            status,
            encoded_location,
        };
        self.record(&processed)
    }

    /// Marks the video as deleted, recording `VideoDeleted`.
    pub fn mark_deleted(&mut self) -> Result<(), DomainError> {
        let deleted = VideoDeleted { video_id: self.id };
        self.record(&deleted)
    }

    /// Snapshot of the persistent state.
    pub fn to_record(&self) -> VideoRecord {
        VideoRecord {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            year_launched: self.year_launched,
            duration: self.duration,
            opened: self.opened,
            published: self.published,
            category_ids: self.category_ids.clone(),
            trailer: self.trailer.clone(),
            video: self.video.clone(),
            created_at: self.created_at,
        }
    }

    fn all_media_completed(&self) -> bool {
        [&self.trailer, &self.video].iter().all(|slot| {
            slot.as_ref()
                .is_some_and(|media| media.status() == MediaStatus::Completed)
        })
    }

    fn slot(&self, kind: MediaKind) -> Option<&AudioVideoMedia> {
        match kind {
            MediaKind::Trailer => self.trailer.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }

    fn slot_mut(&mut self, kind: MediaKind) -> &mut Option<AudioVideoMedia> {
        match kind {
            MediaKind::Trailer => &mut self.trailer,
            MediaKind::Video => &mut self.video,
        }
    }

    fn record<P: EventPayload>(&mut self, payload: &P) -> Result<(), DomainError> {
        let aggregate_id = self.aggregate_id();
        self.events.record(aggregate_id, "Video", payload)?;
        Ok(())
    }
}

// Query methods
impl Video {
    pub fn id(&self) -> VideoId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn year_launched(&self) -> u16 {
        self.year_launched
    }

    pub fn duration(&self) -> u32 {
        self.duration
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    pub fn category_ids(&self) -> &BTreeSet<CategoryId> {
        &self.category_ids
    }

    /// Returns the media stored in the given slot.
    pub fn media(&self, kind: MediaKind) -> Option<&AudioVideoMedia> {
        self.slot(kind)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl From<VideoRecord> for Video {
    fn from(record: VideoRecord) -> Self {
        Self {
            id: record.id,
            title: record.title,
            description: record.description,
            year_launched: record.year_launched,
            duration: record.duration,
            opened: record.opened,
            published: record.published,
            category_ids: record.category_ids,
            trailer: record.trailer,
            video: record.video,
            created_at: record.created_at,
            events: EventBuffer::new(),
        }
    }
}

impl AggregateRoot for Video {
    fn aggregate_type(&self) -> &'static str {
        "Video"
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

fn validate(input: &NewVideo) -> Result<(), DomainError> {
    let mut errors = FieldErrors::new();

    if input.title.trim().is_empty() {
        errors.add("title", "must not be empty");
    } else if input.title.chars().count() > MAX_TITLE_LENGTH {
        errors.add(
            "title",
            format!("must be at most {MAX_TITLE_LENGTH} characters"),
        );
    }

    let next_year = u16::try_from(Utc::now().year() + 1).unwrap_or(u16::MAX);
    if input.year_launched < FIRST_FILM_YEAR || input.year_launched > next_year {
        errors.add(
            "year_launched",
            format!("must be between {FIRST_FILM_YEAR} and {next_year}"),
        );
    }

    if input.duration == 0 {
        errors.add("duration", "must be greater than 0");
    }

    if input.category_ids.is_empty() {
        errors.add("category_ids", "must contain at least one category");
    }

    errors.into_result()
}
