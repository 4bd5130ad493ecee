//! Audio/video media value objects.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, FieldErrors};

/// Which media slot of a video a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Trailer,
    Video,
}

impl MediaKind {
    /// Lowercase name used in resource ids, e.g. `"<video_id>.trailer"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Trailer => "trailer",
            MediaKind::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediaKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trailer" => Ok(MediaKind::Trailer),
            "video" => Ok(MediaKind::Video),
            other => {
                let mut errors = FieldErrors::new();
                errors.add("media_kind", format!("unknown media kind {other:?}"));
                Err(DomainError::Validation(errors))
            }
        }
    }
}

/// Encoding status of an uploaded media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl MediaStatus {
    /// Returns true once the encoder reported a result.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MediaStatus::Completed | MediaStatus::Failed)
    }
}

/// An uploaded audio/video file and its encoding state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioVideoMedia {
    name: String,
    raw_location: String,
    encoded_location: Option<String>,
    status: MediaStatus,
}

const MAX_NAME_LENGTH: usize = 255;

impl AudioVideoMedia {
    /// A freshly uploaded file waiting for the encoder.
    pub fn pending(
        name: impl Into<String>,
        raw_location: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        let raw_location = raw_location.into();

        let mut errors = FieldErrors::new();
        if name.trim().is_empty() {
            errors.add("name", "must not be empty");
        } else if name.chars().count() > MAX_NAME_LENGTH {
            errors.add("name", format!("must be at most {MAX_NAME_LENGTH} characters"));
        }
        if raw_location.trim().is_empty() {
            errors.add("raw_location", "must not be empty");
        }
        errors.into_result()?;

        Ok(Self {
            name,
            raw_location,
            encoded_location: None,
            status: MediaStatus::Pending,
        })
    }

    /// Returns a copy marked as completed at the encoded location.
    pub fn completed(&self, encoded_location: impl Into<String>) -> Self {
        Self {
            encoded_location: Some(encoded_location.into()),
            status: MediaStatus::Completed,
            ..self.clone()
        }
    }

    /// Returns a copy marked as failed.
    pub fn failed(&self) -> Self {
        Self {
            status: MediaStatus::Failed,
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw_location(&self) -> &str {
        &self.raw_location
    }

    pub fn encoded_location(&self) -> Option<&str> {
        self.encoded_location.as_deref()
    }

    pub fn status(&self) -> MediaStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_media_requires_name_and_location() {
        let err = AudioVideoMedia::pending("", " ").unwrap_err();
        match err {
            DomainError::Validation(errors) => {
                assert!(errors.get("name").is_some());
                assert!(errors.get("raw_location").is_some());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn completed_media_keeps_raw_location() {
        let media = AudioVideoMedia::pending("trailer.mp4", "videos/1/trailer.mp4").unwrap();
        let done = media.completed("videos/1/encoded");

        assert_eq!(done.status(), MediaStatus::Completed);
        assert_eq!(done.raw_location(), "videos/1/trailer.mp4");
        assert_eq!(done.encoded_location(), Some("videos/1/encoded"));
        assert_eq!(media.status(), MediaStatus::Pending);
    }

    #[test]
    fn media_kind_parses_lowercase_names() {
        assert_eq!("trailer".parse::<MediaKind>().unwrap(), MediaKind::Trailer);
        assert_eq!("video".parse::<MediaKind>().unwrap(), MediaKind::Video);
        assert!("banner".parse::<MediaKind>().is_err());
    }

    #[test]
    fn status_serializes_screaming_case() {
        let json = serde_json::to_string(&MediaStatus::Completed).unwrap();
        assert_eq!(json, "\"COMPLETED\"");
    }
}
