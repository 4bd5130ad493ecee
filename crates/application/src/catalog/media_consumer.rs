//! Consumer of encoder conversion results.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{MediaKind, MediaStatus, VideoId};
use messaging::{Delivery, HandlerError, MessageHandler};
use persistence::{UnitOfWorkFactory, VideoRepository};
use serde::Deserialize;
use tracing::info;

use crate::{ApplicationService, ProcessAudioVideoMedia};

/// Routing key the encoder publishes conversion results with.
pub const CONVERSION_RESULT_ROUTING_KEY: &str = "videos.convert.result";

#[derive(Debug, Deserialize)]
struct ConversionResult {
    video: ConvertedVideo,
    status: MediaStatus,
}

#[derive(Debug, Deserialize)]
struct ConvertedVideo {
    resource_id: String,
    encoded_video_folder: String,
}

/// A parsed conversion result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaConversion {
    pub video_id: VideoId,
    pub kind: MediaKind,
    pub status: MediaStatus,
    pub encoded_location: Option<String>,
}

impl MediaConversion {
    /// Parses `{video: {resource_id, encoded_video_folder}, status}`.
    ///
    /// Every failure is a [`MalformedMessage`](messaging::ErrorKind) error:
    /// the same bytes will never parse on a later attempt.
    pub fn parse(body: &[u8]) -> Result<Self, HandlerError> {
        let result: ConversionResult = serde_json::from_slice(body)
            .map_err(|e| HandlerError::malformed(format!("invalid conversion result: {e}")))?;

        if !result.status.is_terminal() {
            return Err(HandlerError::malformed(format!(
                "conversion status must be COMPLETED or FAILED, got {:?}",
                result.status
            )));
        }

        let resource_id = &result.video.resource_id;
        let (video_id, kind) = resource_id.split_once('.').ok_or_else(|| {
            HandlerError::malformed(format!("resource id {resource_id:?} is not <video_id>.<kind>"))
        })?;
        let video_id = VideoId::from_str(video_id)
            .map_err(|e| HandlerError::malformed(format!("resource id {resource_id:?}: {e}")))?;
        let kind = MediaKind::from_str(kind)
            .map_err(|e| HandlerError::malformed(format!("resource id {resource_id:?}: {e}")))?;

        let encoded_location =
            (result.status == MediaStatus::Completed).then_some(result.video.encoded_video_folder);

        Ok(Self {
            video_id,
            kind,
            status: result.status,
            encoded_location,
        })
    }
}

/// Applies encoder results through [`ProcessAudioVideoMedia`].
pub struct MediaConversionHandler<F: UnitOfWorkFactory, V> {
    service: Arc<ApplicationService<F>>,
    videos: Arc<V>,
}

impl<F: UnitOfWorkFactory, V> MediaConversionHandler<F, V> {
    pub fn new(service: Arc<ApplicationService<F>>, videos: Arc<V>) -> Self {
        Self { service, videos }
    }
}

#[async_trait]
impl<F, V> MessageHandler for MediaConversionHandler<F, V>
where
    F: UnitOfWorkFactory + 'static,
    F::UnitOfWork: 'static,
    V: VideoRepository<<F::UnitOfWork as persistence::UnitOfWork>::Transaction> + 'static,
{
    #[tracing::instrument(
        skip(self, delivery),
        fields(routing_key = %delivery.routing_key, correlation_id = ?delivery.correlation_id)
    )]
    async fn handle(&self, delivery: &Delivery) -> Result<(), HandlerError> {
        let conversion = MediaConversion::parse(&delivery.body)?;

        self.service
            .run(ProcessAudioVideoMedia {
                videos: self.videos.clone(),
                video_id: conversion.video_id,
                kind: conversion.kind,
                status: conversion.status,
                encoded_location: conversion.encoded_location,
            })
            .await?;

        info!(
            video_id = %conversion.video_id,
            media_kind = %conversion.kind,
            status = ?conversion.status,
            "Conversion result applied"
        );
        Ok(())
    }
}
