//! Catalog commands.
//!
//! Each use case loads and stores aggregates through the caller's unit of
//! work and tracks what it touched. Referential checks run inside the same
//! transaction as the write.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{
    AudioVideoMedia, Category, CategoryId, MediaKind, MediaStatus, NewVideo, Video, VideoId,
};
use persistence::{CategoryRepository, UnitOfWork, VideoRepository};

use crate::{ApplicationError, Result, UseCase};

pub struct CreateCategory<C> {
    pub categories: Arc<C>,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
}

#[async_trait]
impl<U, C> UseCase<U> for CreateCategory<C>
where
    U: UnitOfWork + 'static,
    C: CategoryRepository<U::Transaction> + 'static,
{
    type Output = CategoryId;

    async fn execute(self, uow: &mut U) -> Result<CategoryId> {
        let category = Category::create(self.name, self.description, self.is_active)?;
        self.categories.insert(uow.transaction(), &category).await?;

        let id = category.id();
        uow.track(category);
        Ok(id)
    }
}

/// Deletes a category and, through the store, its video associations.
pub struct DeleteCategory<C> {
    pub categories: Arc<C>,
    pub category_id: CategoryId,
}

#[async_trait]
impl<U, C> UseCase<U> for DeleteCategory<C>
where
    U: UnitOfWork + 'static,
    C: CategoryRepository<U::Transaction> + 'static,
{
    type Output = ();

    async fn execute(self, uow: &mut U) -> Result<()> {
        let mut category = self
            .categories
            .find_by_id(Some(uow.transaction()), self.category_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Category", self.category_id))?;

        category.mark_deleted()?;
        self.categories
            .delete(uow.transaction(), self.category_id)
            .await?;
        uow.track(category);
        Ok(())
    }
}

/// Creates a video with its category associations.
///
/// Every category must exist; the video row and all association rows are
/// written in one transaction.
pub struct CreateVideo<C, V> {
    pub categories: Arc<C>,
    pub videos: Arc<V>,
    pub input: NewVideo,
}

#[async_trait]
impl<U, C, V> UseCase<U> for CreateVideo<C, V>
where
    U: UnitOfWork + 'static,
    C: CategoryRepository<U::Transaction> + 'static,
    V: VideoRepository<U::Transaction> + 'static,
{
    type Output = VideoId;

    async fn execute(self, uow: &mut U) -> Result<VideoId> {
        ensure_categories_exist(&*self.categories, uow, &self.input.category_ids).await?;

        let video = Video::create(self.input)?;
        self.videos.insert(uow.transaction(), &video).await?;

        let id = video.id();
        uow.track(video);
        Ok(id)
    }
}

/// Replaces the whole category set of a video.
pub struct ReplaceVideoCategories<C, V> {
    pub categories: Arc<C>,
    pub videos: Arc<V>,
    pub video_id: VideoId,
    pub category_ids: BTreeSet<CategoryId>,
}

#[async_trait]
impl<U, C, V> UseCase<U> for ReplaceVideoCategories<C, V>
where
    U: UnitOfWork + 'static,
    C: CategoryRepository<U::Transaction> + 'static,
    V: VideoRepository<U::Transaction> + 'static,
{
    type Output = ();

    async fn execute(self, uow: &mut U) -> Result<()> {
        ensure_categories_exist(&*self.categories, uow, &self.category_ids).await?;

        let mut video = load_video(&*self.videos, uow, self.video_id).await?;
        video.replace_categories(self.category_ids)?;
        self.videos.update(uow.transaction(), &video).await?;
        uow.track(video);
        Ok(())
    }
}

/// Stores a newly uploaded trailer or video file.
///
/// Publishes `VideoAudioMediaUploadedIntegrationEvent` after commit, which
/// asks the encoder to convert the raw file.
pub struct UploadAudioVideoMedia<V> {
    pub videos: Arc<V>,
    pub video_id: VideoId,
    pub kind: MediaKind,
    pub name: String,
    pub raw_location: String,
}

#[async_trait]
impl<U, V> UseCase<U> for UploadAudioVideoMedia<V>
where
    U: UnitOfWork + 'static,
    V: VideoRepository<U::Transaction> + 'static,
{
    type Output = ();

    async fn execute(self, uow: &mut U) -> Result<()> {
        let media = AudioVideoMedia::pending(self.name, self.raw_location)?;

        let mut video = load_video(&*self.videos, uow, self.video_id).await?;
        video.replace_media(self.kind, media)?;
        self.videos.update(uow.transaction(), &video).await?;
        uow.track(video);
        Ok(())
    }
}

/// Applies an encoder result to one media slot of a video.
pub struct ProcessAudioVideoMedia<V> {
    pub videos: Arc<V>,
    pub video_id: VideoId,
    pub kind: MediaKind,
    pub status: MediaStatus,
    pub encoded_location: Option<String>,
}

#[async_trait]
impl<U, V> UseCase<U> for ProcessAudioVideoMedia<V>
where
    U: UnitOfWork + 'static,
    V: VideoRepository<U::Transaction> + 'static,
{
    type Output = ();

    async fn execute(self, uow: &mut U) -> Result<()> {
        let mut video = load_video(&*self.videos, uow, self.video_id).await?;
        video.process_media(self.kind, self.status, self.encoded_location)?;
        self.videos.update(uow.transaction(), &video).await?;
        uow.track(video);
        Ok(())
    }
}

pub struct DeleteVideo<V> {
    pub videos: Arc<V>,
    pub video_id: VideoId,
}

#[async_trait]
impl<U, V> UseCase<U> for DeleteVideo<V>
where
    U: UnitOfWork + 'static,
    V: VideoRepository<U::Transaction> + 'static,
{
    type Output = ();

    async fn execute(self, uow: &mut U) -> Result<()> {
        let mut video = load_video(&*self.videos, uow, self.video_id).await?;
        video.mark_deleted()?;
        self.videos.delete(uow.transaction(), self.video_id).await?;
        uow.track(video);
        Ok(())
    }
}

async fn load_video<U, V>(videos: &V, uow: &mut U, id: VideoId) -> Result<Video>
where
    U: UnitOfWork,
    V: VideoRepository<U::Transaction>,
{
    videos
        .find_by_id(Some(uow.transaction()), id)
        .await?
        .ok_or_else(|| ApplicationError::not_found("Video", id))
}

async fn ensure_categories_exist<U, C>(
    categories: &C,
    uow: &mut U,
    ids: &BTreeSet<CategoryId>,
) -> Result<()>
where
    U: UnitOfWork,
    C: CategoryRepository<U::Transaction>,
{
    for id in ids {
        if categories
            .find_by_id(Some(uow.transaction()), *id)
            .await?
            .is_none()
        {
            return Err(ApplicationError::not_found("Category", id));
        }
    }
    Ok(())
}
