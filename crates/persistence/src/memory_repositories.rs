//! Repositories over an [`InMemoryDatabase`].
//!
//! Rows are the JSON form of the aggregates' records. Video categories live
//! in their own association table, one row per pair, so a category rewrite
//! touches several rows inside one transaction.

use async_trait::async_trait;
use domain::{Category, CategoryId, CategoryRecord, Video, VideoId, VideoRecord};
use serde::Deserialize;
use serde_json::json;

use crate::memory::{InMemoryDatabase, InMemoryTransaction, Tables};
use crate::{PersistenceError, Repository, Result};

pub const CATEGORIES: &str = "categories";
pub const VIDEOS: &str = "videos";
pub const VIDEO_CATEGORIES: &str = "video_categories";

fn association_key(video_id: VideoId, category_id: CategoryId) -> String {
    format!("{video_id}:{category_id}")
}

fn corrupt(table: &'static str, error: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::CorruptRow {
        table,
        reason: error.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryCategoryRepository {
    db: InMemoryDatabase,
}

impl InMemoryCategoryRepository {
    pub fn new(db: InMemoryDatabase) -> Self {
        Self { db }
    }

    fn load(tables: &Tables, id: CategoryId) -> Result<Option<Category>> {
        tables
            .get(CATEGORIES, &id.to_string())
            .map(|row| {
                CategoryRecord::deserialize(row)
                    .map(Category::from)
                    .map_err(|e| corrupt(CATEGORIES, e))
            })
            .transpose()
    }
}

#[async_trait]
impl Repository<Category, InMemoryTransaction> for InMemoryCategoryRepository {
    type Id = CategoryId;

    async fn insert(&self, tx: &mut InMemoryTransaction, category: &Category) -> Result<()> {
        let key = category.id().to_string();
        if tx.tables().get(CATEGORIES, &key).is_some() {
            return Err(PersistenceError::duplicate("Category", key));
        }
        let row = serde_json::to_value(category.to_record())?;
        tx.tables_mut().insert(CATEGORIES, key, row);
        Ok(())
    }

    async fn update(&self, tx: &mut InMemoryTransaction, category: &Category) -> Result<()> {
        let key = category.id().to_string();
        if tx.tables().get(CATEGORIES, &key).is_none() {
            return Err(PersistenceError::not_found("Category", key));
        }
        let row = serde_json::to_value(category.to_record())?;
        tx.tables_mut().insert(CATEGORIES, key, row);
        Ok(())
    }

    async fn delete(&self, tx: &mut InMemoryTransaction, id: CategoryId) -> Result<()> {
        let tables = tx.tables_mut();
        if tables.remove(CATEGORIES, &id.to_string()).is_none() {
            return Err(PersistenceError::not_found("Category", id));
        }
        let suffix = format!(":{id}");
        tables.remove_where(VIDEO_CATEGORIES, |key, _| key.ends_with(&suffix));
        Ok(())
    }

    async fn find_by_id(
        &self,
        tx: Option<&mut InMemoryTransaction>,
        id: CategoryId,
    ) -> Result<Option<Category>> {
        match tx {
            Some(tx) => Self::load(tx.tables(), id),
            None => self.db.read(|tables| Self::load(tables, id)).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryVideoRepository {
    db: InMemoryDatabase,
}

impl InMemoryVideoRepository {
    pub fn new(db: InMemoryDatabase) -> Self {
        Self { db }
    }

    fn load(tables: &Tables, id: VideoId) -> Result<Option<Video>> {
        let Some(row) = tables.get(VIDEOS, &id.to_string()) else {
            return Ok(None);
        };
        let mut record = VideoRecord::deserialize(row).map_err(|e| corrupt(VIDEOS, e))?;

        let prefix = format!("{id}:");
        record.category_ids = tables
            .rows(VIDEO_CATEGORIES)
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, row)| {
                row.get("category_id")
                    .cloned()
                    .ok_or_else(|| corrupt(VIDEO_CATEGORIES, "missing category_id"))
                    .and_then(|id| serde_json::from_value(id).map_err(|e| corrupt(VIDEO_CATEGORIES, e)))
            })
            .collect::<Result<_>>()?;

        Ok(Some(Video::from(record)))
    }

    /// Writes the association rows, then the owning row.
    fn write(tables: &mut Tables, video: &Video) -> Result<()> {
        let mut record = video.to_record();
        let video_id = record.id;

        for category_id in &record.category_ids {
            if tables.get(CATEGORIES, &category_id.to_string()).is_none() {
                return Err(PersistenceError::not_found("Category", category_id));
            }
        }

        let prefix = format!("{video_id}:");
        tables.remove_where(VIDEO_CATEGORIES, |key, _| key.starts_with(&prefix));
        for category_id in std::mem::take(&mut record.category_ids) {
            tables.insert(
                VIDEO_CATEGORIES,
                association_key(video_id, category_id),
                json!({ "video_id": video_id, "category_id": category_id }),
            );
        }

        tables.insert(VIDEOS, video_id.to_string(), serde_json::to_value(record)?);
        Ok(())
    }
}

#[async_trait]
impl Repository<Video, InMemoryTransaction> for InMemoryVideoRepository {
    type Id = VideoId;

    async fn insert(&self, tx: &mut InMemoryTransaction, video: &Video) -> Result<()> {
        if tx.tables().get(VIDEOS, &video.id().to_string()).is_some() {
            return Err(PersistenceError::duplicate("Video", video.id()));
        }
        Self::write(tx.tables_mut(), video)
    }

    async fn update(&self, tx: &mut InMemoryTransaction, video: &Video) -> Result<()> {
        if tx.tables().get(VIDEOS, &video.id().to_string()).is_none() {
            return Err(PersistenceError::not_found("Video", video.id()));
        }
        Self::write(tx.tables_mut(), video)
    }

    async fn delete(&self, tx: &mut InMemoryTransaction, id: VideoId) -> Result<()> {
        let tables = tx.tables_mut();
        if tables.remove(VIDEOS, &id.to_string()).is_none() {
            return Err(PersistenceError::not_found("Video", id));
        }
        let prefix = format!("{id}:");
        tables.remove_where(VIDEO_CATEGORIES, |key, _| key.starts_with(&prefix));
        Ok(())
    }

    async fn find_by_id(
        &self,
        tx: Option<&mut InMemoryTransaction>,
        id: VideoId,
    ) -> Result<Option<Video>> {
        match tx {
            Some(tx) => Self::load(tx.tables(), id),
            None => self.db.read(|tables| Self::load(tables, id)).await,
        }
    }
}
