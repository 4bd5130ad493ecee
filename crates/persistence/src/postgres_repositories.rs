//! PostgreSQL repositories.

use std::collections::BTreeSet;

use async_trait::async_trait;
use domain::{AudioVideoMedia, Category, CategoryId, CategoryRecord, Video, VideoId, VideoRecord};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{PersistenceError, PgTransaction, Repository, Result};

fn map_insert_error(e: sqlx::Error, entity: &'static str, id: impl ToString) -> PersistenceError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return PersistenceError::duplicate(entity, id);
    }
    PersistenceError::Database(e)
}

/// Foreign key violations on `video_categories` mean one side is missing.
fn map_association_error(e: sqlx::Error, video_id: VideoId, category_id: CategoryId) -> PersistenceError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_foreign_key_violation()
    {
        return if db_err.constraint() == Some("video_categories_video_id_fkey") {
            PersistenceError::not_found("Video", video_id)
        } else {
            PersistenceError::not_found("Category", category_id)
        };
    }
    PersistenceError::Database(e)
}

fn corrupt(table: &'static str, error: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::CorruptRow {
        table,
        reason: error.to_string(),
    }
}

#[derive(Clone)]
pub struct PgCategoryRepository {
    pool: PgPool,
}

impl PgCategoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_category(row: PgRow) -> Result<Category> {
        Ok(Category::from(CategoryRecord {
            id: CategoryId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn load(conn: &mut PgConnection, id: CategoryId) -> Result<Option<Category>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, is_active, created_at
            FROM categories
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(conn)
        .await?;

        row.map(Self::row_to_category).transpose()
    }
}

#[async_trait]
impl Repository<Category, PgTransaction> for PgCategoryRepository {
    type Id = CategoryId;

    async fn insert(&self, tx: &mut PgTransaction, category: &Category) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO categories (id, name, description, is_active, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(category.id().as_uuid())
        .bind(category.name())
        .bind(category.description())
        .bind(category.is_active())
        .bind(category.created_at())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_insert_error(e, "Category", category.id()))?;

        Ok(())
    }

    async fn update(&self, tx: &mut PgTransaction, category: &Category) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE categories SET name = $2, description = $3, is_active = $4
            WHERE id = $1
            "#,
        )
        .bind(category.id().as_uuid())
        .bind(category.name())
        .bind(category.description())
        .bind(category.is_active())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("Category", category.id()));
        }
        Ok(())
    }

    async fn delete(&self, tx: &mut PgTransaction, id: CategoryId) -> Result<()> {
        let result = sqlx::query("DELETE FROM categories WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("Category", id));
        }
        Ok(())
    }

    async fn find_by_id(
        &self,
        tx: Option<&mut PgTransaction>,
        id: CategoryId,
    ) -> Result<Option<Category>> {
        match tx {
            Some(tx) => Self::load(tx, id).await,
            None => {
                let mut conn = self.pool.acquire().await?;
                Self::load(&mut conn, id).await
            }
        }
    }
}

#[derive(Clone)]
pub struct PgVideoRepository {
    pool: PgPool,
}

impl PgVideoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(conn: &mut PgConnection, id: VideoId) -> Result<Option<Video>> {
        let row = sqlx::query(
            r#"
            SELECT id, title, description, year_launched, duration, opened, published,
                   trailer, video, created_at
            FROM videos
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let category_ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT category_id FROM video_categories WHERE video_id = $1 ORDER BY category_id",
        )
        .bind(id.as_uuid())
        .fetch_all(&mut *conn)
        .await?;

        let year_launched: i16 = row.try_get("year_launched")?;
        let duration: i32 = row.try_get("duration")?;
        let trailer: Option<Json<AudioVideoMedia>> = row.try_get("trailer")?;
        let video: Option<Json<AudioVideoMedia>> = row.try_get("video")?;

        Ok(Some(Video::from(VideoRecord {
            id,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            year_launched: u16::try_from(year_launched).map_err(|e| corrupt("videos", e))?,
            duration: u32::try_from(duration).map_err(|e| corrupt("videos", e))?,
            opened: row.try_get("opened")?,
            published: row.try_get("published")?,
            category_ids: category_ids
                .into_iter()
                .map(CategoryId::from_uuid)
                .collect::<BTreeSet<_>>(),
            trailer: trailer.map(|media| media.0),
            video: video.map(|media| media.0),
            created_at: row.try_get("created_at")?,
        })))
    }

    /// Replaces the association rows of a video with its current categories.
    async fn write_categories(tx: &mut PgTransaction, video: &Video) -> Result<()> {
        sqlx::query("DELETE FROM video_categories WHERE video_id = $1")
            .bind(video.id().as_uuid())
            .execute(&mut **tx)
            .await?;

        for category_id in video.category_ids() {
            sqlx::query("INSERT INTO video_categories (video_id, category_id) VALUES ($1, $2)")
                .bind(video.id().as_uuid())
                .bind(category_id.as_uuid())
                .execute(&mut **tx)
                .await
                .map_err(|e| map_association_error(e, video.id(), *category_id))?;
        }
        Ok(())
    }
}

fn column_values(video: &Video) -> Result<(i16, i32)> {
    let year = i16::try_from(video.year_launched()).map_err(|e| corrupt("videos", e))?;
    let duration = i32::try_from(video.duration()).map_err(|e| corrupt("videos", e))?;
    Ok((year, duration))
}

#[async_trait]
impl Repository<Video, PgTransaction> for PgVideoRepository {
    type Id = VideoId;

    async fn insert(&self, tx: &mut PgTransaction, video: &Video) -> Result<()> {
        let (year_launched, duration) = column_values(video)?;

        sqlx::query(
            r#"
            INSERT INTO videos (id, title, description, year_launched, duration, opened,
                                published, trailer, video, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(video.id().as_uuid())
        .bind(video.title())
        .bind(video.description())
        .bind(year_launched)
        .bind(duration)
        .bind(video.is_opened())
        .bind(video.is_published())
        .bind(video.media(domain::MediaKind::Trailer).map(Json))
        .bind(video.media(domain::MediaKind::Video).map(Json))
        .bind(video.created_at())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_insert_error(e, "Video", video.id()))?;

        Self::write_categories(tx, video).await
    }

    async fn update(&self, tx: &mut PgTransaction, video: &Video) -> Result<()> {
        let (year_launched, duration) = column_values(video)?;

        Self::write_categories(tx, video).await?;

        let result = sqlx::query(
            r#"
            UPDATE videos
            SET title = $2, description = $3, year_launched = $4, duration = $5,
                opened = $6, published = $7, trailer = $8, video = $9
            WHERE id = $1
            "#,
        )
        .bind(video.id().as_uuid())
        .bind(video.title())
        .bind(video.description())
        .bind(year_launched)
        .bind(duration)
        .bind(video.is_opened())
        .bind(video.is_published())
        .bind(video.media(domain::MediaKind::Trailer).map(Json))
        .bind(video.media(domain::MediaKind::Video).map(Json))
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("Video", video.id()));
        }
        Ok(())
    }

    async fn delete(&self, tx: &mut PgTransaction, id: VideoId) -> Result<()> {
        let result = sqlx::query("DELETE FROM videos WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::not_found("Video", id));
        }
        Ok(())
    }

    async fn find_by_id(
        &self,
        tx: Option<&mut PgTransaction>,
        id: VideoId,
    ) -> Result<Option<Video>> {
        match tx {
            Some(tx) => Self::load(tx, id).await,
            None => {
                let mut conn = self.pool.acquire().await?;
                Self::load(&mut conn, id).await
            }
        }
    }
}
