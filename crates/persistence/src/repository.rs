//! Repository seam between use cases and a store.

use async_trait::async_trait;
use domain::{AggregateRoot, Category, CategoryId, Video, VideoId};

use crate::Result;

/// Stores and loads one aggregate type through a store transaction `Tx`.
///
/// Writes always go through the caller's transaction. Reads take an
/// optional one: `None` reads committed state outside any transaction.
#[async_trait]
pub trait Repository<A, Tx>: Send + Sync
where
    A: AggregateRoot,
    Tx: Send,
{
    type Id: Copy + Send + Sync + std::fmt::Display + 'static;

    /// Inserts a new aggregate. Fails with `Duplicate` if the id exists.
    async fn insert(&self, tx: &mut Tx, aggregate: &A) -> Result<()>;

    /// Overwrites an existing aggregate. Fails with `NotFound` if absent.
    async fn update(&self, tx: &mut Tx, aggregate: &A) -> Result<()>;

    /// Deletes an aggregate. Fails with `NotFound` if absent.
    async fn delete(&self, tx: &mut Tx, id: Self::Id) -> Result<()>;

    async fn find_by_id(&self, tx: Option<&mut Tx>, id: Self::Id) -> Result<Option<A>>;
}

/// A [`Repository`] of categories.
pub trait CategoryRepository<Tx: Send>: Repository<Category, Tx, Id = CategoryId> {}

impl<Tx: Send, R> CategoryRepository<Tx> for R where R: Repository<Category, Tx, Id = CategoryId> {}

/// A [`Repository`] of videos.
pub trait VideoRepository<Tx: Send>: Repository<Video, Tx, Id = VideoId> {}

impl<Tx: Send, R> VideoRepository<Tx> for R where R: Repository<Video, Tx, Id = VideoId> {}
