//! Transactional persistence for the video catalog.
//!
//! A [`UnitOfWork`] wraps one store transaction and the set of aggregates a
//! command touched. Repositories write through the transaction handle, so a
//! command's writes become visible together on commit or not at all.
//!
//! Two stores are provided:
//! - [`InMemoryDatabase`], copy-on-begin tables for tests and local runs
//! - [`PgUnitOfWork`], a PostgreSQL transaction through `sqlx`

pub mod error;
pub mod memory;
pub mod memory_repositories;
pub mod postgres;
pub mod postgres_repositories;
pub mod repository;
pub mod unit_of_work;

pub use error::{PersistenceError, Result};
pub use memory::{
    InMemoryDatabase, InMemoryTransaction, InMemoryUnitOfWork, InMemoryUnitOfWorkFactory, Tables,
};
pub use memory_repositories::{InMemoryCategoryRepository, InMemoryVideoRepository};
pub use postgres::{PgTransaction, PgUnitOfWork, PgUnitOfWorkFactory, run_migrations};
pub use postgres_repositories::{PgCategoryRepository, PgVideoRepository};
pub use repository::{CategoryRepository, Repository, VideoRepository};
pub use unit_of_work::{UnitOfWork, UnitOfWorkFactory, UnitOfWorkState};
