use thiserror::Error;

use crate::UnitOfWorkState;

/// Errors raised by units of work and repositories.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The unit of work is already active, or a concurrent commit changed
    /// the data this transaction was based on.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The operation is not allowed in the unit of work's current state.
    #[error("Cannot {operation} a unit of work that is {state}")]
    InvalidState {
        operation: &'static str,
        state: UnitOfWorkState,
    },

    /// The row to update or delete does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A row with the same key already exists.
    #[error("{entity} already exists: {id}")]
    Duplicate { entity: &'static str, id: String },

    /// A stored row could not be mapped back to an aggregate.
    #[error("Corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    /// The store refused to commit.
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        PersistenceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn duplicate(entity: &'static str, id: impl ToString) -> Self {
        PersistenceError::Duplicate {
            entity,
            id: id.to_string(),
        }
    }
}

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;
