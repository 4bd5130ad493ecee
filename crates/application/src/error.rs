use domain::DomainError;
use messaging::{ConfigurationError, ErrorKind, HandlerError};
use persistence::PersistenceError;
use thiserror::Error;

/// Errors returned by the application service and the catalog use cases.
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// An aggregate rejected the command.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The store failed or refused the transaction.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    /// A referenced aggregate does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An in-process domain event handler failed before commit.
    #[error("Event handler '{handler}' failed: {reason}")]
    EventHandler { handler: &'static str, reason: String },

    /// Startup wiring is inconsistent.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Convenience alias for application results.
pub type Result<T> = std::result::Result<T, ApplicationError>;

impl ApplicationError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        ApplicationError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Classification used by the consume-side retry filter.
    ///
    /// Failures that will repeat on every attempt map to non-retryable
    /// kinds; store and infrastructure failures stay retryable.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplicationError::Domain(DomainError::Validation(_))
            | ApplicationError::Domain(DomainError::InvalidState(_)) => ErrorKind::Validation,
            ApplicationError::Domain(DomainError::NotFound { .. })
            | ApplicationError::NotFound { .. } => ErrorKind::NotFound,
            ApplicationError::Domain(DomainError::Serialization(_)) => ErrorKind::Internal,
            ApplicationError::Persistence(e) => match e {
                PersistenceError::NotFound { .. } => ErrorKind::NotFound,
                PersistenceError::Duplicate { .. } => ErrorKind::Validation,
                PersistenceError::Conflict(_) => ErrorKind::Conflict,
                PersistenceError::CommitFailed(_) | PersistenceError::Database(_) => {
                    ErrorKind::Unavailable
                }
                _ => ErrorKind::Internal,
            },
            ApplicationError::EventHandler { .. } | ApplicationError::Configuration(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<ApplicationError> for HandlerError {
    fn from(error: ApplicationError) -> Self {
        HandlerError::new(error.kind(), error.to_string())
    }
}
