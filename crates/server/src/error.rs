//! Startup error types.

use messaging::{BrokerError, ConfigurationError};
use persistence::PersistenceError;
use thiserror::Error;

/// Errors that stop the process before or while it serves.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The routing table does not cover every catalog event.
    #[error("Routing configuration invalid: {0}")]
    Routing(#[from] ConfigurationError),

    /// The database pool could not be created.
    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    /// Migrations failed.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// The broker connection, topology or subscription failed.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Binding or serving the HTTP listener failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The message consumer ended while the server was running.
    #[error("Message consumer stopped unexpectedly")]
    ConsumerStopped,

    /// The metrics recorder could not be installed.
    #[error("Metrics recorder error: {0}")]
    Metrics(String),
}
