//! The unit of work abstraction.

use async_trait::async_trait;
use domain::AggregateRoot;

use crate::{PersistenceError, Result};

/// Lifecycle of a [`UnitOfWork`].
///
/// ```text
/// Idle --start--> Active --commit--> Committed
///                   |
///                   +----rollback--> RolledBack
/// ```
///
/// `Committed` and `RolledBack` are final. A failed commit also ends in
/// `RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitOfWorkState {
    #[default]
    Idle,
    Active,
    Committed,
    RolledBack,
}

impl UnitOfWorkState {
    /// Returns true for `Committed` and `RolledBack`.
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitOfWorkState::Committed | UnitOfWorkState::RolledBack)
    }

    pub(crate) fn check_start(self) -> Result<()> {
        match self {
            UnitOfWorkState::Idle => Ok(()),
            UnitOfWorkState::Active => Err(PersistenceError::Conflict(
                "unit of work is already active".to_string(),
            )),
            state => Err(PersistenceError::InvalidState {
                operation: "start",
                state,
            }),
        }
    }

    pub(crate) fn check_active(self, operation: &'static str) -> Result<()> {
        if self == UnitOfWorkState::Active {
            Ok(())
        } else {
            Err(PersistenceError::InvalidState {
                operation,
                state: self,
            })
        }
    }
}

impl std::fmt::Display for UnitOfWorkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UnitOfWorkState::Idle => "idle",
            UnitOfWorkState::Active => "active",
            UnitOfWorkState::Committed => "committed",
            UnitOfWorkState::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// One atomic transaction plus the aggregates touched while it was open.
///
/// Writes made through [`transaction`](UnitOfWork::transaction) see each
/// other and stay invisible to other units of work until commit. A unit of
/// work is single use: once terminal, a new command needs a new one from a
/// [`UnitOfWorkFactory`].
#[async_trait]
pub trait UnitOfWork: Send {
    /// Store-specific transaction handle repositories write through.
    type Transaction: Send;

    /// Current lifecycle state.
    fn state(&self) -> UnitOfWorkState;

    /// Opens the underlying transaction.
    ///
    /// Fails with [`PersistenceError::Conflict`] if already active and with
    /// [`PersistenceError::InvalidState`] once terminal.
    async fn start(&mut self) -> Result<()>;

    /// The open transaction handle.
    ///
    /// # Panics
    ///
    /// Panics unless the unit of work is `Active`. Reaching for the handle
    /// outside a transaction is a programming error.
    fn transaction(&mut self) -> &mut Self::Transaction;

    /// Makes every write of the transaction durable at once.
    ///
    /// If the store refuses, its work is undone, the unit of work ends
    /// `RolledBack` and the store error is returned.
    async fn commit(&mut self) -> Result<()>;

    /// Discards every write of the transaction.
    async fn rollback(&mut self) -> Result<()>;

    /// Registers an aggregate touched by the current command.
    fn add_aggregate(&mut self, aggregate: Box<dyn AggregateRoot>);

    /// Aggregates registered so far, in registration order.
    fn aggregates(&self) -> &[Box<dyn AggregateRoot>];

    /// Removes and returns the registered aggregates, in registration order.
    fn take_aggregates(&mut self) -> Vec<Box<dyn AggregateRoot>>;

    /// Typed shorthand for [`add_aggregate`](UnitOfWork::add_aggregate).
    fn track<A: AggregateRoot>(&mut self, aggregate: A)
    where
        Self: Sized,
    {
        self.add_aggregate(Box::new(aggregate));
    }
}

/// Creates a fresh [`UnitOfWork`] per command.
pub trait UnitOfWorkFactory: Send + Sync {
    type UnitOfWork: UnitOfWork;

    fn create(&self) -> Self::UnitOfWork;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_idle_can_start() {
        assert!(UnitOfWorkState::Idle.check_start().is_ok());
        assert!(matches!(
            UnitOfWorkState::Active.check_start(),
            Err(PersistenceError::Conflict(_))
        ));
        assert!(matches!(
            UnitOfWorkState::Committed.check_start(),
            Err(PersistenceError::InvalidState {
                operation: "start",
                ..
            })
        ));
    }

    #[test]
    fn terminal_states() {
        assert!(!UnitOfWorkState::Idle.is_terminal());
        assert!(!UnitOfWorkState::Active.is_terminal());
        assert!(UnitOfWorkState::Committed.is_terminal());
        assert!(UnitOfWorkState::RolledBack.is_terminal());
    }

    #[test]
    fn invalid_state_message_names_the_state() {
        let err = UnitOfWorkState::RolledBack
            .check_active("commit")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot commit a unit of work that is rolled back"
        );
    }
}
