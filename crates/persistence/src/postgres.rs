use async_trait::async_trait;
use domain::AggregateRoot;
use sqlx::{PgPool, Postgres};
use tracing::{debug, warn};

use crate::{PersistenceError, Result, UnitOfWork, UnitOfWorkFactory, UnitOfWorkState};

/// Transaction handle PostgreSQL repositories write through.
pub type PgTransaction = sqlx::Transaction<'static, Postgres>;

/// Runs the catalog migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// [`UnitOfWork`] over a PostgreSQL transaction.
///
/// Isolation is whatever the database gives a plain `BEGIN`. Dropping an
/// active unit of work rolls its transaction back.
pub struct PgUnitOfWork {
    pool: PgPool,
    state: UnitOfWorkState,
    tx: Option<PgTransaction>,
    aggregates: Vec<Box<dyn AggregateRoot>>,
}

impl PgUnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            state: UnitOfWorkState::Idle,
            tx: None,
            aggregates: Vec::new(),
        }
    }

    fn mark_rolled_back(&mut self) {
        self.aggregates.clear();
        self.state = UnitOfWorkState::RolledBack;
        metrics::counter!("uow_rollbacks_total", "store" => "postgres").increment(1);
    }
}

impl std::fmt::Debug for PgUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgUnitOfWork")
            .field("state", &self.state)
            .field("aggregates", &self.aggregates.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    type Transaction = PgTransaction;

    fn state(&self) -> UnitOfWorkState {
        self.state
    }

    async fn start(&mut self) -> Result<()> {
        self.state.check_start()?;
        self.tx = Some(self.pool.begin().await?);
        self.state = UnitOfWorkState::Active;
        Ok(())
    }

    fn transaction(&mut self) -> &mut PgTransaction {
        match self.tx.as_mut() {
            Some(tx) if self.state == UnitOfWorkState::Active => tx,
            _ => panic!("unit of work has no open transaction (state: {})", self.state),
        }
    }

    async fn commit(&mut self) -> Result<()> {
        self.state.check_active("commit")?;
        let Some(tx) = self.tx.take() else {
            return Err(PersistenceError::InvalidState {
                operation: "commit",
                state: self.state,
            });
        };

        match tx.commit().await {
            Ok(()) => {
                self.state = UnitOfWorkState::Committed;
                metrics::counter!("uow_commits_total", "store" => "postgres").increment(1);
                debug!(aggregates = self.aggregates.len(), "Transaction committed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Commit failed, transaction rolled back by the database");
                self.mark_rolled_back();
                Err(e.into())
            }
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        self.state.check_active("rollback")?;
        let tx = self.tx.take();
        self.mark_rolled_back();

        if let Some(tx) = tx {
            tx.rollback().await?;
        }
        debug!("Transaction rolled back");
        Ok(())
    }

    fn add_aggregate(&mut self, aggregate: Box<dyn AggregateRoot>) {
        debug_assert_eq!(self.state, UnitOfWorkState::Active);
        self.aggregates.push(aggregate);
    }

    fn aggregates(&self) -> &[Box<dyn AggregateRoot>] {
        &self.aggregates
    }

    fn take_aggregates(&mut self) -> Vec<Box<dyn AggregateRoot>> {
        std::mem::take(&mut self.aggregates)
    }
}

/// Hands out [`PgUnitOfWork`]s over a shared pool.
#[derive(Clone)]
pub struct PgUnitOfWorkFactory {
    pool: PgPool,
}

impl PgUnitOfWorkFactory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl UnitOfWorkFactory for PgUnitOfWorkFactory {
    type UnitOfWork = PgUnitOfWork;

    fn create(&self) -> PgUnitOfWork {
        PgUnitOfWork::new(self.pool.clone())
    }
}
