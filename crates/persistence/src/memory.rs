use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use domain::AggregateRoot;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{PersistenceError, Result, UnitOfWork, UnitOfWorkFactory, UnitOfWorkState};

/// Named tables of JSON rows keyed by string.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    tables: BTreeMap<&'static str, BTreeMap<String, Value>>,
}

impl Tables {
    /// Returns a row by key.
    pub fn get(&self, table: &str, key: &str) -> Option<&Value> {
        self.tables.get(table).and_then(|rows| rows.get(key))
    }

    /// Inserts or replaces a row, returning the previous one.
    pub fn insert(&mut self, table: &'static str, key: impl Into<String>, row: Value) -> Option<Value> {
        self.tables.entry(table).or_default().insert(key.into(), row)
    }

    /// Removes a row, returning it.
    pub fn remove(&mut self, table: &str, key: &str) -> Option<Value> {
        self.tables.get_mut(table).and_then(|rows| rows.remove(key))
    }

    /// Removes every row of `table` matching the predicate.
    pub fn remove_where(&mut self, table: &str, mut predicate: impl FnMut(&str, &Value) -> bool) {
        if let Some(rows) = self.tables.get_mut(table) {
            rows.retain(|key, row| !predicate(key, row));
        }
    }

    /// Iterates the rows of a table in key order.
    pub fn rows(&self, table: &str) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.tables
            .get(table)
            .into_iter()
            .flat_map(|rows| rows.iter().map(|(key, row)| (key.as_str(), row)))
    }

    /// Number of rows in a table.
    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, BTreeMap::len)
    }

    /// `(table, key)` of every row that differs between `self` and `base`.
    fn changed_since(&self, base: &Tables) -> Vec<(&'static str, String)> {
        let empty = BTreeMap::new();
        let names: BTreeSet<&'static str> =
            self.tables.keys().chain(base.tables.keys()).copied().collect();

        let mut changed = Vec::new();
        for table in names {
            let mine = self.tables.get(table).unwrap_or(&empty);
            let before = base.tables.get(table).unwrap_or(&empty);
            let keys: BTreeSet<&String> = mine.keys().chain(before.keys()).collect();
            for key in keys {
                if mine.get(key) != before.get(key) {
                    changed.push((table, key.clone()));
                }
            }
        }
        changed
    }
}

#[derive(Debug, Default)]
struct DatabaseState {
    tables: Tables,
    version: u64,
    fail_next_commit: bool,
}

/// In-memory transactional store for testing.
///
/// Each transaction works on a private copy of the tables taken at begin.
/// Commit applies the rows the transaction changed. If another transaction
/// committed a change to any of those rows in between, the commit fails
/// with [`PersistenceError::Conflict`] and nothing is applied. Disjoint
/// writes commit independently.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    state: Arc<RwLock<DatabaseState>>,
}

impl InMemoryDatabase {
    /// Creates a new empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a transaction over a snapshot of the committed tables.
    pub async fn begin(&self) -> InMemoryTransaction {
        let state = self.state.read().await;
        InMemoryTransaction {
            base: state.tables.clone(),
            tables: state.tables.clone(),
        }
    }

    async fn commit(&self, mut tx: InMemoryTransaction) -> Result<()> {
        let mut state = self.state.write().await;

        if std::mem::take(&mut state.fail_next_commit) {
            return Err(PersistenceError::CommitFailed(
                "injected commit failure".to_string(),
            ));
        }

        let changed = tx.tables.changed_since(&tx.base);
        if changed.is_empty() {
            return Ok(());
        }
        if let Some((table, key)) = changed
            .iter()
            .find(|(table, key)| state.tables.get(table, key) != tx.base.get(table, key))
        {
            return Err(PersistenceError::Conflict(format!(
                "row {table}/{key} was changed by another transaction"
            )));
        }

        for (table, key) in changed {
            match tx.tables.remove(table, &key) {
                Some(row) => state.tables.insert(table, key, row),
                None => state.tables.remove(table, &key),
            };
        }
        state.version += 1;
        Ok(())
    }

    /// Makes the next commit fail, leaving the committed tables unchanged.
    pub async fn fail_next_commit(&self) {
        self.state.write().await.fail_next_commit = true;
    }

    /// Runs a read against the committed tables.
    pub async fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        let state = self.state.read().await;
        f(&state.tables)
    }

    /// Number of committed rows in a table.
    pub async fn row_count(&self, table: &str) -> usize {
        self.state.read().await.tables.len(table)
    }

    /// Number of successful commits that changed data.
    pub async fn version(&self) -> u64 {
        self.state.read().await.version
    }
}

/// Private working copy of the tables, used as the transaction handle.
#[derive(Debug)]
pub struct InMemoryTransaction {
    base: Tables,
    tables: Tables,
}

impl InMemoryTransaction {
    /// Tables as seen by this transaction, including its own writes.
    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Mutable access to the working copy.
    pub fn tables_mut(&mut self) -> &mut Tables {
        &mut self.tables
    }
}

/// [`UnitOfWork`] over an [`InMemoryDatabase`].
#[derive(Debug)]
pub struct InMemoryUnitOfWork {
    db: InMemoryDatabase,
    state: UnitOfWorkState,
    tx: Option<InMemoryTransaction>,
    aggregates: Vec<Box<dyn AggregateRoot>>,
}

impl InMemoryUnitOfWork {
    pub fn new(db: InMemoryDatabase) -> Self {
        Self {
            db,
            state: UnitOfWorkState::Idle,
            tx: None,
            aggregates: Vec::new(),
        }
    }

    fn discard(&mut self) {
        self.tx = None;
        self.aggregates.clear();
        self.state = UnitOfWorkState::RolledBack;
        metrics::counter!("uow_rollbacks_total", "store" => "memory").increment(1);
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    type Transaction = InMemoryTransaction;

    fn state(&self) -> UnitOfWorkState {
        self.state
    }

    async fn start(&mut self) -> Result<()> {
        self.state.check_start()?;
        self.tx = Some(self.db.begin().await);
        self.state = UnitOfWorkState::Active;
        Ok(())
    }

    fn transaction(&mut self) -> &mut InMemoryTransaction {
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

        match self.db.commit(tx).await {
            Ok(()) => {
                self.state = UnitOfWorkState::Committed;
                metrics::counter!("uow_commits_total", "store" => "memory").increment(1);
                debug!(aggregates = self.aggregates.len(), "In-memory transaction committed");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "In-memory commit failed, transaction discarded");
                self.discard();
                Err(e)
            }
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        self.state.check_active("rollback")?;
        self.discard();
        debug!("In-memory transaction rolled back");
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

/// Hands out [`InMemoryUnitOfWork`]s sharing one database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUnitOfWorkFactory {
    db: InMemoryDatabase,
}

impl InMemoryUnitOfWorkFactory {
    pub fn new(db: InMemoryDatabase) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &InMemoryDatabase {
        &self.db
    }
}

impl UnitOfWorkFactory for InMemoryUnitOfWorkFactory {
    type UnitOfWork = InMemoryUnitOfWork;

    fn create(&self) -> InMemoryUnitOfWork {
        InMemoryUnitOfWork::new(self.db.clone())
    }
}
