//! Locking reads against the connection of an active transaction.

use crate::engine::dialect::{Capabilities, Dialect};
use crate::error::LockingError;
use crate::model::{RowRef, State};
use crate::options::EngineOptions;
use crate::transactions::lock::LockDescriptor;
use crate::transactions::transaction::Transaction;
use crate::Result;

const SELECT_COLUMNS: &str = "s.id, s.abbr, s.census_region, s.code, s.name";

/// A locking read as the engine will receive it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatement {
    pub sql: String,
    pub requested: LockDescriptor,
    /// What the engine really does with `requested`.
    pub effective: LockDescriptor,
}

impl LockStatement {
    pub fn is_degraded(&self) -> bool {
        self.requested != self.effective
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RowLockAcquirer {
    dialect: Dialect,
    strict: bool,
}

impl RowLockAcquirer {
    pub fn new(options: &EngineOptions) -> RowLockAcquirer {
        RowLockAcquirer {
            dialect: options.dialect,
            strict: options.strict_capabilities,
        }
    }

    #[inline]
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    #[inline]
    pub fn capabilities(&self) -> Capabilities {
        self.dialect.capabilities()
    }

    pub fn statement(&self, target: &RowRef, desc: &LockDescriptor) -> LockStatement {
        let mut sql = format!(
            "select {} from state s where {}",
            SELECT_COLUMNS,
            target.filter.to_sql()
        );
        if let Some(limit) = target.limit {
            sql.push_str(&format!(" limit {}", limit));
        }
        sql.push(' ');
        sql.push_str(&self.dialect.lock_clause(desc));
        LockStatement {
            sql,
            requested: *desc,
            effective: self.dialect.effective(desc),
        }
    }

    /// Locks the rows selected by `target` for the rest of `tx`.
    ///
    /// The descriptor reaches the engine unchanged. Requests the engine does
    /// not honor are logged, or refused with `Unsupported` in strict mode.
    pub fn acquire(
        &self,
        tx: &Transaction,
        target: &RowRef,
        desc: &LockDescriptor,
    ) -> Result<Vec<State>> {
        let statement = self.statement(target, desc);
        if !self.capabilities().supports(desc) {
            if self.strict {
                return Err(LockingError::Unsupported {
                    descriptor: *desc,
                    dialect: self.dialect,
                });
            }
            warn!(
                "{} does not support `{}`, engine runs `{}`",
                self.dialect, desc, statement.effective
            );
        }
        debug!("txn {}: {}", tx.id(), statement.sql);
        tx.with_connection(|conn| conn.select_for(&target.filter, target.limit, desc))
    }

    /// Locks the row with primary key `id`, if it exists and was not skipped.
    pub fn acquire_one(
        &self,
        tx: &Transaction,
        id: &str,
        desc: &LockDescriptor,
    ) -> Result<Option<State>> {
        Ok(self.acquire(tx, &RowRef::id(id), desc)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use crate::acquirer::RowLockAcquirer;
    use crate::engine::dialect::Dialect;
    use crate::engine::pool::ConnectionPool;
    use crate::engine::Database;
    use crate::error::LockingError;
    use crate::model::{CensusRegion, RowRef, State};
    use crate::options::EngineOptions;
    use crate::transactions::lock::{LockDescriptor, LockMode};
    use crate::transactions::manager::TransactionManager;
    use crate::transactions::{Completion, Propagation};
    use std::sync::Arc;
    use std::time::Duration;

    fn setup(options: &EngineOptions) -> (Database, TransactionManager) {
        let db = Database::open(options);
        let pool = ConnectionPool::new(Arc::new(db.clone()), options).unwrap();
        let manager = TransactionManager::new(pool);
        manager
            .execute(Propagation::RequiresNew, Completion::Commit, |tx| {
                tx.with_connection(|conn| {
                    conn.insert(State::new("AL", "Alabama", "01", "Ala.", CensusRegion::South))?;
                    conn.insert(State::new("AR", "Arkansas", "05", "Ark.", CensusRegion::South))?;
                    conn.insert(State::new("OR", "Oregon", "41", "Ore.", CensusRegion::West))
                })
            })
            .unwrap();
        (db, manager)
    }

    #[test]
    fn test_statement() {
        let acquirer = RowLockAcquirer::new(&EngineOptions::new(Dialect::Postgres));
        let statement = acquirer.statement(
            &RowRef::id("AL"),
            &LockDescriptor::for_update().with_timeout(Duration::from_millis(2900)),
        );
        assert_eq!(
            statement.sql,
            "select s.id, s.abbr, s.census_region, s.code, s.name from state s \
             where s.id = 'AL' for update /* TIMEOUT(2900ms) ignored */"
        );
        assert!(statement.is_degraded());

        let acquirer = RowLockAcquirer::new(&EngineOptions::new(Dialect::MySql57));
        let statement = acquirer.statement(
            &RowRef::region(CensusRegion::West).limit(1),
            &LockDescriptor::for_share(),
        );
        assert!(statement
            .sql
            .ends_with("where s.census_region = 'WEST' limit 1 lock in share mode"));
        assert!(!statement.is_degraded());
    }

    #[test]
    fn test_acquire_holds_until_termination() {
        let options = EngineOptions::new(Dialect::Postgres);
        let (db, manager) = setup(&options);
        let acquirer = RowLockAcquirer::new(&options);

        let tx = manager.begin(Propagation::RequiresNew).unwrap();
        let rows = acquirer
            .acquire(&tx, &RowRef::region(CensusRegion::South), &LockDescriptor::for_share())
            .unwrap();
        assert_eq!(rows.len(), 2);
        // re-entrant
        assert!(acquirer
            .acquire_one(&tx, "AL", &LockDescriptor::for_share())
            .unwrap()
            .is_some());
        // sole holder upgrades
        assert!(acquirer
            .acquire_one(&tx, "AL", &LockDescriptor::for_update().no_wait())
            .unwrap()
            .is_some());
        assert_eq!(db.lock_holders("AL"), vec![(tx.id(), LockMode::Exclusive)]);
        assert_eq!(db.lock_holders("AR"), vec![(tx.id(), LockMode::Shared)]);
        assert!(acquirer
            .acquire_one(&tx, "ZZ", &LockDescriptor::for_update())
            .unwrap()
            .is_none());
        tx.rollback().unwrap();
        assert!(db.lock_holders("AL").is_empty());
        assert!(db.lock_holders("AR").is_empty());
    }

    #[test]
    fn test_strict_capabilities() {
        let options = EngineOptions::new(Dialect::MySql57).strict();
        let (_db, manager) = setup(&options);
        let acquirer = RowLockAcquirer::new(&options);
        let tx = manager.begin(Propagation::RequiresNew).unwrap();
        let desc = LockDescriptor::for_update().skip_locked();
        assert_eq!(
            acquirer.acquire(&tx, &RowRef::all(), &desc),
            Err(LockingError::Unsupported {
                descriptor: desc,
                dialect: Dialect::MySql57,
            })
        );
        // honored requests still pass
        assert_eq!(
            acquirer
                .acquire(&tx, &RowRef::all(), &LockDescriptor::for_update())
                .unwrap()
                .len(),
            3
        );
    }
}
