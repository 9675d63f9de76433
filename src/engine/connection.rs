use crate::engine::dialect::Dialect;
use crate::engine::DatabaseInner;
use crate::error::LockingError;
use crate::model::{Column, RowFilter, State};
use crate::sql::{self, Statement};
use crate::transactions::lock::{
    LockConflict, LockDescriptor, LockManager, LockMode, LockWait, RowKey, WaitPolicy,
};
use crate::transactions::TransactionID;
use crate::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

struct EngineTxn {
    id: TransactionID,
    /// Buffered writes, applied on commit. `None` deletes the row.
    writes: BTreeMap<String, Option<State>>,
    locked: BTreeSet<RowKey>,
}

/// A session against a [`Database`](crate::engine::Database).
///
/// Statements issued outside an explicit transaction run in an implicit one
/// that commits when the statement ends. Reads see committed rows plus the
/// session's own uncommitted writes.
pub struct Connection {
    id: u64,
    db: Arc<DatabaseInner>,
    closed: bool,
    txn: Option<EngineTxn>,
}

impl Connection {
    pub(crate) fn new(id: u64, db: Arc<DatabaseInner>) -> Connection {
        Connection {
            id,
            db,
            closed: false,
            txn: None,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn dialect(&self) -> Dialect {
        self.db.dialect
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    pub fn transaction_id(&self) -> Option<TransactionID> {
        self.txn.as_ref().map(|t| t.id)
    }

    pub fn begin(&mut self) -> Result<TransactionID> {
        self.ensure_open()?;
        if let Some(txn) = &self.txn {
            return Err(LockingError::Custom(format!(
                "connection {} already runs transaction {}",
                self.id, txn.id
            )));
        }
        let id = self.db.next_txn_id();
        self.txn = Some(EngineTxn {
            id,
            writes: BTreeMap::new(),
            locked: BTreeSet::new(),
        });
        debug!("connection {}: begin txn {}", self.id, id);
        Ok(id)
    }

    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        let txn = self.txn.take().ok_or_else(|| self.no_transaction())?;
        {
            let mut table = self.db.table.write().unwrap();
            for (id, row) in txn.writes {
                match row {
                    Some(state) => {
                        table.insert(id, state);
                    }
                    None => {
                        table.remove(&id);
                    }
                }
            }
        }
        self.release_locks(txn.id, &txn.locked);
        debug!("connection {}: commit txn {}", self.id, txn.id);
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        let txn = self.txn.take().ok_or_else(|| self.no_transaction())?;
        self.release_locks(txn.id, &txn.locked);
        debug!("connection {}: rollback txn {}", self.id, txn.id);
        Ok(())
    }

    /// Closes the session, abandoning any open transaction.
    pub fn close(&mut self) {
        if let Some(txn) = self.txn.take() {
            self.release_locks(txn.id, &txn.locked);
        }
        self.closed = true;
    }

    pub fn select(&mut self, filter: &RowFilter, limit: Option<usize>) -> Result<Vec<State>> {
        self.ensure_open()?;
        let mut rows = self.visible(filter);
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    pub fn count(&mut self, filter: &RowFilter) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.visible(filter).len())
    }

    /// Locking read. `desc` is the lock as requested by the caller; the
    /// dialect decides what the engine really does with it.
    pub fn select_for(
        &mut self,
        filter: &RowFilter,
        limit: Option<usize>,
        desc: &LockDescriptor,
    ) -> Result<Vec<State>> {
        let effective = self.db.dialect.effective(desc);
        if effective != *desc {
            debug!(
                "connection {}: {} runs `{}` as `{}`",
                self.id, self.db.dialect, desc, effective
            );
        }
        self.autocommit(|conn| conn.lock_rows(filter, limit, &effective))
    }

    pub fn insert(&mut self, state: State) -> Result<()> {
        state.validate()?;
        self.autocommit(|conn| {
            let wait = conn.write_wait();
            conn.lock_row(&state.id, LockMode::Exclusive, wait)?;
            if conn.visible_row(&state.id).is_some() {
                return Err(conn.db.dialect.duplicate_key("pkey", &state.id).into());
            }
            conn.check_unique_columns(&state)?;
            conn.stage(state.id.clone(), Some(state));
            Ok(())
        })
    }

    /// Returns false if the row does not exist.
    pub fn update(&mut self, state: State) -> Result<bool> {
        state.validate()?;
        self.autocommit(|conn| {
            let wait = conn.write_wait();
            conn.lock_row(&state.id, LockMode::Exclusive, wait)?;
            if conn.visible_row(&state.id).is_none() {
                return Ok(false);
            }
            conn.check_unique_columns(&state)?;
            conn.stage(state.id.clone(), Some(state));
            Ok(true)
        })
    }

    /// Returns false if the row does not exist.
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        self.autocommit(|conn| {
            if conn.visible_row(id).is_none() {
                return Ok(false);
            }
            let wait = conn.write_wait();
            conn.lock_row(id, LockMode::Exclusive, wait)?;
            // deleted by the previous holder
            if conn.visible_row(id).is_none() {
                return Ok(false);
            }
            conn.stage(id.to_owned(), None);
            Ok(true)
        })
    }

    pub fn delete_where(&mut self, filter: &RowFilter) -> Result<usize> {
        self.autocommit(|conn| {
            let mut deleted = 0;
            for state in conn.visible(filter) {
                if conn.delete(&state.id)? {
                    deleted += 1;
                }
            }
            Ok(deleted)
        })
    }

    pub fn update_where(
        &mut self,
        filter: &RowFilter,
        assignments: &[(Column, String)],
    ) -> Result<usize> {
        if assignments.iter().any(|(column, _)| *column == Column::Id) {
            return Err(LockingError::Validation(
                "primary key `id` cannot be updated".to_owned(),
            ));
        }
        self.autocommit(|conn| {
            let mut updated = 0;
            for mut state in conn.visible(filter) {
                for (column, value) in assignments {
                    state.set(*column, value)?;
                }
                if conn.update(state)? {
                    updated += 1;
                }
            }
            Ok(updated)
        })
    }

    /// Executes one SQL statement and returns the number of affected rows.
    pub fn execute(&mut self, sql: &str) -> Result<usize> {
        let statement = sql::parse_statement(sql)?;
        self.execute_statement(&statement)
    }

    pub fn execute_statement(&mut self, statement: &Statement) -> Result<usize> {
        debug!("connection {}: {:?}", self.id, statement);
        match statement {
            Statement::Insert { columns, rows } => self.autocommit(|conn| {
                for values in rows {
                    let pairs: Vec<(Column, String)> = columns
                        .iter()
                        .copied()
                        .zip(values.iter().cloned())
                        .collect();
                    conn.insert(State::from_columns(&pairs)?)?;
                }
                Ok(rows.len())
            }),
            Statement::Delete { filter } => self.delete_where(filter),
            Statement::Update {
                assignments,
                filter,
            } => self.update_where(filter, assignments),
        }
    }

    fn lock_rows(
        &mut self,
        filter: &RowFilter,
        limit: Option<usize>,
        desc: &LockDescriptor,
    ) -> Result<Vec<State>> {
        let wait = match desc.wait_policy {
            WaitPolicy::BlockIndefinitely => self.write_wait(),
            WaitPolicy::NoWait => LockWait::Fail,
            WaitPolicy::SkipLocked => LockWait::Skip,
            WaitPolicy::Timeout(timeout) => LockWait::Wait(Some(timeout)),
        };
        let limit = limit.unwrap_or(usize::MAX);
        let mut rows = Vec::new();
        for candidate in self.visible(filter) {
            if rows.len() >= limit {
                break;
            }
            if !self.lock_row(&candidate.id, desc.mode, wait)? {
                continue;
            }
            // the row may have changed while this session waited for it
            if let Some(current) = self.visible_row(&candidate.id) {
                if filter.matches(&current) {
                    rows.push(current);
                }
            }
        }
        Ok(rows)
    }

    /// Returns false if the row was skipped.
    fn lock_row(&mut self, key: &str, mode: LockMode, wait: LockWait) -> Result<bool> {
        let txn_id = self
            .transaction_id()
            .ok_or_else(|| self.no_transaction())?;
        let key = key.to_owned();
        match self.db.lock_manager.lock(txn_id, &key, mode, wait) {
            Ok(()) => {
                if let Some(txn) = self.txn.as_mut() {
                    txn.locked.insert(key);
                }
                Ok(true)
            }
            Err(LockConflict::Busy) if wait == LockWait::Skip => Ok(false),
            Err(LockConflict::Busy) => Err(self.db.dialect.lock_not_available().into()),
            Err(LockConflict::TimedOut(waited)) => {
                let err = self.db.dialect.lock_wait_timeout();
                if self.db.dialect.closes_connection_on_lock_timeout() {
                    warn!(
                        "connection {}: {} closes the session after waiting {:?} for `{}`",
                        self.id, self.db.dialect, waited, key
                    );
                    self.close();
                }
                Err(err.into())
            }
            Err(LockConflict::Cancelled) => {
                debug!("connection {}: lock wait on `{}` interrupted", self.id, key);
                Err(self.db.dialect.query_cancelled().into())
            }
        }
    }

    fn write_wait(&self) -> LockWait {
        LockWait::Wait(self.db.lock_wait_timeout)
    }

    fn stage(&mut self, id: String, row: Option<State>) {
        if let Some(txn) = self.txn.as_mut() {
            txn.writes.insert(id, row);
        }
    }

    /// Unique values are locked like rows, so a concurrent writer of the same
    /// value waits for this transaction and then sees its committed row.
    fn check_unique_columns(&mut self, state: &State) -> Result<()> {
        for column in Column::ALL.iter().filter(|c| c.is_unique() && **c != Column::Id) {
            let value = state.get(*column);
            let wait = self.write_wait();
            self.lock_row(&unique_key(*column, &value), LockMode::Exclusive, wait)?;
            let taken = self
                .visible(&RowFilter::Column(*column, value.clone()))
                .iter()
                .any(|other| other.id != state.id);
            if taken {
                return Err(self.db.dialect.duplicate_key(column.name(), &value).into());
            }
        }
        Ok(())
    }

    fn visible(&self, filter: &RowFilter) -> Vec<State> {
        let mut rows: BTreeMap<String, State> = {
            let table = self.db.table.read().unwrap();
            table
                .values()
                .filter(|s| filter.matches(s))
                .map(|s| (s.id.clone(), s.clone()))
                .collect()
        };
        if let Some(txn) = &self.txn {
            for (id, row) in txn.writes.iter() {
                match row {
                    Some(state) if filter.matches(state) => {
                        rows.insert(id.clone(), state.clone());
                    }
                    _ => {
                        rows.remove(id);
                    }
                }
            }
        }
        rows.into_iter().map(|(_, state)| state).collect()
    }

    fn visible_row(&self, id: &str) -> Option<State> {
        if let Some(txn) = &self.txn {
            if let Some(row) = txn.writes.get(id) {
                return row.clone();
            }
        }
        self.db.table.read().unwrap().get(id).cloned()
    }

    fn autocommit<R>(&mut self, f: impl FnOnce(&mut Connection) -> Result<R>) -> Result<R> {
        self.ensure_open()?;
        if self.txn.is_some() {
            return f(self);
        }
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if !self.closed {
                    if let Err(rollback) = self.rollback() {
                        warn!("connection {}: implicit rollback failed: {}", self.id, rollback);
                    }
                }
                Err(e)
            }
        }
    }

    fn release_locks(&self, txn_id: TransactionID, keys: &BTreeSet<RowKey>) {
        for key in keys {
            self.db.lock_manager.unlock(txn_id, key);
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(self.db.dialect.connection_closed().into())
        } else {
            Ok(())
        }
    }

    fn no_transaction(&self) -> LockingError {
        LockingError::Custom(format!(
            "connection {} has no active transaction",
            self.id
        ))
    }
}

fn unique_key(column: Column, value: &str) -> RowKey {
    format!("{}={}", column.name(), value)
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            warn!(
                "connection {} dropped inside txn {}, rolling back",
                self.id, txn.id
            );
            self.release_locks(txn.id, &txn.locked);
        }
    }
}
