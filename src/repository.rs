use crate::acquirer::RowLockAcquirer;
use crate::model::{CensusRegion, RowFilter, RowRef, State};
use crate::transactions::lock::LockDescriptor;
use crate::transactions::transaction::Transaction;
use crate::Result;
use std::time::Duration;

/// Lock timeout passed by `find_for_update_with_timeout_by_id`.
pub const LOCK_TIMEOUT_HINT: Duration = Duration::from_millis(2900);

/// Data access for the `state` table. Every call runs on the connection of
/// the given transaction.
#[derive(Debug, Clone, Copy)]
pub struct StateRepository {
    acquirer: RowLockAcquirer,
}

impl StateRepository {
    pub fn new(acquirer: RowLockAcquirer) -> StateRepository {
        StateRepository { acquirer }
    }

    pub fn acquirer(&self) -> &RowLockAcquirer {
        &self.acquirer
    }

    pub fn find_all(&self, tx: &Transaction) -> Result<Vec<State>> {
        tx.with_connection(|conn| conn.select(&RowFilter::All, None))
    }

    pub fn find_by_id(&self, tx: &Transaction, id: &str) -> Result<Option<State>> {
        let rows = tx.with_connection(|conn| conn.select(&RowFilter::Id(id.to_owned()), None))?;
        Ok(rows.into_iter().next())
    }

    pub fn exists_by_id(&self, tx: &Transaction, id: &str) -> Result<bool> {
        Ok(self.find_by_id(tx, id)?.is_some())
    }

    pub fn count_by_census_region(&self, tx: &Transaction, region: CensusRegion) -> Result<usize> {
        tx.with_connection(|conn| conn.count(&RowFilter::CensusRegion(region)))
    }

    /// Inserts `state`, or replaces the row with the same id.
    pub fn save(&self, tx: &Transaction, state: State) -> Result<State> {
        tx.with_connection(|conn| {
            if !conn.update(state.clone())? {
                conn.insert(state.clone())?;
            }
            Ok(state)
        })
    }

    pub fn delete_by_id(&self, tx: &Transaction, id: &str) -> Result<bool> {
        tx.with_connection(|conn| conn.delete(id))
    }

    pub fn delete_all(&self, tx: &Transaction) -> Result<usize> {
        tx.with_connection(|conn| conn.delete_where(&RowFilter::All))
    }

    pub fn lock(
        &self,
        tx: &Transaction,
        target: &RowRef,
        desc: &LockDescriptor,
    ) -> Result<Vec<State>> {
        self.acquirer.acquire(tx, target, desc)
    }

    pub fn find_for_update_by_id(&self, tx: &Transaction, id: &str) -> Result<Option<State>> {
        self.acquirer.acquire_one(tx, id, &LockDescriptor::for_update())
    }

    pub fn find_for_share_by_id(&self, tx: &Transaction, id: &str) -> Result<Option<State>> {
        self.acquirer.acquire_one(tx, id, &LockDescriptor::for_share())
    }

    pub fn find_for_update_no_wait_by_id(
        &self,
        tx: &Transaction,
        id: &str,
    ) -> Result<Option<State>> {
        self.acquirer
            .acquire_one(tx, id, &LockDescriptor::for_update().no_wait())
    }

    pub fn find_for_share_no_wait_by_id(
        &self,
        tx: &Transaction,
        id: &str,
    ) -> Result<Option<State>> {
        self.acquirer
            .acquire_one(tx, id, &LockDescriptor::for_share().no_wait())
    }

    pub fn find_for_update_skip_locked_by_id(
        &self,
        tx: &Transaction,
        id: &str,
    ) -> Result<Option<State>> {
        self.acquirer
            .acquire_one(tx, id, &LockDescriptor::for_update().skip_locked())
    }

    pub fn find_for_share_skip_locked_by_id(
        &self,
        tx: &Transaction,
        id: &str,
    ) -> Result<Option<State>> {
        self.acquirer
            .acquire_one(tx, id, &LockDescriptor::for_share().skip_locked())
    }

    pub fn find_for_update_with_timeout_by_id(
        &self,
        tx: &Transaction,
        id: &str,
    ) -> Result<Option<State>> {
        self.acquirer.acquire_one(
            tx,
            id,
            &LockDescriptor::for_update().with_timeout(LOCK_TIMEOUT_HINT),
        )
    }

    pub fn find_first_for_share_by_census_region(
        &self,
        tx: &Transaction,
        region: CensusRegion,
    ) -> Result<Option<State>> {
        let rows = self.acquirer.acquire(
            tx,
            &RowRef::region(region).limit(1),
            &LockDescriptor::for_share(),
        )?;
        Ok(rows.into_iter().next())
    }

    pub fn find_for_update_skip_locked_by_census_region(
        &self,
        tx: &Transaction,
        region: CensusRegion,
    ) -> Result<Vec<State>> {
        self.acquirer.acquire(
            tx,
            &RowRef::region(region),
            &LockDescriptor::for_update().skip_locked(),
        )
    }
}
