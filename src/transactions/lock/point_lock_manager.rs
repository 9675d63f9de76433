use crate::transactions::lock::row_lock::RowLock;
use crate::transactions::lock::{LockConflict, LockManager, LockMode, LockWait, RowKey};
use crate::transactions::TransactionID;
use dashmap::DashMap;
use std::sync::Arc;

/// Lock manager holding one [`RowLock`] per locked key.
pub struct PointLockManager {
    lock_map: DashMap<RowKey, Arc<RowLock>>,
}

impl PointLockManager {
    fn row_lock(&self, key: &RowKey) -> Arc<RowLock> {
        // the shard guard drops here, before the caller blocks on the row
        self.lock_map
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RowLock::default()))
            .value()
            .clone()
    }
}

impl LockManager for PointLockManager {
    fn new() -> Self {
        PointLockManager {
            lock_map: DashMap::with_capacity(16),
        }
    }

    fn lock(
        &self,
        txn_id: TransactionID,
        key: &RowKey,
        mode: LockMode,
        wait: LockWait,
    ) -> Result<(), LockConflict> {
        let row_lock = self.row_lock(key);
        let result = row_lock.acquire(txn_id, mode, wait);
        match &result {
            Ok(()) => trace!("txn {} locked `{}` ({:?})", txn_id, key, mode),
            Err(conflict) => debug!("txn {} could not lock `{}`: {:?}", txn_id, key, conflict),
        }
        result
    }

    fn unlock(&self, txn_id: TransactionID, key: &RowKey) {
        let row_lock = match self.lock_map.get(key) {
            Some(entry) => Arc::clone(entry.value()),
            None => return,
        };
        if row_lock.release(txn_id) {
            trace!("txn {} unlocked `{}`", txn_id, key);
        }
        drop(row_lock);
        // a lock still referenced outside the map may have a waiter
        self.lock_map.remove_if(key, |_, lock| {
            Arc::strong_count(lock) == 1 && lock.owners().is_empty()
        });
    }

    fn holders(&self, key: &RowKey) -> Vec<(TransactionID, LockMode)> {
        match self.lock_map.get(key) {
            Some(entry) => entry.value().owners(),
            None => Vec::new(),
        }
    }
}
