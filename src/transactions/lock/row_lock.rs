use crate::cancel::CancelToken;
use crate::transactions::lock::{LockConflict, LockMode, LockWait, LOCK_POLL_INTERVAL};
use crate::transactions::TransactionID;
use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

#[derive(Default)]
pub struct RowLock {
    pub inner: Mutex<RowLockInner>,
    released: Condvar,
}

#[derive(Default)]
pub struct RowLockInner {
    pub owners: HashMap<TransactionID, LockMode>,
}

impl RowLockInner {
    fn compatible(&self, txn_id: TransactionID, mode: LockMode) -> bool {
        self.owners
            .iter()
            .all(|(&owner, &held)| owner == txn_id || !mode.conflicts_with(held))
    }

    fn grant(&mut self, txn_id: TransactionID, mode: LockMode) {
        let held = self.owners.entry(txn_id).or_insert(mode);
        if mode == LockMode::Exclusive {
            *held = LockMode::Exclusive;
        }
    }
}

impl RowLock {
    pub fn acquire(
        &self,
        txn_id: TransactionID,
        mode: LockMode,
        wait: LockWait,
    ) -> Result<(), LockConflict> {
        let started = Instant::now();
        let mut guard = self.inner.lock().unwrap();
        loop {
            if guard.compatible(txn_id, mode) {
                guard.grant(txn_id, mode);
                return Ok(());
            }
            let slice = match wait {
                LockWait::Fail | LockWait::Skip => return Err(LockConflict::Busy),
                LockWait::Wait(None) => LOCK_POLL_INTERVAL,
                LockWait::Wait(Some(bound)) => {
                    let elapsed = started.elapsed();
                    if elapsed >= bound {
                        return Err(LockConflict::TimedOut(bound));
                    }
                    (bound - elapsed).min(LOCK_POLL_INTERVAL)
                }
            };
            if CancelToken::is_current_cancelled() {
                return Err(LockConflict::Cancelled);
            }
            guard = self.released.wait_timeout(guard, slice).unwrap().0;
        }
    }

    /// Returns true if `txn_id` held the lock.
    pub fn release(&self, txn_id: TransactionID) -> bool {
        let removed = self.inner.lock().unwrap().owners.remove(&txn_id).is_some();
        if removed {
            self.released.notify_all();
        }
        removed
    }

    pub fn owners(&self) -> Vec<(TransactionID, LockMode)> {
        let guard = self.inner.lock().unwrap();
        let mut owners: Vec<_> = guard.owners.iter().map(|(&t, &m)| (t, m)).collect();
        owners.sort_by_key(|(t, _)| *t);
        owners
    }
}
