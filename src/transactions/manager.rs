use crate::engine::pool::ConnectionPool;
use crate::error::LockingError;
use crate::transactions::transaction::Transaction;
use crate::transactions::{Completion, Propagation};
use crate::Result;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

/// Begins and ends transactions against one connection pool.
#[derive(Clone)]
pub struct TransactionManager {
    pool: ConnectionPool,
}

impl TransactionManager {
    pub fn new(pool: ConnectionPool) -> TransactionManager {
        TransactionManager { pool }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn begin(&self, propagation: Propagation) -> Result<Transaction> {
        Transaction::begin(&self.pool, propagation)
    }

    /// Runs `work` in a transaction and ends it according to `completion`.
    ///
    /// A failed `work` always rolls back. If that rollback fails too, both
    /// errors are returned in `RollbackFailed`.
    pub fn execute<T>(
        &self,
        propagation: Propagation,
        completion: Completion,
        work: impl FnOnce(&Transaction) -> Result<T>,
    ) -> Result<T> {
        let tx = self.begin(propagation)?;
        match work(&tx) {
            Ok(value) => {
                match completion {
                    Completion::Commit => tx.commit()?,
                    Completion::Rollback => tx.rollback()?,
                }
                Ok(value)
            }
            Err(original) => match tx.rollback() {
                Ok(()) => Err(original),
                Err(rollback) => Err(LockingError::RollbackFailed {
                    rollback: Box::new(rollback),
                    original: Box::new(original),
                }),
            },
        }
    }

    /// Runs `setup` and `teardown` in their own committed transactions and
    /// `test` in a fresh transaction that is always rolled back.
    ///
    /// `teardown` runs whatever happened before it. The first failure is
    /// returned; a panic in `setup` or `test` resumes after `teardown`.
    pub fn run_isolated<T>(
        &self,
        setup: impl FnOnce(&Transaction) -> Result<()>,
        test: impl FnOnce(&Transaction) -> Result<T>,
        teardown: impl FnOnce(&Transaction) -> Result<()>,
    ) -> Result<T> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(Propagation::RequiresNew, Completion::Commit, setup)?;
            self.execute(Propagation::RequiresNew, Completion::Rollback, test)
        }));
        let cleanup = self.execute(Propagation::RequiresNew, Completion::Commit, teardown);
        finish(outcome, cleanup)
    }

    /// Begins the ambient test transaction for the current thread.
    pub fn start_test_transaction(&self) -> Result<TestTransaction> {
        let mut test_tx = TestTransaction {
            manager: self.clone(),
            current: None,
            flagged: Completion::Rollback,
        };
        test_tx.start()?;
        Ok(test_tx)
    }

    /// Like [`run_isolated`](Self::run_isolated), but `test` runs inside the
    /// already open `ambient` test transaction and may end or restart it.
    ///
    /// If `test` fails or panics while the ambient transaction is still
    /// active, it is ended before `teardown` so that teardown does not wait
    /// on the test's own locks.
    pub fn run_using_ambient_transaction<T>(
        &self,
        ambient: &mut TestTransaction,
        setup: impl FnOnce(&Transaction) -> Result<()>,
        test: impl FnOnce(&mut TestTransaction) -> Result<T>,
        teardown: impl FnOnce(&Transaction) -> Result<()>,
    ) -> Result<T> {
        if !ambient.is_active() {
            return Err(LockingError::NoAmbientTransaction);
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.execute(Propagation::RequiresNew, Completion::Commit, setup)?;
            test(&mut *ambient)
        }));
        if !matches!(outcome, Ok(Ok(_))) && ambient.is_active() {
            if let Err(e) = ambient.end() {
                warn!("cannot end test transaction: {}", e);
            }
        }
        let cleanup = self.execute(Propagation::RequiresNew, Completion::Commit, teardown);
        finish(outcome, cleanup)
    }
}

fn finish<T>(outcome: thread::Result<Result<T>>, cleanup: Result<()>) -> Result<T> {
    match outcome {
        Ok(Ok(value)) => cleanup.map(|_| value),
        Ok(Err(e)) => {
            if let Err(teardown) = cleanup {
                warn!("teardown failed after `{}`: {}", e, teardown);
            }
            Err(e)
        }
        Err(payload) => {
            if let Err(teardown) = cleanup {
                warn!("teardown failed after panic: {}", teardown);
            }
            panic::resume_unwind(payload)
        }
    }
}

/// Control over the ambient test transaction of a scenario.
///
/// The transaction is rolled back when it ends unless flagged for commit.
pub struct TestTransaction {
    manager: TransactionManager,
    current: Option<Transaction>,
    flagged: Completion,
}

impl TestTransaction {
    pub fn is_active(&self) -> bool {
        self.current.as_ref().map_or(false, Transaction::is_active)
    }

    pub fn transaction(&self) -> Result<&Transaction> {
        self.current
            .as_ref()
            .filter(|tx| tx.is_active())
            .ok_or(LockingError::NoAmbientTransaction)
    }

    pub fn flag_for_rollback(&mut self) -> Result<()> {
        self.transaction()?;
        self.flagged = Completion::Rollback;
        Ok(())
    }

    pub fn flag_for_commit(&mut self) -> Result<()> {
        self.transaction()?;
        self.flagged = Completion::Commit;
        Ok(())
    }

    pub fn is_flagged_for_rollback(&self) -> bool {
        self.flagged == Completion::Rollback
    }

    /// Ends the transaction now, releasing every lock it holds.
    pub fn end(&mut self) -> Result<()> {
        let tx = match self.current.take() {
            Some(tx) if tx.is_active() => tx,
            _ => return Err(LockingError::NoAmbientTransaction),
        };
        debug!("end test transaction {} ({:?})", tx.id(), self.flagged);
        match self.flagged {
            Completion::Commit => tx.commit(),
            Completion::Rollback => tx.rollback(),
        }
    }

    /// Begins a new test transaction, flagged for rollback.
    pub fn start(&mut self) -> Result<()> {
        if self.is_active() {
            return Err(LockingError::Custom(
                "test transaction is already active".to_owned(),
            ));
        }
        self.current = Some(self.manager.begin(Propagation::RequiresNew)?);
        self.flagged = Completion::Rollback;
        Ok(())
    }
}

impl Drop for TestTransaction {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(e) = self.end() {
                warn!("{}", e);
            }
        }
    }
}
