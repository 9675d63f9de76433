//! Runs units of work on a second thread, each in its own transaction, while
//! the calling thread holds locks.
//!
//! ```no_run
//! # use rowlock::harness::{submit_in_new_transaction, with_default_worker};
//! # use rowlock::transactions::manager::TransactionManager;
//! # use rowlock::repository::StateRepository;
//! # use std::time::Duration;
//! # fn scenario(manager: &TransactionManager, repo: StateRepository) -> rowlock::Result<()> {
//! with_default_worker(|worker| {
//!     let handle = submit_in_new_transaction(worker, manager, move |tx| {
//!         repo.find_for_update_by_id(tx, "AL")
//!     })?;
//!     worker.shutdown();
//!     assert!(handle.get(Duration::from_secs(5)).is_err());
//!     Ok(())
//! })
//! # }
//! ```

pub mod worker;

pub use worker::{TaskHandle, Worker};

use crate::options::HarnessOptions;
use crate::transactions::manager::TransactionManager;
use crate::transactions::transaction::Transaction;
use crate::transactions::{Completion, Propagation};
use crate::Result;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

/// Runs `body` with a fresh worker and always shuts the worker down
/// afterwards, waiting at most `grace` for it to terminate.
pub fn with_worker<R>(grace: Duration, body: impl FnOnce(&Worker) -> Result<R>) -> Result<R> {
    let options = HarnessOptions {
        shutdown_grace: grace,
        ..HarnessOptions::default()
    };
    with_worker_options(&options, body)
}

pub fn with_default_worker<R>(body: impl FnOnce(&Worker) -> Result<R>) -> Result<R> {
    with_worker_options(&HarnessOptions::default(), body)
}

pub fn with_worker_options<R>(
    options: &HarnessOptions,
    body: impl FnOnce(&Worker) -> Result<R>,
) -> Result<R> {
    let worker = Worker::spawn(&options.worker_name)?;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(&worker)));
    worker.shutdown_now();
    if !worker.await_termination(options.shutdown_grace) {
        warn!(
            "worker `{}` did not terminate within {:?}",
            worker.name(),
            options.shutdown_grace
        );
    }
    match outcome {
        Ok(result) => result,
        Err(payload) => panic::resume_unwind(payload),
    }
}

/// Submits `work` to run on `worker` in a new transaction that is rolled
/// back when `work` returns.
pub fn submit_in_new_transaction<T, F>(
    worker: &Worker,
    manager: &TransactionManager,
    work: F,
) -> Result<TaskHandle<T>>
where
    T: Send + 'static,
    F: FnOnce(&Transaction) -> Result<T> + Send + 'static,
{
    submit_in_new_transaction_with(worker, manager, Completion::Rollback, work)
}

pub fn submit_in_new_transaction_with<T, F>(
    worker: &Worker,
    manager: &TransactionManager,
    completion: Completion,
    work: F,
) -> Result<TaskHandle<T>>
where
    T: Send + 'static,
    F: FnOnce(&Transaction) -> Result<T> + Send + 'static,
{
    let manager = manager.clone();
    worker.submit(move || manager.execute(Propagation::RequiresNew, completion, work))
}

#[cfg(test)]
mod tests {
    use crate::engine::dialect::Dialect;
    use crate::engine::pool::ConnectionPool;
    use crate::engine::Database;
    use crate::error::LockingError;
    use crate::harness::{submit_in_new_transaction, submit_in_new_transaction_with, with_worker};
    use crate::model::{CensusRegion, RowFilter, State};
    use crate::options::EngineOptions;
    use crate::transactions::lock::LockDescriptor;
    use crate::transactions::manager::TransactionManager;
    use crate::transactions::{Completion, Propagation};
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn manager() -> (Database, TransactionManager) {
        let options = EngineOptions::new(Dialect::Postgres);
        let db = Database::open(&options);
        let pool = ConnectionPool::new(Arc::new(db.clone()), &options).unwrap();
        let manager = TransactionManager::new(pool);
        manager
            .execute(Propagation::RequiresNew, Completion::Commit, |tx| {
                tx.with_connection(|conn| {
                    conn.insert(State::new("AL", "Alabama", "01", "Ala.", CensusRegion::South))
                })
            })
            .unwrap();
        (db, manager)
    }

    #[test]
    fn test_rolls_back_by_default() {
        let _ = env_logger::try_init();
        let (db, manager) = manager();
        with_worker(Duration::from_secs(1), |worker| {
            let handle = submit_in_new_transaction(worker, &manager, |tx| {
                tx.with_connection(|conn| conn.delete("AL"))
            })?;
            assert!(handle.get(Duration::from_secs(1))?);
            assert_eq!(db.row_count(), 1);

            let handle = submit_in_new_transaction_with(
                worker,
                &manager,
                Completion::Commit,
                |tx| tx.with_connection(|conn| conn.delete("AL")),
            )?;
            assert!(handle.get(Duration::from_secs(1))?);
            assert_eq!(db.row_count(), 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_interrupts_blocked_wait() {
        let (db, manager) = manager();
        let holder = manager.begin(Propagation::RequiresNew).unwrap();
        holder
            .with_connection(|conn| {
                conn.select_for(&RowFilter::Id("AL".into()), None, &LockDescriptor::for_share())
            })
            .unwrap();

        let started = Instant::now();
        let result = with_worker(Duration::from_secs(1), |worker| {
            let handle = submit_in_new_transaction(worker, &manager, |tx| {
                tx.with_connection(|conn| {
                    conn.select_for(&RowFilter::Id("AL".into()), None, &LockDescriptor::for_update())
                })
            })?;
            worker.shutdown();
            assert_eq!(
                handle.get(Duration::from_millis(300)).err(),
                Some(LockingError::HarnessTimeout(Duration::from_millis(300)))
            );
            assert!(!handle.is_done());
            Ok(handle)
        });
        // shutdown interrupted the wait well before the grace period
        assert!(started.elapsed() < Duration::from_secs(1));
        let handle = result.unwrap();
        assert!(handle.is_done());
        let err = handle.get(Duration::from_millis(10)).unwrap_err();
        assert_eq!(err.db_error().unwrap().sql_state, "57014");
        assert_eq!(db.lock_holders("AL").len(), 1);
        holder.rollback().unwrap();
    }

    #[test]
    fn test_panic_in_body_shuts_worker_down() {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            with_worker(Duration::from_secs(1), |worker| -> crate::Result<()> {
                worker.submit(|| Ok(()))?;
                panic!("scenario failed")
            })
        }));
        assert!(result.is_err());
    }
}
