#![allow(dead_code)]

use rowlock::classify::{FailureKind, Outcome};
use rowlock::engine::dialect::Dialect;
use rowlock::fixture::{run_script, PURGE_STATES, SETUP_STATES};
use rowlock::harness::{submit_in_new_transaction, with_worker};
use rowlock::model::{RowRef, State};
use rowlock::options::EngineOptions;
use rowlock::transactions::lock::LockDescriptor;
use rowlock::transactions::transaction::Transaction;
use rowlock::{LockingContext, Result};
use std::time::Duration;

pub const STATE_ID: &str = "AL";
pub const GRACE: Duration = Duration::from_secs(5);

pub fn context(dialect: Dialect, lock_wait_timeout: Option<Duration>) -> LockingContext {
    let _ = env_logger::try_init();
    let mut options = EngineOptions::new(dialect);
    options.lock_wait_timeout = lock_wait_timeout;
    LockingContext::open(options).unwrap()
}

pub fn al() -> RowRef {
    RowRef::id(STATE_ID)
}

pub fn setup(tx: &Transaction) -> Result<()> {
    run_script(tx, SETUP_STATES).map(drop)
}

pub fn teardown(tx: &Transaction) -> Result<()> {
    run_script(tx, PURGE_STATES).map(drop)
}

pub struct Contention {
    pub outcome: Outcome,
    pub elapsed: Duration,
    pub done: bool,
}

impl Contention {
    pub fn kind(&self) -> Option<FailureKind> {
        self.outcome.kind()
    }
}

/// Locks `AL` with `hold` in the test transaction, then runs `attempt` on a
/// worker in a new transaction and waits at most `wait` for it.
pub fn contend<R, F>(
    ctx: &LockingContext,
    hold: LockDescriptor,
    attempt: LockDescriptor,
    work: F,
    wait: Duration,
) -> Contention
where
    R: IntoIterator<Item = State> + Send + 'static,
    F: FnOnce(&Transaction) -> Result<R> + Send + 'static,
{
    let repo = ctx.repo;
    ctx.manager
        .run_isolated(
            setup,
            |tx| {
                let held = repo.lock(tx, &al(), &hold)?;
                assert_eq!(held.len(), 1);
                with_worker(GRACE, |worker| {
                    let handle = submit_in_new_transaction(worker, &ctx.manager, work)?;
                    worker.shutdown();
                    let result = handle.get(wait);
                    let done = handle.is_done();
                    Ok(Contention {
                        outcome: Outcome::from_result(result, &*ctx.classifier, &attempt),
                        elapsed: handle.elapsed(),
                        done,
                    })
                })
            },
            teardown,
        )
        .unwrap()
}

/// [`contend`] with the repository's lock call for `attempt` on `AL`.
pub fn contend_for(
    ctx: &LockingContext,
    hold: LockDescriptor,
    attempt: LockDescriptor,
    wait: Duration,
) -> Contention {
    let repo = ctx.repo;
    contend(
        ctx,
        hold,
        attempt,
        move |tx| repo.lock(tx, &al(), &attempt),
        wait,
    )
}

pub fn assert_between(elapsed: Duration, min: Duration, max: Duration) {
    assert!(
        elapsed >= min && elapsed <= max,
        "{:?} not within [{:?}, {:?}]",
        elapsed,
        min,
        max
    );
}
