mod common;

use common::{al, context, setup, teardown, GRACE, STATE_ID};
use rowlock::classify::{FailureKind, Outcome};
use rowlock::engine::dialect::Dialect;
use rowlock::harness::{submit_in_new_transaction, with_worker};
use rowlock::model::RowRef;
use rowlock::service::respond;
use rowlock::transactions::lock::{LockDescriptor, LockMode};
use std::time::{Duration, Instant};

const PENDING: Duration = Duration::from_secs(5);

#[test]
fn test_transactional_service_waits_for_lock() {
    let ctx = context(Dialect::Postgres, None);
    let repo = ctx.repo;
    let service = ctx.service.clone();
    ctx.manager
        .run_isolated(
            setup,
            |tx| {
                repo.find_for_share_by_id(tx, STATE_ID)?.unwrap();
                with_worker(GRACE, |worker| {
                    let handle = worker.submit(move || service.delete_state(STATE_ID, false))?;
                    worker.shutdown();
                    let err = handle.get(PENDING).unwrap_err();
                    assert_eq!(err.to_string(), "no result within 5s");
                    assert!(!handle.is_done());
                    Ok(())
                })
            },
            teardown,
        )
        .unwrap();
    // the interrupted delete changed nothing
    assert_eq!(ctx.database.row_count(), 0);
}

#[test]
fn test_repository_call_in_new_transaction_waits_for_lock() {
    let ctx = context(Dialect::Postgres, None);
    let repo = ctx.repo;
    let outcome = ctx
        .manager
        .run_isolated(
            setup,
            |tx| {
                repo.find_for_share_by_id(tx, STATE_ID)?.unwrap();
                with_worker(GRACE, |worker| {
                    let handle = submit_in_new_transaction(worker, &ctx.manager, move |tx| {
                        repo.find_for_update_by_id(tx, STATE_ID)
                    })?;
                    worker.shutdown();
                    let desc = LockDescriptor::for_update();
                    Ok(Outcome::from_result(
                        handle.get(PENDING),
                        &*ctx.classifier,
                        &desc,
                    ))
                })
            },
            teardown,
        )
        .unwrap();
    assert_eq!(outcome.kind(), Some(FailureKind::HarnessTimeout));
}

#[test]
fn test_no_wait_delete_responds_with_problem() {
    let ctx = context(Dialect::Postgres, None);
    let repo = ctx.repo;
    let service = ctx.service.clone();
    let problem = ctx
        .manager
        .run_isolated(
            setup,
            |tx| {
                repo.find_for_share_by_id(tx, STATE_ID)?.unwrap();
                with_worker(GRACE, |worker| {
                    let handle = worker.submit(move || {
                        Ok(respond("/state/AL", service.delete_state(STATE_ID, true)))
                    })?;
                    Ok(handle.get(Duration::from_secs(5))?.unwrap_err())
                })
            },
            teardown,
        )
        .unwrap();
    assert_eq!(problem.status, 500);
    assert_eq!(problem.error, "Internal Server Error");
    assert_eq!(problem.path, "/state/AL");
    assert!(problem.to_json().unwrap().starts_with("{\"timestamp\":\""));
}

#[test]
fn test_end_transaction_in_middle_releases_lock() {
    let ctx = context(Dialect::Postgres, None);
    let repo = ctx.repo;
    let service = ctx.service.clone();
    let mut ambient = ctx.manager.start_test_transaction().unwrap();
    ctx.manager
        .run_using_ambient_transaction(
            &mut ambient,
            setup,
            |test_tx| {
                repo.find_for_share_by_id(test_tx.transaction()?, STATE_ID)?
                    .unwrap();
                with_worker(GRACE, |worker| {
                    let handle = worker.submit(move || service.delete_state(STATE_ID, false))?;
                    worker.shutdown();

                    assert!(handle.get(PENDING).is_err());
                    assert!(!handle.is_done());

                    test_tx.flag_for_rollback()?;
                    test_tx.end()?;
                    assert!(!test_tx.is_active());

                    let released = Instant::now();
                    handle.get(Duration::from_secs(1))?;
                    assert!(released.elapsed() < Duration::from_secs(1));

                    test_tx.start()?;
                    assert!(test_tx.is_flagged_for_rollback());
                    assert!(!repo.exists_by_id(test_tx.transaction()?, STATE_ID)?);
                    Ok(())
                })
            },
            teardown,
        )
        .unwrap();
    assert!(ambient.is_active());
}

#[test]
fn test_repeated_nowait_attempts_fail_alike() {
    let ctx = context(Dialect::Postgres, None);
    let repo = ctx.repo;
    let attempt = LockDescriptor::for_share().no_wait();
    let outcomes = ctx
        .manager
        .run_isolated(
            setup,
            |tx| {
                repo.lock(tx, &al(), &LockDescriptor::for_update())?;
                with_worker(GRACE, |worker| {
                    let mut outcomes = Vec::new();
                    for _ in 0..3 {
                        let handle = submit_in_new_transaction(worker, &ctx.manager, move |tx| {
                            repo.lock(tx, &al(), &attempt)
                        })?;
                        let result = handle.get(Duration::from_secs(1));
                        outcomes.push(Outcome::from_result(result, &*ctx.classifier, &attempt));
                    }
                    Ok(outcomes)
                })
            },
            teardown,
        )
        .unwrap();
    assert_eq!(outcomes.len(), 3);
    for outcome in outcomes.iter() {
        assert_eq!(outcome.kind(), Some(FailureKind::LockNotAvailable));
    }
}

#[test]
fn test_skip_locked_over_all_rows() {
    let ctx = context(Dialect::Postgres, None);
    let repo = ctx.repo;
    let attempt = LockDescriptor::for_update().skip_locked();
    let (total, locked) = ctx
        .manager
        .run_isolated(
            setup,
            |tx| {
                let total = repo.find_all(tx)?.len();
                repo.lock(tx, &al(), &LockDescriptor::for_update())?;
                with_worker(GRACE, |worker| {
                    let handle = submit_in_new_transaction(worker, &ctx.manager, move |tx| {
                        repo.lock(tx, &RowRef::all(), &attempt)
                    })?;
                    let started = Instant::now();
                    let locked = handle.get(Duration::from_secs(1))?;
                    assert!(started.elapsed() < Duration::from_secs(1));
                    Ok((total, locked))
                })
            },
            teardown,
        )
        .unwrap();
    assert_eq!(total, 51);
    assert_eq!(locked.len(), total - 1);
    assert!(locked.iter().all(|s| s.id != STATE_ID));
}

#[test]
fn test_release_wakes_blocked_waiter() {
    let ctx = context(Dialect::Postgres, None);
    ctx.fixtures.load_states().unwrap();
    let holder = ctx
        .manager
        .begin(rowlock::transactions::Propagation::RequiresNew)
        .unwrap();
    ctx.repo.lock(&holder, &al(), &LockDescriptor::for_share()).unwrap();
    let repo = ctx.repo;
    with_worker(GRACE, |worker| {
        let handle = submit_in_new_transaction(worker, &ctx.manager, move |tx| {
            repo.find_for_update_by_id(tx, STATE_ID)
        })?;
        assert!(handle.get(Duration::from_millis(300)).is_err());
        assert_eq!(
            ctx.database.lock_holders(STATE_ID),
            vec![(holder.id(), LockMode::Shared)]
        );
        holder.rollback()?;
        let row = handle.get(Duration::from_secs(1))?;
        assert_eq!(row.unwrap().id, STATE_ID);
        Ok(())
    })
    .unwrap();
    ctx.fixtures.purge_states().unwrap();
}
