use rayon::prelude::*;
use rowlock::classify::Outcome;
use rowlock::engine::dialect::Dialect;
use rowlock::fixture::{run_script, PURGE_STATES, SETUP_STATES};
use rowlock::harness::{submit_in_new_transaction, with_worker};
use rowlock::model::{CensusRegion, RowRef, State};
use rowlock::options::{EngineOptions, DIALECT_ENV};
use rowlock::repository::LOCK_TIMEOUT_HINT;
use rowlock::transactions::lock::LockDescriptor;
use rowlock::LockingContext;
use std::time::Duration;

const STATE_ID: &str = "AL";
const SHORT_BOUND: Duration = Duration::from_millis(500);
const HARNESS_WAIT: Duration = Duration::from_secs(1);
const GRACE: Duration = Duration::from_secs(5);

struct Scenario {
    name: &'static str,
    hold: LockDescriptor,
    hold_target: RowRef,
    attempt: LockDescriptor,
    attempt_target: RowRef,
}

fn scenarios() -> Vec<Scenario> {
    let by_id = |name, hold, attempt| Scenario {
        name,
        hold,
        hold_target: RowRef::id(STATE_ID),
        attempt,
        attempt_target: RowRef::id(STATE_ID),
    };
    let share = LockDescriptor::for_share();
    let update = LockDescriptor::for_update();
    vec![
        by_id("test01", share, update),
        by_id("test02", share, update.no_wait()),
        by_id("test03", share, update.skip_locked()),
        Scenario {
            name: "test04",
            hold: share,
            hold_target: RowRef::region(CensusRegion::Northeast).limit(1),
            attempt: update.skip_locked(),
            attempt_target: RowRef::region(CensusRegion::Northeast),
        },
        by_id("test05", share, update.with_timeout(LOCK_TIMEOUT_HINT)),
        by_id("test11", update, share),
        by_id("test12", update, share.no_wait()),
        by_id("test13", update, share.skip_locked()),
        by_id("test21", share, share),
    ]
}

fn run(ctx: &LockingContext, scenario: &Scenario) -> (Outcome, Duration) {
    let repo = ctx.repo;
    let attempt = scenario.attempt;
    let target = scenario.attempt_target.clone();
    let result = ctx.manager.run_isolated(
        |tx| run_script(tx, SETUP_STATES).map(drop),
        |tx| {
            repo.lock(tx, &scenario.hold_target, &scenario.hold)?;
            with_worker(GRACE, |worker| {
                let handle = submit_in_new_transaction(worker, &ctx.manager, move |tx| {
                    repo.lock(tx, &target, &attempt)
                })?;
                worker.shutdown();
                let result = handle.get(HARNESS_WAIT);
                Ok((result, handle.elapsed()))
            })
        },
        |tx| run_script(tx, PURGE_STATES).map(drop),
    );
    match result {
        Ok((result, elapsed)) => (
            Outcome::from_result(result, &*ctx.classifier, &attempt),
            elapsed,
        ),
        Err(e) => (
            Outcome::from_result(Err::<Vec<State>, _>(e), &*ctx.classifier, &attempt),
            Duration::default(),
        ),
    }
}

fn run_matrix(mut options: EngineOptions) -> Vec<String> {
    let dialect = options.dialect;
    // only engines that bound their waits get the short bound
    if options.lock_wait_timeout.is_none() && dialect.default_lock_wait_timeout().is_some() {
        options.lock_wait_timeout = Some(SHORT_BOUND);
    }
    let ctx = LockingContext::open(options).unwrap();
    let mut lines = vec![format!(
        "== {} (lock wait bound {:?})",
        dialect,
        ctx.options.lock_wait_bound()
    )];
    for scenario in scenarios().iter() {
        let statement = ctx
            .repo
            .acquirer()
            .statement(&scenario.attempt_target, &scenario.attempt);
        let (outcome, elapsed) = run(&ctx, scenario);
        lines.push(format!(
            "{} {:<28} {:<60} {:<40} {:>6}ms",
            scenario.name,
            scenario.attempt.to_string(),
            statement.sql,
            outcome.to_string(),
            elapsed.as_millis()
        ));
    }
    lines
}

fn main() {
    env_logger::init();
    println!("rowlock: version {}", env!("CARGO_PKG_VERSION"));
    println!("Date: {:?}", chrono::Utc::now().naive_utc());

    let options = EngineOptions::from_env().unwrap();
    let matrices: Vec<Vec<String>> = if std::env::var(DIALECT_ENV).is_ok() {
        vec![run_matrix(options)]
    } else {
        Dialect::ALL
            .par_iter()
            .map(|dialect| {
                run_matrix(EngineOptions {
                    dialect: *dialect,
                    ..options.clone()
                })
            })
            .collect()
    };
    for lines in matrices {
        for line in lines {
            println!("{}", line);
        }
    }
}
