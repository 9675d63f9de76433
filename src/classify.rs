//! Engine-agnostic interpretation of lock acquisition results.

use crate::engine::dialect::Dialect;
use crate::error::{DbError, LockingError};
use crate::model::State;
use crate::transactions::lock::{LockDescriptor, WaitPolicy};
use crate::Result;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The row is locked and the request asked not to wait.
    LockNotAvailable,
    /// A wait bound expired inside the engine.
    LockTimeout,
    /// The harness stopped waiting for the result; the request may still be
    /// blocked.
    HarnessTimeout,
    /// The engine dropped the session.
    ConnectionLost,
    NotFound,
    Validation,
    Cancelled,
    Other,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Maps failures of one engine onto [`FailureKind`].
pub trait OutcomeClassifier: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// `desc` is the lock as requested, since some engines report different
    /// conditions with the same code.
    fn classify_db_error(&self, err: &DbError, desc: &LockDescriptor) -> FailureKind;

    fn classify(&self, err: &LockingError, desc: &LockDescriptor) -> FailureKind {
        match err {
            LockingError::RollbackFailed { rollback, original } => {
                if rollback.is_connection_lost() {
                    FailureKind::ConnectionLost
                } else {
                    self.classify(original, desc)
                }
            }
            LockingError::Db(e) => self.classify_db_error(e, desc),
            LockingError::HarnessTimeout(_) => FailureKind::HarnessTimeout,
            LockingError::NotFound(_) => FailureKind::NotFound,
            LockingError::Validation(_) | LockingError::Sql { .. } => FailureKind::Validation,
            LockingError::Cancelled => FailureKind::Cancelled,
            _ => FailureKind::Other,
        }
    }
}

pub struct PostgresClassifier;

impl OutcomeClassifier for PostgresClassifier {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn classify_db_error(&self, err: &DbError, _desc: &LockDescriptor) -> FailureKind {
        match err.sql_state.as_str() {
            // lock_not_available covers both NOWAIT and lock_timeout
            "55P03" if err.message.contains("lock timeout") => FailureKind::LockTimeout,
            "55P03" => FailureKind::LockNotAvailable,
            "57014" => FailureKind::Cancelled,
            "23505" => FailureKind::Validation,
            _ if err.is_connection_error() => FailureKind::ConnectionLost,
            _ => FailureKind::Other,
        }
    }
}

/// MariaDB and MySQL share the InnoDB error codes.
pub struct MySqlClassifier {
    dialect: Dialect,
}

impl MySqlClassifier {
    pub fn new(dialect: Dialect) -> MySqlClassifier {
        MySqlClassifier { dialect }
    }
}

impl OutcomeClassifier for MySqlClassifier {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn classify_db_error(&self, err: &DbError, desc: &LockDescriptor) -> FailureKind {
        match err.vendor_code {
            // MariaDB fails NOWAIT with the lock wait timeout error
            1205 if desc.wait_policy == WaitPolicy::NoWait
                && self.dialect.capabilities().supports_nowait(desc.mode) =>
            {
                FailureKind::LockNotAvailable
            }
            1205 => FailureKind::LockTimeout,
            3572 => FailureKind::LockNotAvailable,
            1317 => FailureKind::Cancelled,
            1062 => FailureKind::Validation,
            _ if err.is_connection_error() => FailureKind::ConnectionLost,
            _ => FailureKind::Other,
        }
    }
}

pub struct H2Classifier;

impl OutcomeClassifier for H2Classifier {
    fn dialect(&self) -> Dialect {
        Dialect::H2
    }

    fn classify_db_error(&self, err: &DbError, _desc: &LockDescriptor) -> FailureKind {
        match err.vendor_code {
            // H2 closes the session together with this error
            50200 => FailureKind::ConnectionLost,
            57014 => FailureKind::Cancelled,
            23505 => FailureKind::Validation,
            _ if err.is_connection_error() => FailureKind::ConnectionLost,
            _ => FailureKind::Other,
        }
    }
}

pub fn classifier_for(dialect: Dialect) -> Box<dyn OutcomeClassifier> {
    match dialect {
        Dialect::Postgres => Box::new(PostgresClassifier),
        Dialect::MariaDb | Dialect::MySql57 => Box::new(MySqlClassifier::new(dialect)),
        Dialect::H2 => Box::new(H2Classifier),
    }
}

#[derive(Debug)]
pub struct LockFailure {
    pub kind: FailureKind,
    pub error: LockingError,
}

#[derive(Debug)]
pub enum Outcome {
    Acquired(Vec<State>),
    /// Nothing matched, or every match was skipped.
    AcquiredEmpty,
    TimedOut,
    Failed(LockFailure),
}

impl Outcome {
    pub fn from_result<R>(
        result: Result<R>,
        classifier: &dyn OutcomeClassifier,
        desc: &LockDescriptor,
    ) -> Outcome
    where
        R: IntoIterator<Item = State>,
    {
        match result {
            Ok(rows) => {
                let rows: Vec<State> = rows.into_iter().collect();
                if rows.is_empty() {
                    Outcome::AcquiredEmpty
                } else {
                    Outcome::Acquired(rows)
                }
            }
            Err(LockingError::HarnessTimeout(_)) => Outcome::TimedOut,
            Err(error) => Outcome::Failed(LockFailure {
                kind: classifier.classify(&error, desc),
                error,
            }),
        }
    }

    /// The failure kind, `HarnessTimeout` for `TimedOut`.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Failed(failure) => Some(failure.kind),
            Outcome::TimedOut => Some(FailureKind::HarnessTimeout),
            _ => None,
        }
    }

    pub fn rows(&self) -> &[State] {
        match self {
            Outcome::Acquired(rows) => rows,
            _ => &[],
        }
    }

    pub fn is_acquired(&self) -> bool {
        matches!(self, Outcome::Acquired(_) | Outcome::AcquiredEmpty)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Acquired(rows) => write!(f, "ACQUIRED({})", rows.len()),
            Outcome::AcquiredEmpty => f.write_str("ACQUIRED_EMPTY"),
            Outcome::TimedOut => f.write_str("TIMED_OUT"),
            Outcome::Failed(failure) => write!(f, "FAILED({}: {})", failure.kind, failure.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::classify::{classifier_for, FailureKind, Outcome};
    use crate::engine::dialect::Dialect;
    use crate::error::LockingError;
    use crate::model::{CensusRegion, State};
    use crate::transactions::lock::LockDescriptor;
    use std::time::Duration;

    #[test]
    fn test_postgres() {
        let classifier = classifier_for(Dialect::Postgres);
        let desc = LockDescriptor::for_update().no_wait();
        let not_available = LockingError::Db(Dialect::Postgres.lock_not_available());
        assert_eq!(
            classifier.classify(&not_available, &desc),
            FailureKind::LockNotAvailable
        );
        let timeout = LockingError::Db(Dialect::Postgres.lock_wait_timeout());
        assert_eq!(
            classifier.classify(&timeout, &LockDescriptor::for_update()),
            FailureKind::LockTimeout
        );
    }

    #[test]
    fn test_mysql_family() {
        let nowait = LockDescriptor::for_update().no_wait();
        let maria = classifier_for(Dialect::MariaDb);
        let err = LockingError::Db(Dialect::MariaDb.lock_not_available());
        assert_eq!(maria.classify(&err, &nowait), FailureKind::LockNotAvailable);
        // shared NOWAIT is dropped by MariaDB, so 1205 is a real wait bound
        assert_eq!(
            maria.classify(&err, &LockDescriptor::for_share().no_wait()),
            FailureKind::LockTimeout
        );

        let mysql = classifier_for(Dialect::MySql57);
        let err = LockingError::Db(Dialect::MySql57.lock_wait_timeout());
        assert_eq!(mysql.classify(&err, &nowait), FailureKind::LockTimeout);
        let err = LockingError::Db(Dialect::MySql57.query_cancelled());
        assert_eq!(mysql.classify(&err, &nowait), FailureKind::Cancelled);
    }

    #[test]
    fn test_h2_connection_lost() {
        let classifier = classifier_for(Dialect::H2);
        let desc = LockDescriptor::for_update();
        let err = LockingError::RollbackFailed {
            rollback: Box::new(LockingError::Db(Dialect::H2.connection_closed())),
            original: Box::new(LockingError::Db(Dialect::H2.lock_wait_timeout())),
        };
        assert_eq!(classifier.classify(&err, &desc), FailureKind::ConnectionLost);

        let outcome = Outcome::from_result(Err::<Vec<State>, _>(err), &*classifier, &desc);
        assert_eq!(outcome.kind(), Some(FailureKind::ConnectionLost));
        assert!(!outcome.is_acquired());
    }

    #[test]
    fn test_outcome() {
        let classifier = classifier_for(Dialect::Postgres);
        let desc = LockDescriptor::for_update().skip_locked();
        let alabama = State::new("AL", "Alabama", "01", "Ala.", CensusRegion::South);

        let outcome = Outcome::from_result(Ok(Some(alabama)), &*classifier, &desc);
        assert_eq!(outcome.rows().len(), 1);
        assert_eq!(outcome.to_string(), "ACQUIRED(1)");

        let outcome = Outcome::from_result(Ok(None::<State>), &*classifier, &desc);
        assert!(matches!(outcome, Outcome::AcquiredEmpty));
        assert!(outcome.is_acquired());

        let outcome = Outcome::from_result(
            Err::<Vec<State>, _>(LockingError::HarnessTimeout(Duration::from_secs(5))),
            &*classifier,
            &desc,
        );
        assert!(matches!(outcome, Outcome::TimedOut));
        assert_eq!(outcome.kind(), Some(FailureKind::HarnessTimeout));

        let outcome = Outcome::from_result(
            Err::<Vec<State>, _>(LockingError::NotFound("ZZ".into())),
            &*classifier,
            &desc,
        );
        assert_eq!(outcome.kind(), Some(FailureKind::NotFound));
    }
}
