use crate::engine::dialect::Dialect;
use crate::transactions::lock::LockDescriptor;
use crate::transactions::TransactionID;
use std::fmt;
use std::io;
use std::time::Duration;

/// Error reported by a database engine, in the shape the engine itself uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    pub sql_state: String,
    pub vendor_code: i32,
    pub message: String,
}

impl DbError {
    pub fn new(sql_state: &str, vendor_code: i32, message: impl Into<String>) -> DbError {
        DbError {
            sql_state: sql_state.to_owned(),
            vendor_code,
            message: message.into(),
        }
    }

    /// SQLSTATE class 08: connection exception.
    pub fn is_connection_error(&self) -> bool {
        self.sql_state.starts_with("08")
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}-{}]",
            self.message, self.vendor_code, self.sql_state
        )
    }
}

impl std::error::Error for DbError {}

#[derive(thiserror::Error, Debug)]
pub enum LockingError {
    #[error("{0}")]
    IOError(#[from] io::Error),

    #[error("{0}")]
    Db(#[from] DbError),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("connection is not available, request timed out after {0:?}")]
    PoolTimeout(Duration),

    #[error("transaction {0} is not active")]
    TransactionInactive(TransactionID),

    #[error("no ambient transaction is active on this thread")]
    NoAmbientTransaction,

    #[error("transaction rolled back because it has been marked as rollback-only")]
    UnexpectedRollback,

    #[error("unable to rollback: {rollback} (after: {original})")]
    RollbackFailed {
        rollback: Box<LockingError>,
        original: Box<LockingError>,
    },

    #[error("{descriptor} is not supported by {dialect}")]
    Unsupported {
        descriptor: LockDescriptor,
        dialect: Dialect,
    },

    #[error("no result within {0:?}")]
    HarnessTimeout(Duration),

    #[error("task was cancelled")]
    Cancelled,

    #[error("task panicked: {0}")]
    WorkerPanicked(String),

    #[error("worker does not accept new tasks")]
    WorkerShutdown,

    #[error("task result has already been taken")]
    ResultTaken,

    #[error("state `{0}` not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("invalid statement `{statement}`: {message}")]
    Sql { statement: String, message: String },

    #[error("{0}")]
    Custom(String),
}

impl LockingError {
    pub fn db_error(&self) -> Option<&DbError> {
        match self {
            LockingError::Db(e) => Some(e),
            _ => None,
        }
    }

    /// Walks `RollbackFailed` wrappers, outermost first.
    pub fn chain(&self) -> Vec<&LockingError> {
        let mut chain = vec![self];
        let mut current = self;
        while let LockingError::RollbackFailed { rollback, original } = current {
            chain.push(rollback);
            chain.push(original);
            current = original;
        }
        chain
    }

    pub fn is_connection_lost(&self) -> bool {
        self.chain()
            .iter()
            .filter_map(|e| e.db_error())
            .any(DbError::is_connection_error)
    }
}

impl PartialEq for LockingError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Db(e1), Self::Db(e2)) => e1 == e2,
            (Self::NotFound(s1), Self::NotFound(s2))
            | (Self::Validation(s1), Self::Validation(s2))
            | (Self::Custom(s1), Self::Custom(s2)) => s1.eq(s2),
            (
                Self::RollbackFailed {
                    rollback: r1,
                    original: o1,
                },
                Self::RollbackFailed {
                    rollback: r2,
                    original: o2,
                },
            ) => r1 == r2 && o1 == o2,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{DbError, LockingError};

    #[test]
    fn test_chain() {
        let closed = DbError::new("08003", 0, "Connection is closed");
        let timeout = DbError::new("HYT00", 50200, "Timeout trying to lock table");
        let err = LockingError::RollbackFailed {
            rollback: Box::new(closed.clone().into()),
            original: Box::new(timeout.clone().into()),
        };
        let chain = err.chain();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[1].db_error(), Some(&closed));
        assert_eq!(chain[2].db_error(), Some(&timeout));
        assert!(err.is_connection_lost());
        assert!(!LockingError::Db(timeout).is_connection_lost());
    }

    #[test]
    fn test_eq() {
        assert_eq!(LockingError::Cancelled, LockingError::Cancelled);
        assert_eq!(
            LockingError::NotFound("AL".into()),
            LockingError::NotFound("AL".into())
        );
        assert_ne!(
            LockingError::NotFound("AL".into()),
            LockingError::NotFound("AK".into())
        );
        assert_ne!(LockingError::Cancelled, LockingError::WorkerShutdown);
    }
}
