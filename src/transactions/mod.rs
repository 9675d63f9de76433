pub mod lock;
pub mod manager;
pub mod transaction;

pub type TransactionID = u64;
pub const TRANSACTION_NULL: TransactionID = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Always start a fresh transaction on its own connection.
    RequiresNew,
    /// Join the innermost active transaction of the current thread, if any.
    JoinAmbient,
}

impl Default for Propagation {
    fn default() -> Self {
        Propagation::JoinAmbient
    }
}

/// How `TransactionManager::execute` ends a transaction whose work succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Commit,
    Rollback,
}
