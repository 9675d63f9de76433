pub(crate) mod point_lock_manager;
pub(crate) mod row_lock;

use crate::transactions::TransactionID;
use std::fmt;
use std::time::Duration;

pub type RowKey = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Exclusive,
    Shared,
}

impl Default for LockMode {
    fn default() -> Self {
        LockMode::Exclusive
    }
}

impl LockMode {
    /// Only shared locks are compatible with each other.
    pub fn conflicts_with(self, other: LockMode) -> bool {
        !(self == LockMode::Shared && other == LockMode::Shared)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    BlockIndefinitely,
    NoWait,
    SkipLocked,
    Timeout(Duration),
}

impl fmt::Display for WaitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitPolicy::BlockIndefinitely => f.write_str("BLOCK"),
            WaitPolicy::NoWait => f.write_str("NOWAIT"),
            WaitPolicy::SkipLocked => f.write_str("SKIP LOCKED"),
            WaitPolicy::Timeout(d) => write!(f, "TIMEOUT({}ms)", d.as_millis()),
        }
    }
}

/// A requested row lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockDescriptor {
    pub mode: LockMode,
    pub wait_policy: WaitPolicy,
}

impl LockDescriptor {
    pub const fn new(mode: LockMode, wait_policy: WaitPolicy) -> LockDescriptor {
        LockDescriptor { mode, wait_policy }
    }

    pub const fn for_update() -> LockDescriptor {
        LockDescriptor::new(LockMode::Exclusive, WaitPolicy::BlockIndefinitely)
    }

    pub const fn for_share() -> LockDescriptor {
        LockDescriptor::new(LockMode::Shared, WaitPolicy::BlockIndefinitely)
    }

    pub const fn no_wait(self) -> LockDescriptor {
        LockDescriptor::new(self.mode, WaitPolicy::NoWait)
    }

    pub const fn skip_locked(self) -> LockDescriptor {
        LockDescriptor::new(self.mode, WaitPolicy::SkipLocked)
    }

    pub const fn with_timeout(self, timeout: Duration) -> LockDescriptor {
        LockDescriptor::new(self.mode, WaitPolicy::Timeout(timeout))
    }

    pub fn timeout(&self) -> Option<Duration> {
        match self.wait_policy {
            WaitPolicy::Timeout(d) => Some(d),
            _ => None,
        }
    }
}

impl fmt::Display for LockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            LockMode::Exclusive => "FOR UPDATE",
            LockMode::Shared => "FOR SHARE",
        };
        match self.wait_policy {
            WaitPolicy::BlockIndefinitely => f.write_str(mode),
            policy => write!(f, "{} {}", mode, policy),
        }
    }
}

/// How a lock manager treats a conflicting request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    /// Fail at once.
    Fail,
    /// Report the row as busy so the caller can pass over it.
    Skip,
    /// Wait for the holders, at most for the given bound.
    Wait(Option<Duration>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockConflict {
    Busy,
    TimedOut(Duration),
    Cancelled,
}

/// Interval at which a blocked waiter re-checks its deadline and cancellation.
pub(crate) const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub trait LockManager: Send + Sync {
    fn new() -> Self
    where
        Self: Sized;

    fn lock(
        &self,
        txn_id: TransactionID,
        key: &RowKey,
        mode: LockMode,
        wait: LockWait,
    ) -> Result<(), LockConflict>;

    fn try_lock(&self, txn_id: TransactionID, key: &RowKey, mode: LockMode) -> bool {
        self.lock(txn_id, key, mode, LockWait::Fail).is_ok()
    }

    fn unlock(&self, txn_id: TransactionID, key: &RowKey);

    fn holders(&self, key: &RowKey) -> Vec<(TransactionID, LockMode)>;
}
