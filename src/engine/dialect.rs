//! Per-engine locking behavior.
//!
//! Each dialect reproduces what the real engine does with a locking read:
//! which wait policies it honors, which ones it silently drops, how long it
//! waits on its own, and how it reports the failure.

use crate::error::{DbError, LockingError};
use crate::transactions::lock::{LockDescriptor, LockMode, WaitPolicy};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    MariaDb,
    MySql57,
    /// Embedded H2.
    H2,
}

/// Lock features an engine honors. Anything else is ignored by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub nowait_exclusive: bool,
    pub nowait_shared: bool,
    pub skip_locked: bool,
    pub lock_timeout: bool,
    pub shared_mode: bool,
}

impl Capabilities {
    pub fn supports_nowait(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Exclusive => self.nowait_exclusive,
            LockMode::Shared => self.nowait_shared,
        }
    }

    /// Whether the engine executes `desc` as requested.
    pub fn supports(&self, desc: &LockDescriptor) -> bool {
        if desc.mode == LockMode::Shared && !self.shared_mode {
            return false;
        }
        match desc.wait_policy {
            WaitPolicy::BlockIndefinitely => true,
            WaitPolicy::NoWait => self.supports_nowait(desc.mode),
            WaitPolicy::SkipLocked => self.skip_locked,
            WaitPolicy::Timeout(_) => self.lock_timeout,
        }
    }
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [
        Dialect::Postgres,
        Dialect::MariaDb,
        Dialect::MySql57,
        Dialect::H2,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MariaDb => "mariadb",
            Dialect::MySql57 => "mysql57",
            Dialect::H2 => "h2",
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Dialect::Postgres => Capabilities {
                nowait_exclusive: true,
                nowait_shared: true,
                skip_locked: true,
                lock_timeout: false,
                shared_mode: true,
            },
            Dialect::MariaDb => Capabilities {
                nowait_exclusive: true,
                nowait_shared: false,
                skip_locked: false,
                lock_timeout: true,
                shared_mode: true,
            },
            Dialect::MySql57 => Capabilities {
                nowait_exclusive: false,
                nowait_shared: false,
                skip_locked: false,
                lock_timeout: false,
                shared_mode: true,
            },
            Dialect::H2 => Capabilities {
                nowait_exclusive: false,
                nowait_shared: false,
                skip_locked: false,
                lock_timeout: false,
                shared_mode: false,
            },
        }
    }

    /// The engine's own bound on a blocked lock wait. `None` waits forever.
    pub fn default_lock_wait_timeout(&self) -> Option<Duration> {
        match self {
            Dialect::Postgres => None,
            // innodb_lock_wait_timeout
            Dialect::MariaDb | Dialect::MySql57 => Some(Duration::from_secs(50)),
            Dialect::H2 => Some(Duration::from_secs(2)),
        }
    }

    /// H2 tears the session down when a lock wait expires.
    pub fn closes_connection_on_lock_timeout(&self) -> bool {
        matches!(self, Dialect::H2)
    }

    /// What the engine actually executes for `desc`.
    pub fn effective(&self, desc: &LockDescriptor) -> LockDescriptor {
        let caps = self.capabilities();
        let mode = if desc.mode == LockMode::Shared && !caps.shared_mode {
            LockMode::Exclusive
        } else {
            desc.mode
        };
        let wait_policy = match desc.wait_policy {
            WaitPolicy::NoWait if caps.supports_nowait(desc.mode) => WaitPolicy::NoWait,
            WaitPolicy::SkipLocked if caps.skip_locked => WaitPolicy::SkipLocked,
            WaitPolicy::Timeout(d) if caps.lock_timeout => WaitPolicy::Timeout(self.wait_granularity(d)),
            _ => WaitPolicy::BlockIndefinitely,
        };
        LockDescriptor::new(mode, wait_policy)
    }

    // `WAIT n` takes whole seconds.
    fn wait_granularity(&self, timeout: Duration) -> Duration {
        match self {
            Dialect::MariaDb => Duration::from_secs(timeout.as_secs()),
            _ => timeout,
        }
    }

    /// Renders the locking clause the engine receives for `desc`. Requested
    /// features the engine ignores stay visible as a comment.
    pub fn lock_clause(&self, desc: &LockDescriptor) -> String {
        let caps = self.capabilities();
        let shared_syntax = match self {
            Dialect::MariaDb | Dialect::MySql57 => "lock in share mode",
            _ => "for share",
        };
        let mut clause = match desc.mode {
            LockMode::Shared if caps.shared_mode => shared_syntax.to_owned(),
            LockMode::Shared => "for update /* FOR SHARE requested */".to_owned(),
            LockMode::Exclusive => "for update".to_owned(),
        };
        let policy = desc.wait_policy;
        let honored = match policy {
            WaitPolicy::NoWait => caps.supports_nowait(desc.mode),
            WaitPolicy::SkipLocked => caps.skip_locked,
            WaitPolicy::Timeout(_) => caps.lock_timeout,
            WaitPolicy::BlockIndefinitely => return clause,
        };
        if honored {
            clause.push(' ');
            clause.push_str(&match self.effective(desc).wait_policy {
                WaitPolicy::NoWait => "nowait".to_owned(),
                WaitPolicy::SkipLocked => "skip locked".to_owned(),
                WaitPolicy::Timeout(d) => format!("wait {}", d.as_secs()),
                WaitPolicy::BlockIndefinitely => String::new(),
            });
        } else {
            clause.push_str(&format!(" /* {} ignored */", policy));
        }
        clause
    }

    pub fn lock_not_available(&self) -> DbError {
        match self {
            Dialect::Postgres => DbError::new(
                "55P03",
                0,
                "ERROR: could not obtain lock on row in relation \"state\"",
            ),
            // MariaDB answers NOWAIT with the lock wait timeout error.
            Dialect::MariaDb => self.lock_wait_timeout(),
            Dialect::MySql57 => DbError::new(
                "HY000",
                3572,
                "Statement aborted because lock(s) could not be acquired immediately and NOWAIT is set.",
            ),
            Dialect::H2 => self.lock_wait_timeout(),
        }
    }

    pub fn lock_wait_timeout(&self) -> DbError {
        match self {
            Dialect::Postgres => {
                DbError::new("55P03", 0, "ERROR: canceling statement due to lock timeout")
            }
            Dialect::MariaDb | Dialect::MySql57 => DbError::new(
                "HY000",
                1205,
                "Lock wait timeout exceeded; try restarting transaction",
            ),
            Dialect::H2 => DbError::new(
                "HYT00",
                50200,
                "Timeout trying to lock table \"STATE\"",
            ),
        }
    }

    pub fn query_cancelled(&self) -> DbError {
        match self {
            Dialect::Postgres => DbError::new(
                "57014",
                0,
                "ERROR: canceling statement due to user request",
            ),
            Dialect::MariaDb | Dialect::MySql57 => {
                DbError::new("70100", 1317, "Query execution was interrupted")
            }
            Dialect::H2 => DbError::new(
                "57014",
                57014,
                "Statement was canceled or the session timed out",
            ),
        }
    }

    pub fn duplicate_key(&self, column: &str, value: &str) -> DbError {
        match self {
            Dialect::Postgres => DbError::new(
                "23505",
                0,
                format!(
                    "ERROR: duplicate key value violates unique constraint \"state_{}_key\"",
                    column
                ),
            ),
            Dialect::MariaDb | Dialect::MySql57 => DbError::new(
                "23000",
                1062,
                format!("Duplicate entry '{}' for key '{}'", value, column),
            ),
            Dialect::H2 => DbError::new(
                "23505",
                23505,
                format!("Unique index or primary key violation: STATE({})", column),
            ),
        }
    }

    pub fn connection_closed(&self) -> DbError {
        DbError::new("08003", 0, "Connection is closed")
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Dialect {
    type Err = LockingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mariadb" | "maria" => Ok(Dialect::MariaDb),
            "mysql" | "mysql57" => Ok(Dialect::MySql57),
            "h2" => Ok(Dialect::H2),
            other => Err(LockingError::Custom(format!("unknown dialect `{}`", other))),
        }
    }
}
