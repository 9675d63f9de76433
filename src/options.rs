use crate::engine::dialect::Dialect;
use crate::error::LockingError;
use crate::Result;
use std::time::Duration;

pub const DIALECT_ENV: &str = "ROWLOCK_DIALECT";
pub const POOL_SIZE_ENV: &str = "ROWLOCK_POOL_SIZE";
pub const LOCK_WAIT_TIMEOUT_ENV: &str = "ROWLOCK_LOCK_WAIT_TIMEOUT_MS";

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub dialect: Dialect,
    pub pool_size: usize,
    /// Longest wait for a free pooled connection.
    pub connection_timeout: Duration,
    /// Replaces the dialect's own bound on blocked lock waits.
    pub lock_wait_timeout: Option<Duration>,
    /// Refuse lock requests the engine would not honor instead of passing
    /// them through.
    pub strict_capabilities: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            dialect: Dialect::Postgres,
            pool_size: 10,
            connection_timeout: Duration::from_millis(250),
            lock_wait_timeout: None,
            strict_capabilities: false,
        }
    }
}

impl EngineOptions {
    pub fn new(dialect: Dialect) -> EngineOptions {
        EngineOptions {
            dialect,
            ..EngineOptions::default()
        }
    }

    pub fn with_lock_wait_timeout(mut self, timeout: Duration) -> EngineOptions {
        self.lock_wait_timeout = Some(timeout);
        self
    }

    pub fn strict(mut self) -> EngineOptions {
        self.strict_capabilities = true;
        self
    }

    /// Effective bound on a blocked lock wait.
    pub fn lock_wait_bound(&self) -> Option<Duration> {
        self.lock_wait_timeout
            .or_else(|| self.dialect.default_lock_wait_timeout())
    }

    pub fn from_env() -> Result<EngineOptions> {
        let mut options = EngineOptions::default();
        if let Ok(dialect) = std::env::var(DIALECT_ENV) {
            options.dialect = dialect.parse()?;
        }
        if let Ok(size) = std::env::var(POOL_SIZE_ENV) {
            options.pool_size = parse_number(POOL_SIZE_ENV, &size)? as usize;
        }
        if let Ok(millis) = std::env::var(LOCK_WAIT_TIMEOUT_ENV) {
            options.lock_wait_timeout =
                Some(Duration::from_millis(parse_number(LOCK_WAIT_TIMEOUT_ENV, &millis)?));
        }
        Ok(options)
    }
}

fn parse_number(name: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| LockingError::Custom(format!("{} must be a number, got `{}`", name, value)))
}

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// How long `with_worker` waits for its worker to terminate.
    pub shutdown_grace: Duration,
    pub worker_name: String,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        HarnessOptions {
            shutdown_grace: Duration::from_secs(30),
            worker_name: "lock worker".to_owned(),
        }
    }
}
