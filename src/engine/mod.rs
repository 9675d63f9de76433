//! In-process relational store with engine-specific row locking.

pub mod connection;
pub mod dialect;
pub mod pool;

use crate::engine::connection::Connection;
use crate::engine::dialect::{Capabilities, Dialect};
use crate::model::State;
use crate::options::EngineOptions;
use crate::transactions::lock::point_lock_manager::PointLockManager;
use crate::transactions::lock::{LockManager, LockMode};
use crate::transactions::TransactionID;
use crate::Result;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A database a connection pool can open sessions against.
pub trait Backend: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn capabilities(&self) -> Capabilities {
        self.dialect().capabilities()
    }

    fn connect(&self) -> Result<Connection>;
}

pub(crate) struct DatabaseInner {
    pub(crate) dialect: Dialect,
    pub(crate) lock_wait_timeout: Option<Duration>,
    /// Committed rows of the `state` table.
    pub(crate) table: RwLock<BTreeMap<String, State>>,
    pub(crate) lock_manager: PointLockManager,
    next_txn_id: AtomicU64,
    next_conn_id: AtomicU64,
}

impl DatabaseInner {
    pub(crate) fn next_txn_id(&self) -> TransactionID {
        self.next_txn_id.fetch_add(1, Ordering::AcqRel)
    }
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    pub fn open(options: &EngineOptions) -> Database {
        info!(
            "open {} database, lock wait bound {:?}",
            options.dialect,
            options.lock_wait_bound()
        );
        Database {
            inner: Arc::new(DatabaseInner {
                dialect: options.dialect,
                lock_wait_timeout: options.lock_wait_bound(),
                table: RwLock::new(BTreeMap::new()),
                lock_manager: PointLockManager::new(),
                next_txn_id: AtomicU64::new(1),
                next_conn_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn lock_wait_timeout(&self) -> Option<Duration> {
        self.inner.lock_wait_timeout
    }

    /// Number of committed rows.
    pub fn row_count(&self) -> usize {
        self.inner.table.read().unwrap().len()
    }

    /// Transactions currently holding a lock on row `id`.
    pub fn lock_holders(&self, id: &str) -> Vec<(TransactionID, LockMode)> {
        self.inner.lock_manager.holders(&id.to_owned())
    }
}

impl Backend for Database {
    fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    fn connect(&self) -> Result<Connection> {
        let id = self.inner.next_conn_id.fetch_add(1, Ordering::AcqRel);
        debug!("open connection {} to {}", id, self.inner.dialect);
        Ok(Connection::new(id, self.inner.clone()))
    }
}
