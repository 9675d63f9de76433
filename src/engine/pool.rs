use crate::engine::connection::Connection;
use crate::engine::Backend;
use crate::error::LockingError;
use crate::options::EngineOptions;
use crate::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

struct PoolInner {
    backend: Arc<dyn Backend>,
    idle_sender: Sender<Connection>,
    idle_receiver: Receiver<Connection>,
    connection_timeout: Duration,
    size: usize,
}

/// Fixed-size pool of connections shared by all transaction contexts.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(backend: Arc<dyn Backend>, options: &EngineOptions) -> Result<ConnectionPool> {
        let (idle_sender, idle_receiver) = crossbeam_channel::bounded(options.pool_size);
        for _ in 0..options.pool_size {
            idle_sender
                .send(backend.connect()?)
                .map_err(|e| LockingError::Custom(e.to_string()))?;
        }
        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                backend,
                idle_sender,
                idle_receiver,
                connection_timeout: options.connection_timeout,
                size: options.pool_size,
            }),
        })
    }

    /// Checks out a connection, waiting at most `connection_timeout`.
    pub fn get(&self) -> Result<PooledConnection> {
        match self
            .inner
            .idle_receiver
            .recv_timeout(self.inner.connection_timeout)
        {
            Ok(conn) => Ok(PooledConnection {
                conn: Some(conn),
                pool: self.inner.clone(),
            }),
            Err(RecvTimeoutError::Timeout) => {
                Err(LockingError::PoolTimeout(self.inner.connection_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(LockingError::Custom("connection pool is closed".to_owned()))
            }
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle_receiver.len()
    }
}

/// A checked-out connection, returned to its pool when dropped.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection already returned")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection already returned")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        if conn.is_closed() {
            debug!("discard closed connection {}", conn.id());
            conn = match self.pool.backend.connect() {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!("cannot replace closed connection {}: {}", conn.id(), e);
                    return;
                }
            };
        } else if conn.in_transaction() {
            warn!("connection {} returned inside a transaction", conn.id());
            if let Err(e) = conn.rollback() {
                warn!("{}", e);
            }
        }
        if let Err(e) = self.pool.idle_sender.send(conn) {
            warn!("{}", e);
        }
    }
}
