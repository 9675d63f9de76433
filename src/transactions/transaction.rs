use crate::engine::connection::Connection;
use crate::engine::pool::{ConnectionPool, PooledConnection};
use crate::error::LockingError;
use crate::transactions::{Propagation, TransactionID, TRANSACTION_NULL};
use crate::Result;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    NotStarted,
    Active,
    Committed,
    RolledBack,
}

struct TransactionContext {
    id: TransactionID,
    state: TransactionState,
    conn: Option<PooledConnection>,
    rollback_only: bool,
}

impl TransactionContext {
    /// Ends the transaction and hands the connection back to the pool. The
    /// context is terminal afterwards even if the engine reports an error.
    fn finish(&mut self, commit: bool) -> Result<()> {
        let result = match self.conn.take() {
            Some(mut conn) if commit => conn.commit(),
            Some(mut conn) => conn.rollback(),
            None => Ok(()),
        };
        self.state = if commit && result.is_ok() {
            TransactionState::Committed
        } else {
            TransactionState::RolledBack
        };
        debug!("txn {} -> {:?}", self.id, self.state);
        result
    }
}

thread_local! {
    /// Active transactions owned by this thread, innermost last.
    static AMBIENT: RefCell<Vec<Rc<RefCell<TransactionContext>>>> = RefCell::new(Vec::new());
}

fn innermost_active() -> Option<Rc<RefCell<TransactionContext>>> {
    AMBIENT.with(|ambient| {
        ambient
            .borrow()
            .iter()
            .rev()
            .find(|ctx| match ctx.try_borrow() {
                Ok(ctx) => ctx.state == TransactionState::Active,
                // borrowed by a running statement
                Err(_) => true,
            })
            .cloned()
    })
}

fn unregister(ctx: &Rc<RefCell<TransactionContext>>) {
    AMBIENT.with(|ambient| ambient.borrow_mut().retain(|c| !Rc::ptr_eq(c, ctx)));
}

/// A handle on a transaction context.
///
/// The owning handle terminates the context; participant handles obtained by
/// joining the ambient transaction only share it. A transaction is confined
/// to the thread that began it.
pub struct Transaction {
    ctx: Rc<RefCell<TransactionContext>>,
    participant: bool,
}

impl Transaction {
    pub(crate) fn begin(pool: &ConnectionPool, propagation: Propagation) -> Result<Transaction> {
        if propagation == Propagation::JoinAmbient {
            if let Some(ctx) = innermost_active() {
                return Ok(Transaction {
                    ctx,
                    participant: true,
                });
            }
        }
        let ctx = Rc::new(RefCell::new(TransactionContext {
            id: TRANSACTION_NULL,
            state: TransactionState::NotStarted,
            conn: None,
            rollback_only: false,
        }));
        {
            let mut inner = ctx.borrow_mut();
            let mut conn = pool.get()?;
            inner.id = conn.begin()?;
            inner.conn = Some(conn);
            inner.state = TransactionState::Active;
            debug!("txn {} begin ({:?})", inner.id, propagation);
        }
        AMBIENT.with(|ambient| ambient.borrow_mut().push(ctx.clone()));
        Ok(Transaction {
            ctx,
            participant: false,
        })
    }

    pub fn id(&self) -> TransactionID {
        self.ctx.borrow().id
    }

    pub fn state(&self) -> TransactionState {
        self.ctx.borrow().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    pub fn is_participant(&self) -> bool {
        self.participant
    }

    pub fn is_rollback_only(&self) -> bool {
        self.ctx.borrow().rollback_only
    }

    pub fn set_rollback_only(&self) {
        self.ctx.borrow_mut().rollback_only = true;
    }

    /// Runs `f` on the connection bound to this transaction.
    pub fn with_connection<R>(&self, f: impl FnOnce(&mut Connection) -> Result<R>) -> Result<R> {
        let mut ctx = self.ctx.borrow_mut();
        let id = ctx.id;
        if ctx.state != TransactionState::Active {
            return Err(LockingError::TransactionInactive(id));
        }
        match ctx.conn.as_mut() {
            Some(conn) => f(conn),
            None => Err(LockingError::TransactionInactive(id)),
        }
    }

    /// Commits the transaction. A participant's commit does nothing.
    ///
    /// Committing a context marked rollback-only rolls it back and fails with
    /// `UnexpectedRollback`.
    pub fn commit(self) -> Result<()> {
        if self.participant {
            return Ok(());
        }
        let result = {
            let mut ctx = self.ctx.borrow_mut();
            if ctx.state != TransactionState::Active {
                return Err(LockingError::TransactionInactive(ctx.id));
            }
            if ctx.rollback_only {
                match ctx.finish(false) {
                    Ok(()) => Err(LockingError::UnexpectedRollback),
                    Err(e) => Err(LockingError::RollbackFailed {
                        rollback: Box::new(e),
                        original: Box::new(LockingError::UnexpectedRollback),
                    }),
                }
            } else {
                ctx.finish(true)
            }
        };
        unregister(&self.ctx);
        result
    }

    /// Rolls the transaction back. A participant marks the shared context
    /// rollback-only instead.
    pub fn rollback(self) -> Result<()> {
        if self.participant {
            self.set_rollback_only();
            return Ok(());
        }
        let result = {
            let mut ctx = self.ctx.borrow_mut();
            if ctx.state != TransactionState::Active {
                return Err(LockingError::TransactionInactive(ctx.id));
            }
            ctx.finish(false)
        };
        unregister(&self.ctx);
        result
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.participant {
            return;
        }
        if let Ok(mut ctx) = self.ctx.try_borrow_mut() {
            if ctx.state == TransactionState::Active {
                warn!("txn {} dropped while active, rolling back", ctx.id);
                if let Err(e) = ctx.finish(false) {
                    warn!("txn {}: {}", ctx.id, e);
                }
            }
        }
        unregister(&self.ctx);
    }
}
