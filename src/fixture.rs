//! Baseline data for locking scenarios.

use crate::sql;
use crate::transactions::manager::TransactionManager;
use crate::transactions::transaction::Transaction;
use crate::transactions::{Completion, Propagation};
use crate::Result;
use std::path::Path;

/// Purges the table and inserts the 50 states and the District of Columbia.
pub const SETUP_STATES: &str = include_str!("../fixtures/setup_states.sql");

pub const PURGE_STATES: &str = "DELETE FROM state";

/// Runs every statement of `script` on the connection of `tx`.
pub fn run_script(tx: &Transaction, script: &str) -> Result<usize> {
    let statements = sql::parse_script(script)?;
    tx.with_connection(|conn| {
        let mut affected = 0;
        for statement in statements.iter() {
            affected += conn.execute_statement(statement)?;
        }
        Ok(affected)
    })
}

/// Loads and purges fixtures, each call in its own committed transaction
/// so the rows are visible to every other transaction.
#[derive(Clone)]
pub struct FixtureLoader {
    manager: TransactionManager,
}

impl FixtureLoader {
    pub fn new(manager: TransactionManager) -> FixtureLoader {
        FixtureLoader { manager }
    }

    pub fn run_sql_script_text(&self, script: &str) -> Result<usize> {
        self.committed(|tx| run_script(tx, script))
    }

    pub fn run_sql_scripts<P: AsRef<Path>>(&self, paths: &[P]) -> Result<usize> {
        let mut scripts = Vec::with_capacity(paths.len());
        for path in paths {
            scripts.push(std::fs::read_to_string(path)?);
        }
        self.committed(|tx| {
            let mut affected = 0;
            for script in scripts.iter() {
                affected += run_script(tx, script)?;
            }
            Ok(affected)
        })
    }

    pub fn run_sql_statements(&self, statements: &[&str]) -> Result<usize> {
        self.committed(|tx| {
            tx.with_connection(|conn| {
                let mut affected = 0;
                for sql in statements {
                    affected += conn.execute(sql)?;
                }
                Ok(affected)
            })
        })
    }

    pub fn load_states(&self) -> Result<usize> {
        let affected = self.run_sql_script_text(SETUP_STATES)?;
        debug!("loaded state fixtures ({} rows affected)", affected);
        Ok(affected)
    }

    pub fn purge_states(&self) -> Result<usize> {
        self.run_sql_statements(&[PURGE_STATES])
    }

    fn committed<T>(&self, work: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        self.manager
            .execute(Propagation::RequiresNew, Completion::Commit, work)
    }
}
