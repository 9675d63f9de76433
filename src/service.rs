use crate::error::LockingError;
use crate::model::State;
use crate::repository::StateRepository;
use crate::transactions::manager::TransactionManager;
use crate::transactions::transaction::Transaction;
use crate::transactions::{Completion, Propagation};
use crate::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

/// Operations on states, each joining the caller's transaction or running in
/// a new one that commits.
#[derive(Clone)]
pub struct StateService {
    manager: TransactionManager,
    repo: StateRepository,
}

impl StateService {
    pub fn new(manager: TransactionManager, repo: StateRepository) -> StateService {
        StateService { manager, repo }
    }

    pub fn list_states(&self) -> Result<Vec<State>> {
        self.transactional(|tx| self.repo.find_all(tx))
    }

    pub fn get_state(&self, id: &str) -> Result<State> {
        self.transactional(|tx| {
            self.repo
                .find_by_id(tx, id)?
                .ok_or_else(|| LockingError::NotFound(id.to_owned()))
        })
    }

    /// Replaces name, code and abbreviation of the state `id`.
    pub fn update_state(&self, id: &str, state: State) -> Result<State> {
        if state.id != id {
            return Err(LockingError::Validation(format!(
                "path id `{}` does not match state id `{}`",
                id, state.id
            )));
        }
        self.transactional(|tx| {
            let mut entity = self
                .repo
                .find_for_update_by_id(tx, id)?
                .ok_or_else(|| LockingError::NotFound(id.to_owned()))?;
            entity.name = state.name;
            entity.code = state.code;
            entity.abbr = state.abbr;
            self.repo.save(tx, entity)
        })
    }

    /// Locks the row before deleting it; with `no_wait` the lock request
    /// fails instead of waiting on a conflicting holder.
    pub fn delete_state(&self, id: &str, no_wait: bool) -> Result<()> {
        self.transactional(|tx| {
            let entity = if no_wait {
                self.repo.find_for_update_no_wait_by_id(tx, id)?
            } else {
                self.repo.find_for_update_by_id(tx, id)?
            };
            let entity = entity.ok_or_else(|| LockingError::NotFound(id.to_owned()))?;
            self.repo.delete_by_id(tx, &entity.id)?;
            Ok(())
        })
    }

    pub fn delete_all_states(&self) -> Result<usize> {
        self.transactional(|tx| self.repo.delete_all(tx))
    }

    fn transactional<T>(&self, work: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        self.manager
            .execute(Propagation::JoinAmbient, Completion::Commit, work)
    }
}

/// Error body returned to callers of the service boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    #[serde(serialize_with = "serialize_millis")]
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    pub error: String,
    pub path: String,
}

impl Problem {
    pub fn from_error(path: &str, err: &LockingError) -> Problem {
        let status = match err {
            LockingError::NotFound(_) => 404,
            LockingError::Validation(_) | LockingError::Sql { .. } => 400,
            _ => 500,
        };
        if status >= 500 {
            error!("{}: {}", path, err);
        }
        Problem {
            timestamp: Utc::now(),
            status,
            error: reason_phrase(status).to_owned(),
            path: path.to_owned(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.status, self.error, self.path)
    }
}

/// Turns a service result into a response for `path`.
pub fn respond<T>(path: &str, result: Result<T>) -> std::result::Result<T, Problem> {
    result.map_err(|e| Problem::from_error(path, &e))
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}

fn serialize_millis<S: Serializer>(
    timestamp: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&timestamp.to_rfc3339_opts(SecondsFormat::Millis, true))
}
