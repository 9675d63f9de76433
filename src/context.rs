use crate::acquirer::RowLockAcquirer;
use crate::classify::{classifier_for, OutcomeClassifier};
use crate::engine::pool::ConnectionPool;
use crate::engine::Database;
use crate::fixture::FixtureLoader;
use crate::options::EngineOptions;
use crate::repository::StateRepository;
use crate::service::StateService;
use crate::transactions::manager::TransactionManager;
use crate::Result;
use std::sync::Arc;

/// Everything a locking scenario needs, wired against one database.
pub struct LockingContext {
    pub options: EngineOptions,
    pub database: Database,
    pub manager: TransactionManager,
    pub repo: StateRepository,
    pub service: StateService,
    pub fixtures: FixtureLoader,
    pub classifier: Box<dyn OutcomeClassifier>,
}

impl LockingContext {
    pub fn open(options: EngineOptions) -> Result<LockingContext> {
        let database = Database::open(&options);
        let pool = ConnectionPool::new(Arc::new(database.clone()), &options)?;
        let manager = TransactionManager::new(pool);
        let repo = StateRepository::new(RowLockAcquirer::new(&options));
        Ok(LockingContext {
            database,
            service: StateService::new(manager.clone(), repo),
            fixtures: FixtureLoader::new(manager.clone()),
            classifier: classifier_for(options.dialect),
            manager,
            repo,
            options,
        })
    }
}
