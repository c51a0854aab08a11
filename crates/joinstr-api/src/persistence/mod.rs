use crate::Config;
use joinstr_persistence::{
    HistoryStoreApi, PoolStoreApi, SurrealHistoryStore, SurrealPoolStore, SurrealWrapper,
    get_surreal_db,
};
use std::sync::Arc;

pub use joinstr_persistence::Error;
pub use joinstr_persistence::StoreApi;
pub use joinstr_persistence::db;

/// A container for all persistence related dependencies.
#[derive(Clone)]
pub struct DbContext {
    pub pool_store: Arc<PoolStoreApi>,
    pub history_store: Arc<HistoryStoreApi>,
}

impl DbContext {
    pub fn new(surreal_wrapper: SurrealWrapper) -> Self {
        Self {
            pool_store: Arc::new(SurrealPoolStore::pools(surreal_wrapper.clone())),
            history_store: Arc::new(SurrealHistoryStore::history(surreal_wrapper)),
        }
    }
}

/// Creates a new instance of the DbContext with the given SurrealDB configuration.
pub async fn get_db_context(conf: &Config) -> joinstr_persistence::Result<DbContext> {
    let db = get_surreal_db(&conf.db_config).await?;
    Ok(DbContext::new(SurrealWrapper::new(db)))
}
