use super::Result;
use crate::constants::{SURREAL_DB_CONNECTION, SURREAL_DB_DATABASE, SURREAL_DB_NAMESPACE};
use surrealdb::{
    Surreal,
    engine::any::{Any, connect},
};

pub mod collection;
pub mod surreal;

/// Configuration for the SurrealDB connection string, namespace and
/// database name
#[derive(Clone, Debug)]
pub struct SurrealDbConfig {
    pub connection_string: String,
    pub namespace: String,
    pub database: String,
}

impl Default for SurrealDbConfig {
    fn default() -> Self {
        Self {
            connection_string: SURREAL_DB_CONNECTION.to_owned(),
            namespace: SURREAL_DB_NAMESPACE.to_owned(),
            database: SURREAL_DB_DATABASE.to_owned(),
        }
    }
}

/// Connect to the SurrealDB instance using the provided configuration.
pub async fn get_surreal_db(config: &SurrealDbConfig) -> Result<Surreal<Any>> {
    let db = connect(&config.connection_string).await.map_err(|e| {
        log::error!("Error connecting to SurrealDB with config: {config:?}. Error: {e}");
        e
    })?;
    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await?;
    Ok(db)
}

/// An in-memory database, handy for tests and throwaway sessions.
#[cfg(any(test, feature = "mem-db"))]
pub async fn get_memory_db(namespace: &str, database: &str) -> Result<Surreal<Any>> {
    let db = connect("mem://").await?;
    db.use_ns(namespace).use_db(database).await?;
    Ok(db)
}
