pub mod constants;
pub mod db;
pub mod store;

use thiserror::Error;

/// Generic persistence result type
pub type Result<T> = std::result::Result<T, Error>;

/// Generic persistence error type
#[derive(Debug, Error)]
pub enum Error {
    #[error("SurrealDB error {0}")]
    SurrealConnection(String),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl From<surrealdb::Error> for Error {
    fn from(e: surrealdb::Error) -> Self {
        Error::SurrealConnection(format!("SurrealDB connection error: {e}"))
    }
}

#[cfg(any(test, feature = "mem-db"))]
pub use db::get_memory_db;
pub use db::{
    SurrealDbConfig,
    collection::{SurrealCollectionStore, SurrealHistoryStore, SurrealPoolStore},
    get_surreal_db,
    surreal::SurrealWrapper,
};
pub use store::{HistoryStoreApi, PoolStoreApi, StoreApi, UpdateFn};
