use serde::Serialize;
use serde::de::DeserializeOwned;
use surrealdb::{Surreal, engine::any::Any};

use super::Result;

/// Thin wrapper around the SurrealDB client exposing the record operations
/// the stores need
#[derive(Clone, Debug)]
pub struct SurrealWrapper {
    pub db: Surreal<Any>,
}

impl SurrealWrapper {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    pub async fn upsert<T, D>(&self, table: &str, id: String, data: D) -> Result<Option<T>>
    where
        T: DeserializeOwned,
        D: Serialize + 'static,
    {
        let data: Option<T> = self.db.upsert((table, id)).content(data).await?;
        Ok(data)
    }

    pub async fn select_one<T>(&self, table: &str, id: String) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let data: Option<T> = self.db.select((table, id)).await?;
        Ok(data)
    }
}
