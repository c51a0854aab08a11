use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use joinstr_core::{
    ServiceTraitBounds,
    pool::{HistoryEntry, LocalPool},
};
use log::debug;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;

use super::{Result, surreal::SurrealWrapper};
use crate::{
    constants::{DB_COLLECTION_ID, DB_HISTORY_TABLE, DB_POOLS_TABLE},
    store::{StoreApi, UpdateFn},
};

/// Stores a whole collection as a single record. Updates from this process
/// are serialized through a lock shared by all clones of the store.
pub struct SurrealCollectionStore<T> {
    db: SurrealWrapper,
    table: &'static str,
    lock: Arc<Mutex<()>>,
    _marker: PhantomData<fn() -> T>,
}

pub type SurrealPoolStore = SurrealCollectionStore<Vec<LocalPool>>;
pub type SurrealHistoryStore = SurrealCollectionStore<Vec<HistoryEntry>>;

impl<T> Clone for SurrealCollectionStore<T> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            table: self.table,
            lock: self.lock.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> SurrealCollectionStore<T> {
    pub fn new(db: SurrealWrapper, table: &'static str) -> Self {
        Self {
            db,
            table,
            lock: Arc::new(Mutex::new(())),
            _marker: PhantomData,
        }
    }
}

impl SurrealPoolStore {
    pub fn pools(db: SurrealWrapper) -> Self {
        Self::new(db, DB_POOLS_TABLE)
    }
}

impl SurrealHistoryStore {
    pub fn history(db: SurrealWrapper) -> Self {
        Self::new(db, DB_HISTORY_TABLE)
    }
}

impl<T> SurrealCollectionStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn read(&self) -> Result<Option<T>> {
        let record: Option<CollectionDb<T>> = self
            .db
            .select_one(self.table, DB_COLLECTION_ID.to_owned())
            .await?;
        Ok(record.map(|r| r.value))
    }

    async fn write(&self, value: T) -> Result<()> {
        let _: Option<CollectionDb<T>> = self
            .db
            .upsert(
                self.table,
                DB_COLLECTION_ID.to_owned(),
                CollectionDb { value },
            )
            .await?;
        Ok(())
    }
}

impl<T> ServiceTraitBounds for SurrealCollectionStore<T> {}

#[async_trait]
impl<T> StoreApi<T> for SurrealCollectionStore<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn get(&self) -> Result<Option<T>> {
        self.read().await
    }

    async fn set(&self, value: T) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.write(value).await
    }

    async fn update(&self, update: UpdateFn<T>) -> Result<T> {
        let _guard = self.lock.lock().await;
        let current = self.read().await?;
        let next = update(current);
        self.write(next.clone()).await?;
        debug!("Updated collection {}", self.table);
        Ok(next)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct CollectionDb<T> {
    pub value: T,
}
