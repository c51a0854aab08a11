use super::Result;
use async_trait::async_trait;
use joinstr_core::{
    ServiceTraitBounds,
    pool::{HistoryEntry, LocalPool},
};

/// Transforms the current value of a collection into its next value
pub type UpdateFn<T> = Box<dyn FnOnce(Option<T>) -> T + Send>;

/// A store holding a single collection value
#[async_trait]
pub trait StoreApi<T>: ServiceTraitBounds
where
    T: Send + Sync + 'static,
{
    /// Returns the stored value, or None if nothing was stored yet
    async fn get(&self) -> Result<Option<T>>;

    /// Replaces the stored value
    async fn set(&self, value: T) -> Result<()>;

    /// Applies `update` to the value current at apply time and stores the
    /// result. Concurrent updates are serialized, none of them is lost.
    async fn update(&self, update: UpdateFn<T>) -> Result<T>;
}

/// The pools this participant created or joined
pub type PoolStoreApi = dyn StoreApi<Vec<LocalPool>>;

/// Completed coinjoins, append only
pub type HistoryStoreApi = dyn StoreApi<Vec<HistoryEntry>>;
