use std::sync::Arc;
use std::time::Duration;

use joinstr_core::pool::{LocalPool, first_ready_pool};
use joinstr_persistence::{HistoryStoreApi, PoolStoreApi};
use log::{debug, error, info};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::Result;
use crate::util::Clock;

/// Periodically evaluates the stored pools and surfaces the first one whose
/// outputs are all registered. At most one pool is surfaced at a time.
pub struct ReadinessMonitor {
    pool_store: Arc<PoolStoreApi>,
    history_store: Arc<HistoryStoreApi>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    ready: watch::Sender<Option<LocalPool>>,
}

impl ReadinessMonitor {
    pub fn new(
        pool_store: Arc<PoolStoreApi>,
        history_store: Arc<HistoryStoreApi>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        let (ready, _) = watch::channel(None);
        Self {
            pool_store,
            history_store,
            clock,
            interval,
            ready,
        }
    }

    /// The currently surfaced ready pool
    pub fn subscribe(&self) -> watch::Receiver<Option<LocalPool>> {
        self.ready.subscribe()
    }

    pub fn ready_pool(&self) -> Option<LocalPool> {
        self.ready.borrow().clone()
    }

    /// Runs a single evaluation against the current store contents
    pub async fn tick(&self) -> Result<Option<LocalPool>> {
        let pools = self.pool_store.get().await?.unwrap_or_default();
        let history = self.history_store.get().await?.unwrap_or_default();
        let ready = first_ready_pool(&pools, &history, self.clock.now());
        self.ready.send_if_modified(|current| {
            if *current == ready {
                return false;
            }
            match &ready {
                Some(pool) => info!("Pool {} is ready", pool.id),
                None => debug!("No ready pool"),
            }
            *current = ready.clone();
            true
        });
        Ok(ready)
    }

    /// Evaluates every interval until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if let Err(e) = self.tick().await {
                error!("Readiness check failed: {e}");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        debug!("Readiness monitor stopped");
    }
}
