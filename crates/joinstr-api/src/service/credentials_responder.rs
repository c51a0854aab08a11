use std::sync::Arc;
use std::time::Duration;

use joinstr_core::{
    pool::{Credentials, LocalPool, active_pools},
    protocol::{
        EventKind, PoolMessage, ProtocolError, SignedEvent, create_event,
        crypto::{decrypt_from, encrypt_for},
    },
};
use joinstr_persistence::{HistoryStoreApi, PoolStoreApi};
use joinstr_transport::{Filter, RelayTransportApi, SubscriptionEvent};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use super::Result;
use crate::util::Clock;

/// Answers join requests for our pools with the pool credentials
#[derive(Clone)]
pub struct CredentialsResponder {
    pool_store: Arc<PoolStoreApi>,
    history_store: Arc<HistoryStoreApi>,
    transport: Arc<dyn RelayTransportApi>,
    clock: Arc<dyn Clock>,
    refresh_interval: Duration,
}

impl CredentialsResponder {
    pub fn new(
        pool_store: Arc<PoolStoreApi>,
        history_store: Arc<HistoryStoreApi>,
        transport: Arc<dyn RelayTransportApi>,
        clock: Arc<dyn Clock>,
        refresh_interval: Duration,
    ) -> Self {
        Self {
            pool_store,
            history_store,
            transport,
            clock,
            refresh_interval,
        }
    }

    async fn active_pools(&self) -> Result<Vec<LocalPool>> {
        let pools = self.pool_store.get().await?.unwrap_or_default();
        let history = self.history_store.get().await?.unwrap_or_default();
        Ok(active_pools(&pools, &history, self.clock.now()))
    }

    /// Listens for join requests until `cancel` fires. The set of pools
    /// listened for is refreshed every interval.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        while !cancel.is_cancelled() {
            if let Err(e) = self.listen(&cancel).await {
                error!("Credentials responder failed: {e}");
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.refresh_interval) => {}
                }
            }
        }
        info!("Credentials responder stopped");
        Ok(())
    }

    /// One listening round over the currently active pools
    async fn listen(&self, cancel: &CancellationToken) -> Result<()> {
        let pools = self.active_pools().await?;
        if pools.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.refresh_interval) => {}
            }
            return Ok(());
        }

        let public_keys: Vec<String> = pools.iter().map(|p| p.public_key.clone()).collect();
        debug!("Listening for join requests to {} pools", public_keys.len());
        let mut subscription = self
            .transport
            .subscribe(Filter::direct_messages_to(public_keys))
            .await?;
        let refresh = tokio::time::sleep(self.refresh_interval);
        tokio::pin!(refresh);

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut refresh => break,
                item = subscription.next() => item,
            };
            match item {
                Some(SubscriptionEvent::Event(event)) => {
                    if let Err(e) = self.handle_event(&event).await {
                        warn!("Could not answer join request {}: {e}", event.id);
                    }
                }
                Some(SubscriptionEvent::EndOfStoredEvents) => {}
                None => {
                    warn!("Join request subscription ended");
                    break;
                }
            }
        }
        subscription.close();
        Ok(())
    }

    /// Sends credentials if the event is a join request for one of our pools
    /// from a requester we haven't served yet. Returns whether credentials
    /// were sent.
    pub async fn handle_event(&self, event: &SignedEvent) -> Result<bool> {
        let pools = self.active_pools().await?;
        let Some(pool) = pools
            .into_iter()
            .find(|p| event.tagged_public_keys().any(|tagged| tagged == p.public_key))
        else {
            return Ok(false);
        };
        if event.pubkey == pool.public_key {
            return Ok(false);
        }
        if pool.peers_public_keys.contains(&event.pubkey) {
            debug!("Pool {}: {} already has credentials", pool.id, event.pubkey);
            return Ok(false);
        }
        if pool.peers_public_keys.len() + 1 >= pool.peers as usize {
            info!("Pool {} is full, ignoring request from {}", pool.id, event.pubkey);
            return Ok(false);
        }

        let pool_keys = pool.keys()?;
        let requester = event.author()?;
        let plaintext = decrypt_from(&event.content, &pool_keys, &requester)?;
        if PoolMessage::decode(&plaintext)? != PoolMessage::JoinRequest {
            debug!("Pool {}: ignoring non join message {}", pool.id, event.id);
            return Ok(false);
        }

        let credentials = serde_json::to_string(&Credentials::from(&pool))
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        let content = encrypt_for(&credentials, &pool_keys, &requester)?;
        let reply = create_event(
            &content,
            EventKind::EncryptedDirectMessage,
            &pool_keys,
            Some(&event.pubkey),
        )?;
        self.transport.publish(&reply).await?;
        info!("Pool {}: sent credentials to {}", pool.id, event.pubkey);

        let pool_id = pool.id.clone();
        let requester_key = event.pubkey.clone();
        self.pool_store
            .update(Box::new(move |pools| {
                let mut pools = pools.unwrap_or_default();
                if let Some(pool) = pools.iter_mut().find(|p| p.id == pool_id) {
                    if !pool.peers_public_keys.contains(&requester_key) {
                        pool.peers_public_keys.push(requester_key);
                    }
                }
                pools
            }))
            .await?;
        Ok(true)
    }
}
