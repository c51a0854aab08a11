use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use joinstr_core::{
    JoinstrKeys, ServiceTraitBounds,
    pool::{
        Credentials, HistoryEntry, LocalPool, PoolAnnouncement, PoolState, active_pools,
        select_other_pools,
    },
    protocol::{
        EventKind, PoolMessage, ProtocolValidationError, Registration, SignedEvent, create_event,
        crypto::{self, parse_public_key, self_shared_secret, shared_secret},
    },
    util::generate_pool_id,
};
use joinstr_persistence::{HistoryStoreApi, PoolStoreApi};
use joinstr_transport::{Filter, RelayTransportApi, Subscription, SubscriptionEvent};
use log::{debug, error, info, warn};
#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;

use super::{Error, Result};
use crate::{
    Config,
    external::{fee::FeeEstimatorApi, wallet::WalletClientApi},
    util::Clock,
};

#[cfg(test)]
impl ServiceTraitBounds for MockPoolServiceApi {}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PoolServiceApi: ServiceTraitBounds {
    /// Announces a new pool and registers our own output in it. Nothing is
    /// published if the fee rate or the wallet address can't be obtained.
    /// If only the registration fails, the pool is returned without
    /// `own_address` and stays in `PoolState::Registering`.
    async fn create_pool(&self, denomination: f64, peers: u32) -> Result<LocalPool>;

    /// Open pools announced by others, longest-lived first
    async fn fetch_other_pools(&self) -> Result<Vec<PoolAnnouncement>>;

    /// Asks the pool behind `pool_public_key` for its credentials and waits
    /// for them until they arrive or `cancel` fires. On success the pool is
    /// stored and our output is registered with the pool keys, a failed
    /// registration is reported like in `create_pool`.
    async fn join_request(
        &self,
        pool_public_key: &str,
        cancel: CancellationToken,
    ) -> Result<LocalPool>;

    /// Publishes an output registration on the pool channel. The first output
    /// registered in a stored pool becomes its `own_address`.
    async fn register_output(&self, address: &str, pool_keys: &JoinstrKeys)
    -> Result<SignedEvent>;

    /// Publishes a signed PSBT on the pool channel
    async fn register_input(&self, psbt: &str, pool_keys: &JoinstrKeys) -> Result<SignedEvent>;

    /// Collects output registrations of the given pool into its stored record
    /// until as many distinct addresses as peers are registered
    async fn check_registered_outputs(
        &self,
        pool_id: &str,
        pool_keys: &JoinstrKeys,
        cancel: CancellationToken,
    ) -> Result<LocalPool>;

    /// Collects input registrations of the given pool into its stored record
    /// until as many distinct PSBTs as peers are registered
    async fn check_registered_inputs(
        &self,
        pool_id: &str,
        pool_keys: &JoinstrKeys,
        cancel: CancellationToken,
    ) -> Result<LocalPool>;

    /// Pools we created or joined that are neither expired nor executed
    async fn local_pools(&self) -> Result<Vec<LocalPool>>;

    async fn get_local_pool(&self, pool_id: &str) -> Result<LocalPool>;

    /// Forgets a local pool, does nothing if it doesn't exist
    async fn remove_local_pool(&self, pool_id: &str) -> Result<()>;

    async fn pool_state(&self, pool_id: &str) -> Result<PoolState>;

    /// Appends a completed coinjoin to the history
    async fn record_coinjoin(&self, entry: HistoryEntry) -> Result<()>;

    /// Completed coinjoins, newest first
    async fn history(&self) -> Result<Vec<HistoryEntry>>;
}

/// The pool coordinator
#[derive(Clone)]
pub struct PoolService {
    pool_store: Arc<PoolStoreApi>,
    history_store: Arc<HistoryStoreApi>,
    transport: Arc<dyn RelayTransportApi>,
    wallet_client: Arc<dyn WalletClientApi>,
    fee_estimator: Arc<dyn FeeEstimatorApi>,
    clock: Arc<dyn Clock>,
    relay: String,
    announcement_kind: EventKind,
    pool_timeout: Duration,
}

impl ServiceTraitBounds for PoolService {}

#[derive(Clone, Copy)]
enum RegistrationKind {
    Output,
    Input,
}

impl RegistrationKind {
    fn accepts(&self, registration: &Registration) -> bool {
        match self {
            RegistrationKind::Output => registration.address().is_some(),
            RegistrationKind::Input => registration.hex().is_some(),
        }
    }

    fn is_complete(&self, pool: &LocalPool) -> bool {
        match self {
            RegistrationKind::Output => pool.is_ready(),
            RegistrationKind::Input => pool.inputs_complete(),
        }
    }
}

impl PoolService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool_store: Arc<PoolStoreApi>,
        history_store: Arc<HistoryStoreApi>,
        transport: Arc<dyn RelayTransportApi>,
        wallet_client: Arc<dyn WalletClientApi>,
        fee_estimator: Arc<dyn FeeEstimatorApi>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self {
            pool_store,
            history_store,
            transport,
            wallet_client,
            fee_estimator,
            clock,
            relay: config.nostr_relay.clone(),
            announcement_kind: config.announcement_kind,
            pool_timeout: config.pool_timeout(),
        }
    }

    async fn stored_pools(&self) -> Result<Vec<LocalPool>> {
        Ok(self.pool_store.get().await?.unwrap_or_default())
    }

    async fn stored_history(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.history_store.get().await?.unwrap_or_default())
    }

    /// Inserts the pool, replacing a stored record with the same id
    async fn save_pool(&self, pool: LocalPool) -> Result<()> {
        self.pool_store
            .update(Box::new(move |pools| {
                let mut pools = pools.unwrap_or_default();
                pools.retain(|p| p.id != pool.id);
                pools.push(pool);
                pools
            }))
            .await?;
        Ok(())
    }

    /// Registers our output in a freshly stored pool. The address is only
    /// stored once the registration is published. A failed registration
    /// leaves the pool in `Registering` and is retried with `register_output`.
    async fn register_own_output(
        &self,
        mut pool: LocalPool,
        address: String,
        pool_keys: &JoinstrKeys,
    ) -> Result<LocalPool> {
        match self.register_output(&address, pool_keys).await {
            Ok(_) => pool.own_address = Some(address),
            Err(e) => warn!("Pool {}: could not register our output: {e}", pool.id),
        }
        Ok(pool)
    }

    async fn publish_registration(
        &self,
        registration: Registration,
        pool_keys: &JoinstrKeys,
    ) -> Result<SignedEvent> {
        let secret = self_shared_secret(pool_keys)?;
        let content = crypto::encrypt(&PoolMessage::from(registration).encode()?, &secret)?;
        let pool_public_key = pool_keys.get_public_key();
        let event = create_event(
            &content,
            EventKind::EncryptedDirectMessage,
            pool_keys,
            Some(&pool_public_key),
        )?;
        self.transport.publish(&event).await?;
        Ok(event)
    }

    /// Decodes a registration from the pool channel. Registrations are
    /// signed with the pool keys, anything else on the channel yields None.
    fn read_registration(
        event: &SignedEvent,
        secret: &[u8],
        pool_public_key: &str,
    ) -> Option<Registration> {
        if event.pubkey != pool_public_key {
            return None;
        }
        let plaintext = match crypto::decrypt(&event.content, secret) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("Discarding undecryptable registration {}: {e}", event.id);
                return None;
            }
        };
        match PoolMessage::decode(&plaintext) {
            Ok(message) => message.registration(),
            Err(e) => {
                warn!("Discarding malformed registration {}: {e}", event.id);
                None
            }
        }
    }

    /// Decrypts and checks credentials sent by the pool
    fn read_credentials(
        event: &SignedEvent,
        secret: &[u8],
        pool_public_key: &str,
    ) -> Result<(Credentials, JoinstrKeys)> {
        let plaintext = crypto::decrypt(&event.content, secret)?;
        let credentials: Credentials = serde_json::from_str(&plaintext)
            .map_err(joinstr_core::protocol::ProtocolError::from)?;
        if credentials.public_key != pool_public_key {
            return Err(ProtocolValidationError::CredentialsMismatch.into());
        }
        let keys = credentials.keys()?;
        Ok((credentials, keys))
    }

    async fn next_item(
        subscription: &mut Subscription,
        cancel: &CancellationToken,
    ) -> Result<SubscriptionEvent> {
        tokio::select! {
            _ = cancel.cancelled() => {
                subscription.close();
                Err(Error::Cancelled)
            }
            item = subscription.next() => item.ok_or(Error::Transport(joinstr_transport::Error::Closed)),
        }
    }

    async fn check_registrations(
        &self,
        kind: RegistrationKind,
        pool_id: &str,
        pool_keys: &JoinstrKeys,
        cancel: CancellationToken,
    ) -> Result<LocalPool> {
        let pool = self.get_local_pool(pool_id).await?;
        if kind.is_complete(&pool) {
            return Ok(pool);
        }
        let secret = self_shared_secret(pool_keys)?;
        let pool_public_key = pool_keys.get_public_key();
        let mut seen: HashSet<Registration> = pool.peers_data.iter().cloned().collect();
        let mut subscription = self
            .transport
            .subscribe(Filter::direct_messages_to([pool_public_key.clone()]))
            .await?;

        loop {
            let event = match Self::next_item(&mut subscription, &cancel).await? {
                SubscriptionEvent::Event(event) => event,
                SubscriptionEvent::EndOfStoredEvents => {
                    debug!("Pool {pool_id}: stored registrations processed");
                    continue;
                }
            };
            let Some(registration) = Self::read_registration(&event, &secret, &pool_public_key) else {
                continue;
            };
            if !kind.accepts(&registration) || !seen.insert(registration.clone()) {
                continue;
            }

            let id = pool_id.to_owned();
            let pools = self
                .pool_store
                .update(Box::new(move |pools| {
                    let mut pools = pools.unwrap_or_default();
                    if let Some(pool) = pools.iter_mut().find(|p| p.id == id) {
                        pool.merge_registrations([registration]);
                    }
                    pools
                }))
                .await?;
            let pool = pools
                .into_iter()
                .find(|p| p.id == pool_id)
                .ok_or_else(|| ProtocolValidationError::PoolNotFound(pool_id.to_owned()))?;
            if kind.is_complete(&pool) {
                info!("Pool {pool_id}: all {} peers registered", pool.peers);
                subscription.close();
                return Ok(pool);
            }
        }
    }
}

#[async_trait]
impl PoolServiceApi for PoolService {
    async fn create_pool(&self, denomination: f64, peers: u32) -> Result<LocalPool> {
        let now = self.clock.now();
        let pool_keys = JoinstrKeys::new();
        let announcement = PoolAnnouncement {
            id: generate_pool_id(now),
            public_key: pool_keys.get_public_key(),
            denomination,
            peers,
            timeout: now + self.pool_timeout,
            relay: self.relay.clone(),
            fee_rate: 0,
            transport: None,
            vpn_gateway: None,
        };
        announcement.validate_at(now)?;

        let fee_rate = self.fee_estimator.get_hour_fee().await.map_err(|e| {
            error!("Could not get fee rate for new pool: {e}");
            e
        })?;
        let address = self.wallet_client.get_new_address().await.map_err(|e| {
            error!("Could not get address for new pool: {e}");
            e
        })?;
        let announcement = PoolAnnouncement {
            fee_rate,
            ..announcement
        };

        let event_keys = JoinstrKeys::new();
        let content = PoolMessage::Announcement(announcement.clone()).encode()?;
        let event = create_event(&content, self.announcement_kind, &event_keys, None)?;
        self.transport.publish(&event).await?;
        info!("Announced pool {} in event {}", announcement.id, event.id);

        let pool = LocalPool::new(announcement, &pool_keys);
        self.save_pool(pool.clone()).await?;
        self.register_own_output(pool, address, &pool_keys).await
    }

    async fn fetch_other_pools(&self) -> Result<Vec<PoolAnnouncement>> {
        let events = self
            .transport
            .fetch_events(Filter::new().kind(self.announcement_kind))
            .await?;
        let announcements: Vec<PoolAnnouncement> = events
            .into_iter()
            .filter_map(|event| match PoolMessage::decode(&event.content) {
                Ok(PoolMessage::Announcement(announcement)) => {
                    match announcement.validate_at(event.created_at()) {
                        Ok(()) => Some(announcement),
                        Err(e) => {
                            debug!("Skipping invalid announcement {}: {e}", event.id);
                            None
                        }
                    }
                }
                Ok(_) => None,
                Err(e) => {
                    debug!("Skipping undecodable announcement {}: {e}", event.id);
                    None
                }
            })
            .collect();
        let my_pools = self.stored_pools().await?;
        let history = self.stored_history().await?;
        let pools = select_other_pools(announcements, &my_pools, &history, self.clock.now());
        debug!("Found {} open pools", pools.len());
        Ok(pools)
    }

    async fn join_request(
        &self,
        pool_public_key: &str,
        cancel: CancellationToken,
    ) -> Result<LocalPool> {
        let pool_key = parse_public_key(pool_public_key)?;
        let address = self.wallet_client.get_new_address().await.map_err(|e| {
            error!("Could not get address to join pool {pool_public_key}: {e}");
            e
        })?;

        let keys = JoinstrKeys::new();
        let secret = shared_secret(&keys.get_private_key(), &pool_key)?;
        let mut subscription = self
            .transport
            .subscribe(Filter::direct_messages_to([keys.get_public_key()]))
            .await?;

        let content = crypto::encrypt(&PoolMessage::JoinRequest.encode()?, &secret)?;
        let request = create_event(
            &content,
            EventKind::EncryptedDirectMessage,
            &keys,
            Some(pool_public_key),
        )?;
        self.transport.publish(&request).await?;
        info!("Sent join request {} to pool {pool_public_key}", request.id);

        let (credentials, pool_keys) = loop {
            let event = match Self::next_item(&mut subscription, &cancel).await? {
                SubscriptionEvent::Event(event) => event,
                SubscriptionEvent::EndOfStoredEvents => continue,
            };
            if event.pubkey != pool_public_key {
                debug!("Ignoring message {} not sent by the pool", event.id);
                continue;
            }
            match Self::read_credentials(&event, &secret, pool_public_key) {
                Ok(received) => break received,
                Err(e) => warn!("Discarding invalid credentials {}: {e}", event.id),
            }
        };
        subscription.close();
        info!("Received credentials for pool {}", credentials.id);

        let pool = LocalPool::from_credentials(credentials);
        self.save_pool(pool.clone()).await?;
        self.register_own_output(pool, address, &pool_keys).await
    }

    async fn register_output(
        &self,
        address: &str,
        pool_keys: &JoinstrKeys,
    ) -> Result<SignedEvent> {
        let event = self
            .publish_registration(
                Registration::Output {
                    address: address.to_owned(),
                },
                pool_keys,
            )
            .await?;
        let pool_public_key = pool_keys.get_public_key();
        debug!("Registered output for pool {pool_public_key}");

        let own_address = address.to_owned();
        self.pool_store
            .update(Box::new(move |pools| {
                let mut pools = pools.unwrap_or_default();
                if let Some(pool) = pools
                    .iter_mut()
                    .find(|p| p.public_key == pool_public_key && p.own_address.is_none())
                {
                    pool.own_address = Some(own_address);
                }
                pools
            }))
            .await?;
        Ok(event)
    }

    async fn register_input(&self, psbt: &str, pool_keys: &JoinstrKeys) -> Result<SignedEvent> {
        let event = self
            .publish_registration(
                Registration::Input {
                    hex: psbt.to_owned(),
                },
                pool_keys,
            )
            .await?;
        debug!("Registered input for pool {}", pool_keys.get_public_key());
        Ok(event)
    }

    async fn check_registered_outputs(
        &self,
        pool_id: &str,
        pool_keys: &JoinstrKeys,
        cancel: CancellationToken,
    ) -> Result<LocalPool> {
        self.check_registrations(RegistrationKind::Output, pool_id, pool_keys, cancel)
            .await
    }

    async fn check_registered_inputs(
        &self,
        pool_id: &str,
        pool_keys: &JoinstrKeys,
        cancel: CancellationToken,
    ) -> Result<LocalPool> {
        self.check_registrations(RegistrationKind::Input, pool_id, pool_keys, cancel)
            .await
    }

    async fn local_pools(&self) -> Result<Vec<LocalPool>> {
        let pools = self.stored_pools().await?;
        let history = self.stored_history().await?;
        Ok(active_pools(&pools, &history, self.clock.now()))
    }

    async fn get_local_pool(&self, pool_id: &str) -> Result<LocalPool> {
        self.stored_pools()
            .await?
            .into_iter()
            .find(|p| p.id == pool_id)
            .ok_or_else(|| ProtocolValidationError::PoolNotFound(pool_id.to_owned()).into())
    }

    async fn remove_local_pool(&self, pool_id: &str) -> Result<()> {
        let id = pool_id.to_owned();
        self.pool_store
            .update(Box::new(move |pools| {
                let mut pools = pools.unwrap_or_default();
                pools.retain(|p| p.id != id);
                pools
            }))
            .await?;
        info!("Removed local pool {pool_id}");
        Ok(())
    }

    async fn pool_state(&self, pool_id: &str) -> Result<PoolState> {
        let pool = self.get_local_pool(pool_id).await?;
        let history = self.stored_history().await?;
        Ok(pool.state(self.clock.now(), &history))
    }

    async fn record_coinjoin(&self, entry: HistoryEntry) -> Result<()> {
        self.history_store
            .update(Box::new(move |history| {
                let mut history = history.unwrap_or_default();
                if !history.iter().any(|h| h.private_key == entry.private_key) {
                    history.push(entry);
                }
                history
            }))
            .await?;
        Ok(())
    }

    async fn history(&self) -> Result<Vec<HistoryEntry>> {
        let mut history = self.stored_history().await?;
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(history)
    }
}
