use std::collections::{BTreeSet, HashSet};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::protocol::{
    ProtocolValidationError, Registration, Timestamp, Validate,
    crypto::{self, JoinstrKeys},
};

/// Public description of a pool, published unencrypted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolAnnouncement {
    pub id: String,
    /// x-only public key of the pool keypair
    pub public_key: String,
    /// BTC amount every participant contributes
    pub denomination: f64,
    pub peers: u32,
    /// Absolute expiry in UNIX seconds
    pub timeout: Timestamp,
    pub relay: String,
    /// sat/vB
    pub fee_rate: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpn_gateway: Option<String>,
}

impl PoolAnnouncement {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now.is_at_or_after(&self.timeout)
    }

    /// Checks the announcement against the time it was published at
    pub fn validate_at(&self, created_at: Timestamp) -> Result<(), ProtocolValidationError> {
        self.validate()?;
        if self.timeout <= created_at {
            return Err(ProtocolValidationError::InvalidTimeout);
        }
        Ok(())
    }
}

impl Validate for PoolAnnouncement {
    fn validate(&self) -> Result<(), ProtocolValidationError> {
        if !self.denomination.is_finite() || self.denomination <= 0.0 {
            return Err(ProtocolValidationError::InvalidDenomination);
        }
        if self.peers < 2 {
            return Err(ProtocolValidationError::InvalidPeers);
        }
        Ok(())
    }
}

/// The pool parameters plus its private key, sent to a joiner over the
/// encrypted channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub id: String,
    pub public_key: String,
    pub denomination: f64,
    pub peers: u32,
    pub timeout: Timestamp,
    pub relay: String,
    pub private_key: String,
    pub fee_rate: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpn_gateway: Option<String>,
}

impl Credentials {
    /// Loads the pool keypair, rejecting credentials whose private key does
    /// not belong to the advertised public key
    pub fn keys(&self) -> crate::protocol::Result<JoinstrKeys> {
        let keys = JoinstrKeys::from_private_key_string(&self.private_key)?;
        if !keys.matches_public_key(&self.public_key) {
            return Err(ProtocolValidationError::CredentialsMismatch.into());
        }
        Ok(keys)
    }
}

impl From<&LocalPool> for Credentials {
    fn from(pool: &LocalPool) -> Self {
        Self {
            id: pool.id.clone(),
            public_key: pool.public_key.clone(),
            denomination: pool.denomination,
            peers: pool.peers,
            timeout: pool.timeout,
            relay: pool.relay.clone(),
            private_key: pool.private_key.clone(),
            fee_rate: pool.fee_rate,
            transport: pool.transport.clone(),
            vpn_gateway: pool.vpn_gateway.clone(),
        }
    }
}

/// Lifecycle of a pool from the perspective of one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolState {
    /// Published, waiting for the other participants to register
    Announced,
    /// Pool known locally, own output not registered yet
    Registering,
    Ready,
    Expired,
    Executed,
}

/// A pool this participant created or joined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPool {
    pub id: String,
    pub public_key: String,
    pub denomination: f64,
    pub peers: u32,
    pub timeout: Timestamp,
    pub relay: String,
    pub private_key: String,
    pub fee_rate: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpn_gateway: Option<String>,
    #[serde(default)]
    pub peers_data: Vec<Registration>,
    /// Requesters that were already sent credentials, creator side only
    #[serde(default)]
    pub peers_public_keys: Vec<String>,
    /// The output this participant registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub own_address: Option<String>,
}

impl LocalPool {
    pub fn new(announcement: PoolAnnouncement, keys: &JoinstrKeys) -> Self {
        Self {
            id: announcement.id,
            public_key: announcement.public_key,
            denomination: announcement.denomination,
            peers: announcement.peers,
            timeout: announcement.timeout,
            relay: announcement.relay,
            private_key: keys.get_private_key_string(),
            fee_rate: announcement.fee_rate,
            transport: announcement.transport,
            vpn_gateway: announcement.vpn_gateway,
            peers_data: vec![],
            peers_public_keys: vec![],
            own_address: None,
        }
    }

    pub fn from_credentials(credentials: Credentials) -> Self {
        Self {
            id: credentials.id,
            public_key: credentials.public_key,
            denomination: credentials.denomination,
            peers: credentials.peers,
            timeout: credentials.timeout,
            relay: credentials.relay,
            private_key: credentials.private_key,
            fee_rate: credentials.fee_rate,
            transport: credentials.transport,
            vpn_gateway: credentials.vpn_gateway,
            peers_data: vec![],
            peers_public_keys: vec![],
            own_address: None,
        }
    }

    pub fn keys(&self) -> crypto::Result<JoinstrKeys> {
        JoinstrKeys::from_private_key_string(&self.private_key)
    }

    /// Distinct registered output addresses
    pub fn registered_outputs(&self) -> BTreeSet<&str> {
        self.peers_data.iter().filter_map(Registration::address).collect()
    }

    /// Distinct registered input PSBTs
    pub fn registered_inputs(&self) -> BTreeSet<&str> {
        self.peers_data.iter().filter_map(Registration::hex).collect()
    }

    pub fn is_ready(&self) -> bool {
        self.registered_outputs().len() == self.peers as usize
    }

    pub fn inputs_complete(&self) -> bool {
        self.registered_inputs().len() == self.peers as usize
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now.is_at_or_after(&self.timeout)
    }

    pub fn is_executed(&self, history: &[HistoryEntry]) -> bool {
        history.iter().any(|entry| entry.private_key == self.private_key)
    }

    /// Adds registrations not seen before, returns whether anything changed
    pub fn merge_registrations<I>(&mut self, registrations: I) -> bool
    where
        I: IntoIterator<Item = Registration>,
    {
        let mut changed = false;
        for registration in registrations {
            if !self.peers_data.contains(&registration) {
                debug!("Pool {}: new registration {registration:?}", self.id);
                self.peers_data.push(registration);
                changed = true;
            }
        }
        changed
    }

    pub fn state(&self, now: Timestamp, history: &[HistoryEntry]) -> PoolState {
        if self.is_executed(history) {
            PoolState::Executed
        } else if self.is_ready() {
            PoolState::Ready
        } else if self.is_expired(now) {
            PoolState::Expired
        } else if self.own_address.is_none() {
            PoolState::Registering
        } else {
            PoolState::Announced
        }
    }
}

/// A completed coinjoin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub relay: String,
    pub public_key: String,
    pub private_key: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub psbt: String,
    pub tx: String,
    pub timestamp: Timestamp,
}

impl HistoryEntry {
    pub fn new(pool: &LocalPool, psbt: String, tx: String, timestamp: Timestamp) -> Self {
        Self {
            relay: pool.relay.clone(),
            public_key: pool.public_key.clone(),
            private_key: pool.private_key.clone(),
            amount: pool.denomination,
            address: pool.own_address.clone(),
            psbt,
            tx,
            timestamp,
        }
    }
}

// -------------------- Selection --------------------------

/// Announcements worth showing: not expired, not one of our own pools and
/// not already executed, longest-lived first. Republished ids are kept once.
/// Executed pools are matched by public key, announcements carry no private key.
pub fn select_other_pools(
    announcements: Vec<PoolAnnouncement>,
    my_pools: &[LocalPool],
    history: &[HistoryEntry],
    now: Timestamp,
) -> Vec<PoolAnnouncement> {
    let my_ids: HashSet<&str> = my_pools.iter().map(|p| p.id.as_str()).collect();
    let executed: HashSet<&str> = history.iter().map(|h| h.public_key.as_str()).collect();
    let mut seen = HashSet::new();
    let mut result: Vec<PoolAnnouncement> = announcements
        .into_iter()
        .filter(|a| !a.is_expired(now))
        .filter(|a| !my_ids.contains(a.id.as_str()))
        .filter(|a| !executed.contains(a.public_key.as_str()))
        .filter(|a| seen.insert(a.id.clone()))
        .collect();
    result.sort_by(|a, b| b.timeout.cmp(&a.timeout));
    result
}

/// Local pools that are neither expired nor executed, longest-lived first
pub fn active_pools(pools: &[LocalPool], history: &[HistoryEntry], now: Timestamp) -> Vec<LocalPool> {
    let mut result: Vec<LocalPool> = pools
        .iter()
        .filter(|p| !p.is_expired(now) && !p.is_executed(history))
        .cloned()
        .collect();
    result.sort_by(|a, b| b.timeout.cmp(&a.timeout));
    result
}

/// The first active pool whose registrations are complete
pub fn first_ready_pool(
    pools: &[LocalPool],
    history: &[HistoryEntry],
    now: Timestamp,
) -> Option<LocalPool> {
    active_pools(pools, history, now)
        .into_iter()
        .find(LocalPool::is_ready)
}
