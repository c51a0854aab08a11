use std::time::Duration;

use bitcoin::Network;
use joinstr_core::protocol::{EventKind, ProtocolValidationError, validate_relay_url};
use url::Url;

pub mod constants;
mod context;
pub mod external;
pub mod persistence;
pub mod service;
#[cfg(test)]
mod tests;
pub mod util;

pub use context::Context;
pub use persistence::DbContext;
pub use persistence::Error as PersistenceError;
pub use persistence::db::SurrealDbConfig;
pub use persistence::get_db_context;

/// Application context handed to [Context::new]
#[derive(Debug, Clone)]
pub struct Config {
    /// The relay all pool traffic goes through
    pub nostr_relay: String,
    pub bitcoin_network: String,
    pub node_config: NodeConfig,
    pub db_config: SurrealDbConfig,
    /// Lifetime of a newly created pool
    pub pool_timeout_secs: u64,
    /// Delay between two readiness evaluations
    pub readiness_interval_secs: u64,
    /// Event kind pool announcements are published and discovered with
    pub announcement_kind: EventKind,
    /// Upper bound for connecting to the relay and waiting for its answers
    pub relay_timeout_secs: u64,
    /// mempool.space compatible fee API
    pub fee_api_base_url: String,
}

impl Config {
    pub fn bitcoin_network(&self) -> Network {
        match self.bitcoin_network.as_str() {
            "mainnet" => Network::Bitcoin,
            "testnet" => Network::Testnet,
            "testnet4" => Network::Testnet4,
            "regtest" => Network::Regtest,
            _ => Network::Signet,
        }
    }

    pub fn relay_url(&self) -> Result<Url, ProtocolValidationError> {
        validate_relay_url(&self.nostr_relay)
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_timeout_secs)
    }

    pub fn readiness_interval(&self) -> Duration {
        Duration::from_secs(self.readiness_interval_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nostr_relay: constants::DEFAULT_NOSTR_RELAY.to_owned(),
            bitcoin_network: constants::DEFAULT_BITCOIN_NETWORK.to_owned(),
            node_config: NodeConfig::default(),
            db_config: SurrealDbConfig::default(),
            pool_timeout_secs: joinstr_core::constants::DEFAULT_POOL_TIMEOUT_SECONDS,
            readiness_interval_secs: constants::DEFAULT_READINESS_INTERVAL_SECONDS,
            announcement_kind: EventKind::JoinStr,
            relay_timeout_secs: constants::DEFAULT_RELAY_TIMEOUT_SECONDS,
            fee_api_base_url: constants::DEFAULT_FEE_API_BASE_URL.to_owned(),
        }
    }
}

/// Bitcoin Core wallet RPC connection
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub url: String,
    pub user_name: String,
    pub password: String,
    pub port: u16,
    /// Wallet to address RPC calls to, the node default if empty
    pub selected_wallet: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: constants::DEFAULT_NODE_URL.to_owned(),
            user_name: String::new(),
            password: String::new(),
            port: constants::DEFAULT_NODE_PORT,
            selected_wallet: String::new(),
        }
    }
}
