use thiserror::Error;
use url::Url;

pub mod crypto;
pub mod event;
pub mod message;
pub mod timestamp;

pub use event::{EventKind, SignedEvent, compute_event_id, create_event, verify_event};
pub use message::{PoolMessage, Registration};
pub use timestamp::Timestamp;

/// Generic result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

pub trait Validate {
    fn validate(&self) -> std::result::Result<(), ProtocolValidationError>;
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Errors stemming from cryptography, such as converting keys, encryption and decryption
    #[error("Cryptography error: {0}")]
    Crypto(#[from] crypto::Error),

    /// Errors stemming from validation
    #[error("validation error: {0}")]
    Validation(#[from] ProtocolValidationError),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Deserialization(format!("JSON error: {e}"))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolValidationError {
    /// error returned if the denomination is not a positive amount
    #[error("Denomination must be greater than zero")]
    InvalidDenomination,

    /// error returned if a pool would have fewer than two participants
    #[error("A pool needs at least 2 peers")]
    InvalidPeers,

    /// error returned if the pool timeout is not after its creation
    #[error("Pool timeout must be after its creation time")]
    InvalidTimeout,

    /// error returned if an event kind is outside of the supported set
    #[error("Unknown event kind {0}")]
    UnknownEventKind(u64),

    /// error returned if received credentials don't belong to the announced pool
    #[error("Credentials don't match the pool public key")]
    CredentialsMismatch,

    /// error returned if a relay url is not a websocket url
    #[error("Invalid relay url: {0}")]
    InvalidRelayUrl(String),

    /// error returned if no local pool with the given id exists
    #[error("No pool with id {0}")]
    PoolNotFound(String),
}

/// Parses a relay url, accepting only `ws` and `wss` schemes
pub fn validate_relay_url(relay: &str) -> std::result::Result<Url, ProtocolValidationError> {
    let url = Url::parse(relay).map_err(|_| ProtocolValidationError::InvalidRelayUrl(relay.to_owned()))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        _ => Err(ProtocolValidationError::InvalidRelayUrl(relay.to_owned())),
    }
}
