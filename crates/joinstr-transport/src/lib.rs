use thiserror::Error;

pub mod constants;
pub mod message;
#[cfg(any(test, feature = "mock-relay"))]
pub mod mock_relay;
mod relay;
mod subscription;

pub use async_broadcast::Receiver;
pub use message::{ClientMessage, Filter, RelayMessage};
pub use relay::{RelayClient, RelayTransportApi};
pub use subscription::{Subscription, SubscriptionEvent, SubscriptionFeed};

/// Generic result type
pub type Result<T> = std::result::Result<T, Error>;

/// Generic error type
#[derive(Debug, Error)]
pub enum Error {
    /// Connecting to or talking with the relay failed
    #[error("Network error: {0}")]
    Network(String),

    /// A frame could not be serialized or parsed
    #[error("Message error: {0}")]
    Message(String),

    /// The relay refused the event
    #[error("Relay rejected event: {0}")]
    Rejected(String),

    /// The relay did not answer in time
    #[error("Relay timeout: {0}")]
    Timeout(String),

    /// The connection was closed before the operation finished
    #[error("Relay connection closed")]
    Closed,
}
