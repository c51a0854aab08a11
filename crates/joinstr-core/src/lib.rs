pub mod constants;
pub mod pool;
pub mod protocol;
#[cfg(test)]
mod tests;
pub mod util;

pub use protocol::crypto::JoinstrKeys;
pub use secp256k1::{SecretKey, XOnlyPublicKey};

/// Bounds shared by all services and stores, so they can be held behind
/// `Arc<dyn ...>` and used across tasks.
pub trait ServiceTraitBounds: Send + Sync {}
