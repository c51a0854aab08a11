pub mod fee;
pub mod wallet;

use thiserror::Error;

/// Generic error type
#[derive(Debug, Error)]
pub enum Error {
    /// all errors originating from external API requests
    #[error("External Request error: {0}")]
    ExternalApi(#[from] reqwest::Error),

    /// all errors originating from the wallet RPC
    #[error("External Wallet RPC error: {0}")]
    ExternalWalletApi(#[from] wallet::Error),

    /// all errors originating from the fee estimation API
    #[error("External Fee API error: {0}")]
    ExternalFeeApi(#[from] fee::Error),
}
