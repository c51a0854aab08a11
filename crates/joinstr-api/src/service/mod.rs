pub mod credentials_responder;
pub mod pool_service;
pub mod readiness;
#[cfg(test)]
mod scenario_tests;

use crate::external;
use joinstr_core::protocol::{ProtocolError, ProtocolValidationError, crypto};
use thiserror::Error;

/// Generic result type
pub type Result<T> = std::result::Result<T, Error>;

/// Generic error type
#[derive(Debug, Error)]
pub enum Error {
    /// all errors originating from the persistence layer
    #[error("Persistence error: {0}")]
    Persistence(#[from] joinstr_persistence::Error),

    /// errors stemming from talking to the relay
    #[error("Relay transport error: {0}")]
    Transport(#[from] joinstr_transport::Error),

    /// errors stemming from encoding or decoding pool messages
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// errors stemming from keys, signatures and encryption
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::Error),

    /// errors that stem from validation in core
    #[error("Validation Error: {0}")]
    Validation(#[from] ProtocolValidationError),

    #[error("External API error: {0}")]
    ExternalApi(#[from] external::Error),

    /// the caller stopped the operation before it finished
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// A single human readable sentence describing the failure
    pub fn user_message(&self) -> String {
        match self {
            Error::Persistence(_) => "Could not access the local pool storage.".to_owned(),
            Error::Transport(joinstr_transport::Error::Rejected(reason)) => {
                format!("The relay rejected the event: {reason}")
            }
            Error::Transport(joinstr_transport::Error::Timeout(_)) => {
                "The relay did not answer in time, please try again.".to_owned()
            }
            Error::Transport(joinstr_transport::Error::Message(_)) => {
                "The relay sent a message that could not be understood.".to_owned()
            }
            Error::Transport(_) => "Could not reach the relay, please try again.".to_owned(),
            Error::Protocol(ProtocolError::Validation(e)) | Error::Validation(e) => {
                format!("{e}.")
            }
            Error::Protocol(ProtocolError::Crypto(_)) | Error::Crypto(_) => {
                "A pool message could not be signed or decrypted.".to_owned()
            }
            Error::Protocol(_) => "A pool message had an unexpected format.".to_owned(),
            Error::ExternalApi(external::Error::ExternalWalletApi(
                external::wallet::Error::NotConfigured,
            )) => "Configure your Bitcoin node connection first.".to_owned(),
            Error::ExternalApi(external::Error::ExternalWalletApi(_)) => {
                "Could not get a new address from your Bitcoin node.".to_owned()
            }
            Error::ExternalApi(external::Error::ExternalFeeApi(_)) => {
                "Could not fetch the current fee rate.".to_owned()
            }
            Error::ExternalApi(external::Error::ExternalApi(_)) => {
                "Could not reach an external service, please try again.".to_owned()
            }
            Error::Cancelled => "The operation was cancelled.".to_owned(),
        }
    }
}
