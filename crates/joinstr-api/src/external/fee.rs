use async_trait::async_trait;
use bitcoin::Network;
use joinstr_core::ServiceTraitBounds;
use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::Config;

/// Generic result type
pub type Result<T> = std::result::Result<T, super::Error>;

/// Generic error type
#[derive(Debug, Error)]
pub enum Error {
    /// the fee API answered with an unusable rate
    #[error("Got an invalid fee rate from the API: {0}")]
    InvalidFeeRate(u64),
}

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait FeeEstimatorApi: ServiceTraitBounds {
    /// The fee rate in sat/vB expected to confirm within an hour
    async fn get_hour_fee(&self) -> Result<u64>;
}

#[cfg(test)]
impl ServiceTraitBounds for MockFeeEstimatorApi {}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedFees {
    pub fastest_fee: u64,
    pub half_hour_fee: u64,
    pub hour_fee: u64,
    pub economy_fee: u64,
    pub minimum_fee: u64,
}

#[derive(Clone)]
pub struct FeeEstimator {
    cl: reqwest::Client,
    base_url: String,
    network: Network,
}

impl ServiceTraitBounds for FeeEstimator {}

impl FeeEstimator {
    pub fn new(config: &Config) -> Self {
        Self {
            cl: reqwest::Client::new(),
            base_url: config.fee_api_base_url.clone(),
            network: config.bitcoin_network(),
        }
    }

    fn build_api_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        match self.network {
            Network::Bitcoin => format!("{base}/api/v1/fees/recommended"),
            Network::Testnet => format!("{base}/testnet/api/v1/fees/recommended"),
            Network::Testnet4 => format!("{base}/testnet4/api/v1/fees/recommended"),
            _ => format!("{base}/signet/api/v1/fees/recommended"),
        }
    }
}

#[async_trait]
impl FeeEstimatorApi for FeeEstimator {
    async fn get_hour_fee(&self) -> Result<u64> {
        let url = self.build_api_url();
        let fees: RecommendedFees = self
            .cl
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("Recommended fees from {url}: {fees:?}");
        if fees.hour_fee == 0 {
            return Err(Error::InvalidFeeRate(fees.hour_fee).into());
        }
        Ok(fees.hour_fee)
    }
}
