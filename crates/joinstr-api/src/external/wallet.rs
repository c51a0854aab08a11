use async_trait::async_trait;
use bitcoin::{Address, Network, address::NetworkUnchecked};
use joinstr_core::ServiceTraitBounds;
use log::{debug, error};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    Config, NodeConfig,
    constants::{COINJOIN_ADDRESS_LABEL, COINJOIN_ADDRESS_TYPE, RPC_REQUEST_ID, RPC_VERSION},
};

/// Generic result type
pub type Result<T> = std::result::Result<T, super::Error>;

/// Generic error type
#[derive(Debug, Error)]
pub enum Error {
    /// the node connection is missing a url or credentials
    #[error("Wallet RPC is not configured")]
    NotConfigured,

    /// the node answered with an error payload
    #[error("Wallet RPC returned an error: {0}")]
    Rpc(String),

    /// the node answered without a usable result
    #[error("Wallet RPC returned an invalid response: {0}")]
    InvalidResponse(String),

    /// the returned address can't be used on the configured network
    #[error("Wallet RPC returned an invalid address: {0}")]
    InvalidAddress(String),
}

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait WalletClientApi: ServiceTraitBounds {
    /// Asks the node for a fresh bech32 address labelled for coinjoins
    async fn get_new_address(&self) -> Result<String>;
}

#[cfg(test)]
impl ServiceTraitBounds for MockWalletClientApi {}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    id: &'a str,
    jsonrpc: &'a str,
    method: &'a str,
    params: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<Value>,
}

/// Bitcoin Core JSON-RPC client authenticating with basic auth
#[derive(Clone)]
pub struct WalletRpcClient {
    cl: reqwest::Client,
    node_config: NodeConfig,
    network: Network,
}

impl ServiceTraitBounds for WalletRpcClient {}

impl WalletRpcClient {
    pub fn new(config: &Config) -> Self {
        Self {
            cl: reqwest::Client::new(),
            node_config: config.node_config.clone(),
            network: config.bitcoin_network(),
        }
    }

    fn rpc_url(&self) -> Result<String> {
        let node = &self.node_config;
        if node.url.trim().is_empty() || node.user_name.trim().is_empty() {
            return Err(Error::NotConfigured.into());
        }
        let base = format!("{}:{}", node.url.trim_end_matches('/'), node.port);
        if node.selected_wallet.is_empty() {
            Ok(format!("{base}/"))
        } else {
            Ok(format!("{base}/wallet/{}", node.selected_wallet))
        }
    }

    async fn call(&self, method: &str, params: Vec<&str>) -> Result<Value> {
        let url = self.rpc_url()?;
        let request = RpcRequest {
            id: RPC_REQUEST_ID,
            jsonrpc: RPC_VERSION,
            method,
            params,
        };
        debug!("Calling wallet RPC {method} at {url}");
        let response = self
            .cl
            .post(&url)
            .basic_auth(&self.node_config.user_name, Some(&self.node_config.password))
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        parse_rpc_response(status, &body).map_err(|e| {
            error!("Wallet RPC {method} failed: {e}");
            e
        })
    }
}

#[async_trait]
impl WalletClientApi for WalletRpcClient {
    async fn get_new_address(&self) -> Result<String> {
        let result = self
            .call(
                "getnewaddress",
                vec![COINJOIN_ADDRESS_LABEL, COINJOIN_ADDRESS_TYPE],
            )
            .await?;
        let address = result
            .as_str()
            .ok_or_else(|| Error::InvalidResponse(format!("address is not a string: {result}")))?;
        validate_address(address, self.network)
    }
}

/// Any non-success status is an error, with the node's error payload if it sent one
fn parse_rpc_response(status: StatusCode, body: &str) -> Result<Value> {
    if !status.is_success() {
        let detail = serde_json::from_str::<RpcResponse>(body)
            .ok()
            .and_then(|response| response.error)
            .filter(|error| !error.is_null())
            .map(|error| error.to_string())
            .unwrap_or_else(|| body.trim().to_owned());
        return Err(Error::Rpc(format!("HTTP {status}: {detail}")).into());
    }
    let response: RpcResponse = serde_json::from_str(body)
        .map_err(|e| Error::InvalidResponse(format!("could not parse response: {e}")))?;
    match response {
        RpcResponse {
            error: Some(error), ..
        } if !error.is_null() => Err(Error::Rpc(error.to_string()).into()),
        RpcResponse {
            result: Some(result),
            ..
        } if !result.is_null() => Ok(result),
        _ => Err(Error::InvalidResponse("missing result".to_owned()).into()),
    }
}

/// Checks that the address parses and belongs to the given network
pub fn validate_address(address: &str, network: Network) -> Result<String> {
    let unchecked: Address<NetworkUnchecked> = address
        .parse()
        .map_err(|_| Error::InvalidAddress(address.to_owned()))?;
    let checked = unchecked
        .require_network(network)
        .map_err(|_| Error::InvalidAddress(address.to_owned()))?;
    Ok(checked.to_string())
}
