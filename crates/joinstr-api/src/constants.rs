pub const DEFAULT_NOSTR_RELAY: &str = "wss://nostr.fmt.wiz.biz";
pub const DEFAULT_BITCOIN_NETWORK: &str = "signet";
pub const DEFAULT_FEE_API_BASE_URL: &str = "https://mempool.space/";
pub const DEFAULT_NODE_URL: &str = "http://127.0.0.1";
pub const DEFAULT_NODE_PORT: u16 = 38332;

pub const DEFAULT_READINESS_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_RELAY_TIMEOUT_SECONDS: u64 = 10;

// Wallet RPC
pub const RPC_REQUEST_ID: &str = "curltest";
pub const RPC_VERSION: &str = "1.0";
pub const COINJOIN_ADDRESS_LABEL: &str = "coin_join";
pub const COINJOIN_ADDRESS_TYPE: &str = "bech32";
