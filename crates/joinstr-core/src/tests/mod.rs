#[cfg(test)]
#[allow(clippy::module_inception)]
pub mod tests {
    use crate::pool::{HistoryEntry, LocalPool, PoolAnnouncement};
    use crate::protocol::Timestamp;

    pub const TEST_PRIVATE_KEY: &str =
        "5be151f3b93b0ddacbdb634c0c1828e3b243073103418541b2c096b108d876f8";
    pub const TEST_PUBLIC_KEY: &str =
        "9d7dfdc4e5fff62bfd4f94a5c8f586021caa0fc503ca88d4457233b1a17ec11e";

    pub fn test_announcement() -> PoolAnnouncement {
        PoolAnnouncement {
            id: "qwertyuiop1700000000".to_string(),
            public_key: TEST_PUBLIC_KEY.to_string(),
            denomination: 0.01,
            peers: 2,
            timeout: Timestamp::from(1_700_000_600),
            relay: "wss://nostr.fmt.wiz.biz".to_string(),
            fee_rate: 2,
            transport: None,
            vpn_gateway: None,
        }
    }

    pub fn test_local_pool() -> LocalPool {
        LocalPool {
            id: "qwertyuiop1700000000".to_string(),
            public_key: TEST_PUBLIC_KEY.to_string(),
            denomination: 0.01,
            peers: 2,
            timeout: Timestamp::from(1_700_000_600),
            relay: "wss://nostr.fmt.wiz.biz".to_string(),
            private_key: TEST_PRIVATE_KEY.to_string(),
            fee_rate: 2,
            transport: None,
            vpn_gateway: None,
            peers_data: vec![],
            peers_public_keys: vec![],
            own_address: None,
        }
    }

    pub fn test_history_entry() -> HistoryEntry {
        HistoryEntry {
            relay: "wss://nostr.fmt.wiz.biz".to_string(),
            public_key: TEST_PUBLIC_KEY.to_string(),
            private_key: TEST_PRIVATE_KEY.to_string(),
            amount: 0.01,
            address: None,
            psbt: "cHNidP8B".to_string(),
            tx: "f4184fc596403b9d638783cf57adfe4c75c605f6356fbc91338530e9831e9e16".to_string(),
            timestamp: Timestamp::from(1_700_000_300),
        }
    }
}
