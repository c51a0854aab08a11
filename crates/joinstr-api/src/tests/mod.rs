#[cfg(test)]
#[allow(clippy::module_inception)]
pub mod tests {
    use crate::{Config, DbContext, NodeConfig, SurrealDbConfig, util::Clock};
    use async_trait::async_trait;
    use joinstr_core::{
        ServiceTraitBounds,
        pool::{HistoryEntry, LocalPool},
        protocol::{EventKind, SignedEvent, Timestamp},
    };
    use joinstr_persistence::{Result, StoreApi, SurrealWrapper, UpdateFn, get_memory_db};
    use joinstr_transport::{Filter, RelayTransportApi, Subscription};
    use std::sync::atomic::{AtomicU64, Ordering};

    pub const TEST_SIGNET_ADDRESS: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";
    pub const TEST_SIGNET_ADDRESS_OTHER: &str =
        "tb1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3q0sl5k7";
    pub const TEST_NOW: u64 = 1_700_000_000;

    // Need to wrap mocks, because traits are in a different crate
    mockall::mock! {
        pub PoolStore {}

        impl ServiceTraitBounds for PoolStore {}

        #[async_trait]
        impl StoreApi<Vec<LocalPool>> for PoolStore {
            async fn get(&self) -> Result<Option<Vec<LocalPool>>>;
            async fn set(&self, value: Vec<LocalPool>) -> Result<()>;
            async fn update(&self, update: UpdateFn<Vec<LocalPool>>) -> Result<Vec<LocalPool>>;
        }
    }

    mockall::mock! {
        pub HistoryStore {}

        impl ServiceTraitBounds for HistoryStore {}

        #[async_trait]
        impl StoreApi<Vec<HistoryEntry>> for HistoryStore {
            async fn get(&self) -> Result<Option<Vec<HistoryEntry>>>;
            async fn set(&self, value: Vec<HistoryEntry>) -> Result<()>;
            async fn update(&self, update: UpdateFn<Vec<HistoryEntry>>) -> Result<Vec<HistoryEntry>>;
        }
    }

    mockall::mock! {
        pub RelayTransport {}

        impl ServiceTraitBounds for RelayTransport {}

        #[async_trait]
        impl RelayTransportApi for RelayTransport {
            async fn publish(&self, event: &SignedEvent) -> joinstr_transport::Result<()>;
            async fn subscribe(&self, filter: Filter) -> joinstr_transport::Result<Subscription>;
            async fn fetch_events(&self, filter: Filter) -> joinstr_transport::Result<Vec<SignedEvent>>;
        }
    }

    /// A clock that only moves when told to
    pub struct TestClock(AtomicU64);

    impl TestClock {
        pub fn at(seconds: u64) -> Self {
            Self(AtomicU64::new(seconds))
        }

        pub fn advance(&self, seconds: u64) {
            self.0.fetch_add(seconds, Ordering::SeqCst);
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Timestamp {
            Timestamp::from(self.0.load(Ordering::SeqCst))
        }
    }

    pub fn init_test_cfg() -> Config {
        Config {
            nostr_relay: "ws://127.0.0.1:7777".to_owned(),
            bitcoin_network: "signet".to_owned(),
            node_config: NodeConfig {
                url: "http://127.0.0.1".to_owned(),
                user_name: "user".to_owned(),
                password: "pass".to_owned(),
                port: 38332,
                selected_wallet: String::new(),
            },
            db_config: SurrealDbConfig {
                connection_string: "mem://".to_owned(),
                namespace: "test".to_owned(),
                database: "test".to_owned(),
            },
            pool_timeout_secs: 600,
            readiness_interval_secs: 30,
            announcement_kind: EventKind::JoinStr,
            relay_timeout_secs: 2,
            fee_api_base_url: "https://mempool.space/".to_owned(),
        }
    }

    /// Fresh in-memory stores, separate for every call
    pub async fn get_mem_db_context() -> DbContext {
        let db = get_memory_db("test", &uuid_like_name()).await.unwrap();
        DbContext::new(SurrealWrapper::new(db))
    }

    fn uuid_like_name() -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        format!("joinstr_{}", COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}
