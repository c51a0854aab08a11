use std::sync::Arc;

use joinstr_transport::{RelayClient, RelayTransportApi};

use crate::{
    Config, DbContext,
    external::{fee::FeeEstimator, wallet::WalletRpcClient},
    service::{
        Result,
        credentials_responder::CredentialsResponder,
        pool_service::{PoolService, PoolServiceApi},
        readiness::ReadinessMonitor,
    },
    util::{Clock, SystemClock},
};

/// Everything a front end needs to drive the coordinator
#[derive(Clone)]
pub struct Context {
    pub pool_service: Arc<dyn PoolServiceApi>,
    pub credentials_responder: Arc<CredentialsResponder>,
    pub readiness_monitor: Arc<ReadinessMonitor>,
    pub cfg: Config,
}

impl Context {
    pub fn new(cfg: Config, db: DbContext) -> Result<Self> {
        let relay_client = RelayClient::new(cfg.relay_url()?).with_timeout(cfg.relay_timeout());
        let transport: Arc<dyn RelayTransportApi> = Arc::new(relay_client);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let pool_service = Arc::new(PoolService::new(
            db.pool_store.clone(),
            db.history_store.clone(),
            transport.clone(),
            Arc::new(WalletRpcClient::new(&cfg)),
            Arc::new(FeeEstimator::new(&cfg)),
            clock.clone(),
            &cfg,
        ));
        let credentials_responder = Arc::new(CredentialsResponder::new(
            db.pool_store.clone(),
            db.history_store.clone(),
            transport,
            clock.clone(),
            cfg.readiness_interval(),
        ));
        let readiness_monitor = Arc::new(ReadinessMonitor::new(
            db.pool_store,
            db.history_store,
            clock,
            cfg.readiness_interval(),
        ));

        Ok(Self {
            pool_service,
            credentials_responder,
            readiness_monitor,
            cfg,
        })
    }
}
