use std::sync::Arc;
use std::time::Duration;

use joinstr_core::protocol::{EventKind, PoolMessage};
use joinstr_transport::{RelayClient, RelayTransportApi, mock_relay::MockRelay};
use tokio_util::sync::CancellationToken;

use super::{
    Error,
    credentials_responder::CredentialsResponder,
    pool_service::{PoolService, PoolServiceApi},
    readiness::ReadinessMonitor,
};
use crate::{
    DbContext,
    external::{fee::MockFeeEstimatorApi, wallet::MockWalletClientApi},
    tests::tests::{
        TEST_SIGNET_ADDRESS, TEST_SIGNET_ADDRESS_OTHER, get_mem_db_context, init_test_cfg,
    },
    util::{Clock, SystemClock},
};

const WAIT: Duration = Duration::from_secs(10);

/// One participant with its own stores, all talking to the same relay
struct Participant {
    service: PoolService,
    db: DbContext,
    transport: Arc<dyn RelayTransportApi>,
    clock: Arc<dyn Clock>,
}

impl Participant {
    fn new(relay: &MockRelay, db: DbContext, address: &'static str, pool_timeout_secs: u64) -> Self {
        let mut cfg = init_test_cfg();
        cfg.nostr_relay = relay.url().to_string();
        cfg.pool_timeout_secs = pool_timeout_secs;

        let mut wallet = MockWalletClientApi::new();
        wallet
            .expect_get_new_address()
            .returning(move || Ok(address.to_owned()));
        let mut fee = MockFeeEstimatorApi::new();
        fee.expect_get_hour_fee().returning(|| Ok(3));

        let transport: Arc<dyn RelayTransportApi> =
            Arc::new(RelayClient::new(relay.url()).with_timeout(Duration::from_secs(2)));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let service = PoolService::new(
            db.pool_store.clone(),
            db.history_store.clone(),
            transport.clone(),
            Arc::new(wallet),
            Arc::new(fee),
            clock.clone(),
            &cfg,
        );
        Self {
            service,
            db,
            transport,
            clock,
        }
    }

    fn responder(&self) -> CredentialsResponder {
        CredentialsResponder::new(
            self.db.pool_store.clone(),
            self.db.history_store.clone(),
            self.transport.clone(),
            self.clock.clone(),
            Duration::from_secs(1),
        )
    }

    fn readiness(&self) -> ReadinessMonitor {
        ReadinessMonitor::new(
            self.db.pool_store.clone(),
            self.db.history_store.clone(),
            self.clock.clone(),
            Duration::from_secs(1),
        )
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_peers_reach_ready_pool() {
    let relay = MockRelay::start().await;
    let creator = Participant::new(&relay, get_mem_db_context().await, TEST_SIGNET_ADDRESS, 600);
    let joiner = Participant::new(
        &relay,
        get_mem_db_context().await,
        TEST_SIGNET_ADDRESS_OTHER,
        600,
    );

    let pool = creator.service.create_pool(0.001, 2).await.unwrap();
    let announcements: Vec<_> = relay
        .stored_events()
        .await
        .into_iter()
        .filter(|e| e.kind == EventKind::JoinStr.as_u64())
        .collect();
    assert_eq!(announcements.len(), 1);
    assert!(matches!(
        PoolMessage::decode(&announcements[0].content).unwrap(),
        PoolMessage::Announcement(a) if a.id == pool.id
    ));

    let stop = CancellationToken::new();
    let responder = creator.responder();
    let responder_task = tokio::spawn({
        let stop = stop.clone();
        async move { responder.run(stop).await }
    });

    let open = joiner.service.fetch_other_pools().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, pool.id);
    assert!(creator.service.fetch_other_pools().await.unwrap().is_empty());

    let joined = tokio::time::timeout(
        WAIT,
        joiner
            .service
            .join_request(&open[0].public_key, CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(joined.id, pool.id);
    assert_eq!(joined.private_key, pool.private_key);
    assert!(joiner.service.fetch_other_pools().await.unwrap().is_empty());

    let pool_keys = pool.keys().unwrap();
    let (creator_view, joiner_view) = tokio::time::timeout(WAIT, async {
        tokio::join!(
            creator
                .service
                .check_registered_outputs(&pool.id, &pool_keys, CancellationToken::new()),
            joiner
                .service
                .check_registered_outputs(&pool.id, &pool_keys, CancellationToken::new()),
        )
    })
    .await
    .unwrap();
    for view in [creator_view.unwrap(), joiner_view.unwrap()] {
        assert!(view.is_ready());
        assert_eq!(
            view.registered_outputs().into_iter().collect::<Vec<_>>(),
            vec![TEST_SIGNET_ADDRESS_OTHER, TEST_SIGNET_ADDRESS]
        );
    }

    let ready = creator.readiness().tick().await.unwrap().unwrap();
    assert_eq!(ready.id, pool.id);
    let stored = creator.service.get_local_pool(&pool.id).await.unwrap();
    assert_eq!(stored.peers_public_keys.len(), 1);

    stop.cancel();
    responder_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_expired_pool_is_not_listed() {
    let relay = MockRelay::start().await;
    let creator = Participant::new(&relay, get_mem_db_context().await, TEST_SIGNET_ADDRESS, 1);
    let joiner = Participant::new(
        &relay,
        get_mem_db_context().await,
        TEST_SIGNET_ADDRESS_OTHER,
        600,
    );

    creator.service.create_pool(0.001, 2).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(joiner.service.fetch_other_pools().await.unwrap().is_empty());
    assert!(creator.service.local_pools().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_announcement_keeps_no_pool() {
    let relay = MockRelay::start().await;
    relay
        .reject_events(Some("blocked: not allowed".to_owned()))
        .await;
    let creator = Participant::new(&relay, get_mem_db_context().await, TEST_SIGNET_ADDRESS, 600);

    let error = creator.service.create_pool(0.001, 2).await.unwrap_err();
    assert!(matches!(
        &error,
        Error::Transport(joinstr_transport::Error::Rejected(reason)) if reason == "blocked: not allowed"
    ));
    assert!(creator.service.local_pools().await.unwrap().is_empty());
    assert!(relay.stored_events().await.is_empty());
}

#[tokio::test]
async fn test_join_request_can_be_cancelled() {
    let relay = MockRelay::start().await;
    let joiner = Participant::new(
        &relay,
        get_mem_db_context().await,
        TEST_SIGNET_ADDRESS_OTHER,
        600,
    );
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let unanswered = joinstr_core::JoinstrKeys::new().get_public_key();
    let result = tokio::time::timeout(WAIT, joiner.service.join_request(&unanswered, cancel))
        .await
        .unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
    assert!(joiner.service.local_pools().await.unwrap().is_empty());
}
