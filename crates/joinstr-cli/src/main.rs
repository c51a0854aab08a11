//! Joinstr command line client
//!
//! Usage:
//!   joinstr create-pool --denomination 0.001 [--peers 5]
//!   joinstr list-pools
//!   joinstr join --pool-id <id>
//!   joinstr watch
//!   joinstr history

use std::collections::HashSet;

use anyhow::{Context as _, Result, anyhow, bail};
use chrono::DateTime;
use clap::Parser;
use joinstr_api::{
    Config, Context, external::wallet::validate_address, get_db_context, service,
};
use joinstr_core::{
    pool::{HistoryEntry, LocalPool, PoolAnnouncement},
    protocol::Timestamp,
};
use log::{debug, error, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod config;

use config::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cfg = Config::from(cli.config);
    let db = get_db_context(&cfg)
        .await
        .context("Could not open the local database")?;
    let ctx = Context::new(cfg, db).map_err(user_error)?;

    match cli.command {
        Command::CreatePool { denomination, peers } => {
            let pool = ctx
                .pool_service
                .create_pool(denomination, peers)
                .await
                .map_err(user_error)?;
            println!("Created pool {}", pool.id);
            print_local_pool(&pool);
            warn_unregistered(&pool);
        }
        Command::ListPools => {
            let pools = ctx.pool_service.fetch_other_pools().await.map_err(user_error)?;
            if pools.is_empty() {
                println!("No open pools");
            }
            pools.iter().for_each(print_announcement);
        }
        Command::MyPools => {
            let pools = ctx.pool_service.local_pools().await.map_err(user_error)?;
            if pools.is_empty() {
                println!("No active pools");
            }
            pools.iter().for_each(print_local_pool);
        }
        Command::Join { pool_id } => join(&ctx, &pool_id).await?,
        Command::RegisterOutput { pool_id, address } => {
            validate_address(&address, ctx.cfg.bitcoin_network()).map_err(|e| anyhow!("{e}"))?;
            let keys = pool_keys(&ctx, &pool_id).await?;
            let event = ctx
                .pool_service
                .register_output(&address, &keys)
                .await
                .map_err(user_error)?;
            println!("Registered output in event {}", event.id);
        }
        Command::RegisterInput { pool_id, psbt } => {
            let keys = pool_keys(&ctx, &pool_id).await?;
            let event = ctx
                .pool_service
                .register_input(&psbt, &keys)
                .await
                .map_err(user_error)?;
            println!("Registered input in event {}", event.id);
        }
        Command::Status { pool_id } => {
            let state = ctx
                .pool_service
                .pool_state(&pool_id)
                .await
                .map_err(user_error)?;
            println!("{pool_id}: {state:?}");
        }
        Command::Watch => watch(&ctx).await?,
        Command::Finish { pool_id, psbt, tx } => {
            let pool = ctx
                .pool_service
                .get_local_pool(&pool_id)
                .await
                .map_err(user_error)?;
            ctx.pool_service
                .record_coinjoin(HistoryEntry::new(&pool, psbt, tx, Timestamp::now()))
                .await
                .map_err(user_error)?;
            println!("Recorded coinjoin of pool {pool_id}");
        }
        Command::Remove { pool_id } => {
            ctx.pool_service
                .remove_local_pool(&pool_id)
                .await
                .map_err(user_error)?;
            println!("Removed pool {pool_id}");
        }
        Command::History => {
            let history = ctx.pool_service.history().await.map_err(user_error)?;
            if history.is_empty() {
                println!("No coinjoins yet");
            }
            for entry in history {
                println!(
                    "{}  {} BTC  tx {}",
                    format_timestamp(entry.timestamp),
                    entry.amount,
                    entry.tx
                );
            }
        }
    }
    Ok(())
}

fn user_error(e: service::Error) -> anyhow::Error {
    debug!("{e}");
    anyhow!(e.user_message())
}

/// A token cancelled on Ctrl-C
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl-C: {e}");
        }
        token.cancel();
    });
    cancel
}

async fn pool_keys(ctx: &Context, pool_id: &str) -> Result<joinstr_core::JoinstrKeys> {
    let pool = ctx
        .pool_service
        .get_local_pool(pool_id)
        .await
        .map_err(user_error)?;
    pool.keys().map_err(|e| anyhow!("Stored pool {pool_id} has invalid keys: {e}"))
}

async fn join(ctx: &Context, pool_id: &str) -> Result<()> {
    let pools = ctx.pool_service.fetch_other_pools().await.map_err(user_error)?;
    let Some(announcement) = pools.into_iter().find(|p| p.id == pool_id) else {
        bail!("No open pool with id {pool_id}");
    };
    println!("Waiting for credentials of pool {pool_id}, press Ctrl-C to abort");
    let pool = ctx
        .pool_service
        .join_request(&announcement.public_key, interrupt_token())
        .await
        .map_err(user_error)?;
    println!("Joined pool {}", pool.id);
    print_local_pool(&pool);
    warn_unregistered(&pool);
    Ok(())
}

fn warn_unregistered(pool: &LocalPool) {
    if pool.own_address.is_none() {
        println!(
            "Our output is not registered yet, retry with `joinstr register-output --pool-id {}`",
            pool.id
        );
    }
}

/// Serves our pools until Ctrl-C: answers join requests, follows output
/// registrations and reports the ready pool. Local pools are re-read every
/// readiness interval, so pools created or joined meanwhile are followed too.
async fn watch(ctx: &Context) -> Result<()> {
    let stop = interrupt_token();
    let mut tasks = Vec::new();

    let responder = ctx.credentials_responder.clone();
    let token = stop.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = responder.run(token).await {
            error!("Credentials responder stopped: {e}");
        }
    }));

    let monitor = ctx.readiness_monitor.clone();
    let token = stop.clone();
    tasks.push(tokio::spawn(async move { monitor.run(token).await }));

    let mut ready = ctx.readiness_monitor.subscribe();
    let token = stop.clone();
    tasks.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = ready.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Some(pool) = ready.borrow_and_update().as_ref() {
                        println!("Pool {} is ready with {} outputs", pool.id, pool.peers);
                    }
                }
            }
        }
    }));

    println!("Watching pools, press Ctrl-C to stop");
    let mut followed = HashSet::new();
    loop {
        match ctx.pool_service.local_pools().await {
            Ok(pools) => {
                for pool in unfollowed_pools(&mut followed, pools) {
                    tasks.push(follow_outputs(ctx, pool, stop.clone()));
                }
            }
            Err(e) => error!("Could not read local pools: {}", e.user_message()),
        }
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(ctx.cfg.readiness_interval()) => {}
        }
    }
    for task in tasks {
        if let Err(e) = task.await {
            error!("Watch task failed: {e}");
        }
    }
    Ok(())
}

/// Pools not followed yet, marking them as followed
fn unfollowed_pools(followed: &mut HashSet<String>, pools: Vec<LocalPool>) -> Vec<LocalPool> {
    pools
        .into_iter()
        .filter(|pool| followed.insert(pool.id.clone()))
        .collect()
}

fn follow_outputs(ctx: &Context, pool: LocalPool, stop: CancellationToken) -> JoinHandle<()> {
    let pool_service = ctx.pool_service.clone();
    tokio::spawn(async move {
        let keys = match pool.keys() {
            Ok(keys) => keys,
            Err(e) => {
                error!("Skipping pool {} with invalid keys: {e}", pool.id);
                return;
            }
        };
        debug!("Following outputs of pool {}", pool.id);
        match pool_service
            .check_registered_outputs(&pool.id, &keys, stop)
            .await
        {
            Ok(pool) => info!("All outputs of pool {} registered", pool.id),
            Err(service::Error::Cancelled) => {}
            Err(e) => error!("Stopped following pool {}: {}", pool.id, e.user_message()),
        }
    })
}

fn format_timestamp(timestamp: Timestamp) -> String {
    i64::try_from(timestamp.inner())
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn print_announcement(pool: &PoolAnnouncement) {
    println!(
        "{}  {} BTC  {} peers  {} sat/vB  until {}",
        pool.id,
        pool.denomination,
        pool.peers,
        pool.fee_rate,
        format_timestamp(pool.timeout)
    );
}

fn print_local_pool(pool: &LocalPool) {
    println!(
        "{}  {} BTC  {}/{} outputs  until {}",
        pool.id,
        pool.denomination,
        pool.registered_outputs().len(),
        pool.peers,
        format_timestamp(pool.timeout)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use joinstr_core::JoinstrKeys;

    fn local_pool(id: &str) -> LocalPool {
        let keys = JoinstrKeys::new();
        let announcement = PoolAnnouncement {
            id: id.to_owned(),
            public_key: keys.get_public_key(),
            denomination: 0.01,
            peers: 2,
            timeout: Timestamp::from(1_700_000_600),
            relay: "ws://127.0.0.1:7777".to_owned(),
            fee_rate: 2,
            transport: None,
            vpn_gateway: None,
        };
        LocalPool::new(announcement, &keys)
    }

    #[test]
    fn test_unfollowed_pools_picks_up_new_pools() {
        let mut followed = HashSet::new();
        let first = unfollowed_pools(&mut followed, vec![local_pool("a"), local_pool("b")]);
        assert_eq!(first.len(), 2);

        let next = unfollowed_pools(&mut followed, vec![local_pool("a"), local_pool("b"), local_pool("c")]);
        let ids: Vec<&str> = next.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
        assert!(unfollowed_pools(&mut followed, vec![local_pool("c")]).is_empty());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(
            format_timestamp(Timestamp::from(1_700_000_000)),
            "2023-11-14 22:13:20 UTC"
        );
    }
}
