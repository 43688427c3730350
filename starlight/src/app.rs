//! Shared bootstrap for every subcommand: open the durable store, build the
//! ledger/federation clients, authenticate, and (for anything that isn't
//! read-only) run the dispatch loop and peer RPC surface until interrupted.

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use starlight_common::{AccountId, FederationAddress, Stroops};
use starlight_core::{
    agent::{federation::HttpFederationResolver, AgentCore, ConfigInitRequest},
    channel::input::Command,
    ledger::horizon::HorizonLedgerClient,
    store::DurableStore,
    support::ShutdownChannel,
};

use crate::cli::Shared;

pub async fn init(
    data_dir: String,
    username: String,
    password: String,
    horizon_url: String,
    network_passphrase: String,
) -> anyhow::Result<()> {
    let store = open_store(&data_dir)?;
    let agent = Arc::new(AgentCore::new(
        store,
        Arc::new(HorizonLedgerClient::new(
            horizon_url.parse().context("invalid horizon URL")?,
        )),
        Arc::new(HttpFederationResolver::new(reqwest::Client::new())),
        reqwest::Client::new(),
        ShutdownChannel::new(),
    ));
    agent
        .config_init(ConfigInitRequest {
            username,
            password,
            horizon_url,
            network_passphrase,
        })
        .await?;
    let account = agent.primary_account()?;
    println!("agent initialized; primary account {account}");
    println!("a testnet friendbot funding request has been sent in the background");
    Ok(())
}

pub async fn serve(shared: Shared) -> anyhow::Result<()> {
    let (agent, config, primary) = open_authenticated(&shared).await?;
    run_until_interrupted(agent, config, primary, shared.listen_addr).await
}

pub async fn create_channel(
    shared: Shared,
    recipient: FederationAddress,
    lumens: i64,
    host_url: String,
) -> anyhow::Result<()> {
    let (agent, config, primary) = open_authenticated(&shared).await?;
    let channel_id = agent
        .do_create_channel(recipient, Stroops::from_lumens(lumens), host_url)
        .await?;
    println!("channel {channel_id} created; proposal sent to the counterparty");
    run_until_interrupted(agent, config, primary, shared.listen_addr).await
}

pub async fn pay(shared: Shared, channel: AccountId, lumens: i64) -> anyhow::Result<()> {
    run_command(shared, channel, Command::ChannelPay {
        amount: Stroops::from_lumens(lumens),
    })
    .await
}

pub async fn top_up(shared: Shared, channel: AccountId, lumens: i64) -> anyhow::Result<()> {
    run_command(shared, channel, Command::TopUp {
        amount: Stroops::from_lumens(lumens),
    })
    .await
}

pub async fn close(shared: Shared, channel: AccountId) -> anyhow::Result<()> {
    run_command(shared, channel, Command::CloseChannel).await
}

pub async fn force_close(shared: Shared, channel: AccountId) -> anyhow::Result<()> {
    run_command(shared, channel, Command::ForceClose).await
}

pub async fn clean_up(shared: Shared, channel: AccountId) -> anyhow::Result<()> {
    run_command(shared, channel, Command::CleanUp).await
}

async fn run_command(shared: Shared, channel: AccountId, command: Command) -> anyhow::Result<()> {
    let (agent, config, primary) = open_authenticated(&shared).await?;
    agent.handle_command(channel, command).await?;
    run_until_interrupted(agent, config, primary, shared.listen_addr).await
}

pub async fn status(data_dir: String) -> anyhow::Result<()> {
    let store = open_store(&data_dir)?;
    let agent = Arc::new(AgentCore::new(
        store,
        Arc::new(starlight_core::ledger::mock::MockLedgerClient::new()),
        Arc::new(starlight_core::agent::federation::mock::MockFederationResolver::new()),
        reqwest::Client::new(),
        ShutdownChannel::new(),
    ));
    if !agent.is_configured()? {
        println!("agent is not configured");
        return Ok(());
    }
    let config = agent.config()?;
    let primary = agent.primary_account()?;
    println!("username: {}", config.username);
    println!("primary account: {primary}");
    for channel in agent.list_channels()? {
        println!(
            "channel {} role={:?} state={:?} host={} guest={}",
            channel.id, channel.role, channel.state, channel.host_amount, channel.guest_amount,
        );
    }
    Ok(())
}

fn open_store(data_dir: &str) -> anyhow::Result<Arc<DurableStore>> {
    let path = PathBuf::from(data_dir);
    Ok(Arc::new(
        DurableStore::open(&path).context("failed to open the durable store")?,
    ))
}

async fn open_authenticated(
    shared: &Shared,
) -> anyhow::Result<(Arc<AgentCore>, Arc<starlight_core::AgentConfig>, AccountId)> {
    let store = open_store(&shared.data_dir)?;
    let agent = Arc::new(AgentCore::new(
        store,
        Arc::new(HorizonLedgerClient::new(
            "https://horizon-testnet.stellar.org"
                .parse()
                .expect("hardcoded URL always parses"),
        )),
        Arc::new(HttpFederationResolver::new(reqwest::Client::new())),
        reqwest::Client::new(),
        ShutdownChannel::new(),
    ));
    if !agent.is_configured()? {
        bail!("agent at {} is not configured; run `starlight init` first", shared.data_dir);
    }
    agent.authenticate(&shared.username, &shared.password)?;
    let config = Arc::new(agent.config()?);
    let primary = agent.primary_account()?;
    Ok((agent, config, primary))
}

async fn run_until_interrupted(
    agent: Arc<AgentCore>,
    config: Arc<starlight_core::AgentConfig>,
    primary: AccountId,
    listen_addr: String,
) -> anyhow::Result<()> {
    let addr = listen_addr.parse().context("invalid listen address")?;
    let shutdown = agent.shutdown_handle();

    let serve_agent = agent.clone();
    let server = tokio::spawn(async move { starlight_api::serve(serve_agent, addr).await });

    let dispatch_agent = agent.clone();
    let dispatch = tokio::spawn(async move { dispatch_agent.run(config, primary).await });

    tracing::info!(%addr, "starlight agent listening");
    tokio::signal::ctrl_c().await.ok();
    shutdown.send();

    dispatch.await.ok();
    server.abort();
    Ok(())
}
