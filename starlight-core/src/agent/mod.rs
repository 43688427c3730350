//! The agent dispatcher (§4.4): configuration, authentication, channel
//! creation, the generic command/message/timer/ledger-tx entry points, and
//! the background dispatch loop that owns the task basket, the wallet
//! watcher, per-channel ledger watchers, and armed timers. Grounded on the
//! source workspace's node -- a single owned root object passed explicitly
//! to every subsystem, no hidden globals (§9, "Global mutable state").

/// Configuration validation helpers shared by `configInit`/`configEdit`.
pub mod config;
/// Federation-address resolution.
pub mod federation;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use starlight_common::{AccountId, ApiError, FederationAddress, RoundNumber, Stroops};
use tokio::sync::Notify;
use tracing::warn;

use crate::{
    channel::{
        self,
        builder::SigningTxBuilder,
        input::{Command, PeerEnvelope, PeerMessage, TimerKind},
        ChannelRecord, ChannelState, Input, Output, Role,
    },
    keys::{EncryptedSeed, PasswordHash, RootSeed},
    ledger::{Cursor, LedgerClient, LedgerError, LedgerTransaction},
    store::{DurableStore, UpdateHandle},
    support::{get_backoff_iter, NamedTask, ShutdownChannel},
    task_basket::{self, TaskContext, TaskKind},
    wallet, AgentConfig, UpdateRecord,
};

use federation::FederationResolver;

/// Request to `configInit` (§4.4, "Configure").
pub struct ConfigInitRequest {
    pub username: String,
    pub password: String,
    pub horizon_url: String,
    pub network_passphrase: String,
}

/// Request to `configEdit`. Only password and endpoint updates are
/// expressible here -- any other field the source config exposes is, by
/// construction of this type, not something a caller can even attempt to
/// edit (§4.4, "accepts only password and endpoint updates; any other
/// non-empty field is an error").
#[derive(Default)]
pub struct ConfigEditRequest {
    pub old_password: Option<String>,
    pub new_password: Option<String>,
    pub horizon_url: Option<String>,
}

/// The minimum balance a new setup-and-fund round debits from the wallet
/// (§4.4, `doCreateChannel` step 4): one base-reserve minimum balance for
/// each of the three new accounts (escrow, host-ratchet, guest-ratchet) plus
/// the amount the host is funding the channel with. The concrete reserve
/// figure tracks Stellar testnet's current minimum balance of two base
/// reserves (1 XLM) per new account; building the actual `CreateAccount`
/// operations is out of scope (§1), so this is an accounting approximation
/// rather than a ledger-verified quote.
const ACCOUNT_MIN_BALANCE: Stroops = Stroops(10_000_000);

fn setup_and_funding_reserve_amount(host_amount: Stroops) -> Stroops {
    host_amount + ACCOUNT_MIN_BALANCE + ACCOUNT_MIN_BALANCE + ACCOUNT_MIN_BALANCE
}

fn unordered_pair_eq(a: (AccountId, AccountId), b: (AccountId, AccountId)) -> bool {
    (a.0 == b.0 && a.1 == b.1) || (a.0 == b.1 && a.1 == b.0)
}

fn ledger_error_to_api(e: LedgerError) -> ApiError {
    if e.is_retriable() {
        ApiError::transient(e.to_string())
    } else {
        ApiError::domain(e.to_string())
    }
}

/// Builds the initial `Start`-state record a guest creates for itself on
/// receiving a `ChannelPropose` it hasn't seen before (§4.4, Peer surface:
/// "pre-fetches base/host/guest ratchet sequence numbers, then dispatches
/// into the FSM"). The sequence numbers are fetched by the caller before
/// construction, since that requires the ledger client.
fn new_guest_record(
    channel_id: AccountId,
    msg: &crate::channel::input::ChannelProposeMsg,
    key_index: u64,
    base_seq_num: i64,
    host_ratchet_seq_num: i64,
    guest_ratchet_seq_num: i64,
    network_passphrase: String,
) -> ChannelRecord {
    ChannelRecord {
        id: channel_id,
        role: Role::Guest,
        state: ChannelState::Start,
        round_number: RoundNumber::default(),
        host_amount: Stroops::ZERO,
        guest_amount: Stroops::ZERO,
        pending_amount: Stroops::ZERO,
        funding_amount: Stroops::ZERO,
        counterparty_address: msg.counterparty_address.clone(),
        remote_url: msg.remote_url.clone(),
        host_acct: msg.host_acct,
        guest_acct: msg.guest_acct,
        escrow_acct: msg.escrow_acct,
        host_ratchet_acct: msg.host_ratchet_acct,
        guest_ratchet_acct: msg.guest_ratchet_acct,
        base_seq_num,
        host_ratchet_seq_num,
        guest_ratchet_seq_num,
        key_index,
        max_round_duration_secs: msg.max_round_duration_secs,
        finality_delay_secs: msg.finality_delay_secs,
        channel_feerate: msg.channel_feerate,
        host_feerate: msg.host_feerate,
        funding_time: None,
        payment_time: None,
        passphrase: network_passphrase,
        current_proposal: None,
        folded_amount: None,
        last_seen_counterparty_ratchet_round: None,
    }
}

/// Requests testnet funding for a freshly derived primary account (§4.4,
/// `configInit`: "triggers a background faucet request"). Run from a
/// post-commit hook; its failure is logged, not propagated, since the
/// wallet watcher will simply never observe a `create-account` operation
/// and the agent stays unfunded until an operator retries out of band.
async fn request_faucet_funding(http: &reqwest::Client, account: AccountId) -> Result<(), ApiError> {
    let url = format!(
        "{}/?addr={}",
        starlight_common::network::TESTNET_FRIENDBOT_URL,
        account
    );
    http.get(&url)
        .send()
        .await
        .map_err(|e| ApiError::transient(format!("faucet request failed: {e}")))?;
    Ok(())
}

/// The agent's runtime root: the durable store, the abstract ledger and
/// federation clients, the in-memory seed, and the wake/shutdown signals
/// every subsystem shares. One instance per process (§3, "Agent state").
pub struct AgentCore {
    store: Arc<DurableStore>,
    ledger: Arc<dyn LedgerClient>,
    federation: Arc<dyn FederationResolver>,
    http: reqwest::Client,
    /// Write-once per process; absent until `configInit` or `authenticate`
    /// succeeds (§3, `seed`). Guarded by a plain `Mutex` rather than the
    /// store: readers and the one writer both just need a cheap owned
    /// clone, never a long-held lock (§5, "Shared resources").
    seed: Mutex<Option<RootSeed>>,
    task_wake: Arc<Notify>,
    shutdown: ShutdownChannel,
}

impl AgentCore {
    pub fn new(
        store: Arc<DurableStore>,
        ledger: Arc<dyn LedgerClient>,
        federation: Arc<dyn FederationResolver>,
        http: reqwest::Client,
        shutdown: ShutdownChannel,
    ) -> Self {
        Self {
            store,
            ledger,
            federation,
            http,
            seed: Mutex::new(None),
            task_wake: Arc::new(Notify::new()),
            shutdown,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownChannel {
        self.shutdown.clone()
    }

    pub fn is_configured(&self) -> Result<bool, ApiError> {
        Ok(self.store.view(|v| v.get_config())?.is_some())
    }

    /// The current configuration, for callers (the federation/well-known
    /// endpoints, the CLI) that only need to read it.
    pub fn config(&self) -> Result<AgentConfig, ApiError> {
        self.require_config()
    }

    /// The primary wallet account, for callers that only need to read it.
    pub fn primary_account(&self) -> Result<AccountId, ApiError> {
        self.require_primary_account()
    }

    /// Every channel this agent currently knows about, for read-only
    /// callers (the CLI's status command).
    pub fn list_channels(&self) -> Result<Vec<ChannelRecord>, ApiError> {
        Ok(self.store.view(|v| v.list_channels())?)
    }

    fn require_config(&self) -> Result<AgentConfig, ApiError> {
        self.store
            .view(|v| v.get_config())?
            .ok_or_else(|| ApiError::configuration("agent is not configured"))
    }

    fn require_primary_account(&self) -> Result<AccountId, ApiError> {
        self.store
            .view(|v| v.get_primary_account())?
            .ok_or_else(|| ApiError::configuration("agent is not configured"))
    }

    pub fn require_seed(&self) -> Result<RootSeed, ApiError> {
        self.seed
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ApiError::precondition("seed is not in memory; authenticate first"))
    }

    // --- Configure / edit / authenticate (§4.4) --- //

    /// `configInit` (§4.4, "Configure"). Fails if already configured;
    /// generates a fresh seed, derives the primary account, validates the
    /// endpoint and passphrase, hashes the password, seals the seed, and
    /// seeds default timing/fee parameters, all inside one update. Starting
    /// the subsystems (task basket, wallet watcher, channel watchers) is
    /// the caller's job via [`AgentCore::run`], matching the "...then
    /// starts subsystems" step.
    pub async fn config_init(&self, req: ConfigInitRequest) -> Result<(), ApiError> {
        if self.is_configured()? {
            return Err(ApiError::configuration("agent is already configured"));
        }
        config::validate_username(&req.username)?;
        config::validate_password(&req.password)?;
        config::validate_horizon_url(&req.horizon_url)?;
        if !starlight_common::network::is_testnet_passphrase(&req.network_passphrase) {
            return Err(ApiError::configuration(
                "network passphrase is not the testnet passphrase",
            ));
        }

        let seed = RootSeed::generate();
        let primary = crate::keys::to_account_id(&seed.derive_primary_account());
        let encrypted = EncryptedSeed::seal(&seed, &req.password);
        let password_hash = PasswordHash::hash(&req.password);

        let cfg = AgentConfig {
            username: req.username,
            password_hash,
            horizon_url: req.horizon_url,
            network_passphrase: req.network_passphrase,
            max_round_duration_secs: AgentConfig::DEFAULT_MAX_ROUND_DURATION_SECS,
            finality_delay_secs: AgentConfig::DEFAULT_FINALITY_DELAY_SECS,
            channel_feerate: Stroops::ZERO,
            host_feerate: Stroops::ZERO,
            keep_alive_secs: AgentConfig::DEFAULT_KEEP_ALIVE_SECS,
        };

        let http = self.http.clone();
        self.store.update(move |h| {
            h.put_config(&cfg)?;
            h.put_encrypted_seed(encrypted.as_bytes())?;
            h.put_primary_account(&primary)?;
            h.put_wallet(&wallet::WalletState::default())?;
            h.append_update(&UpdateRecord::Init)?;
            let http = http.clone();
            h.defer(move || {
                tokio::spawn(async move {
                    if let Err(e) = request_faucet_funding(&http, primary).await {
                        warn!(error = %e, "faucet funding request failed");
                    }
                });
            });
            Ok(())
        })?;

        *self.seed.lock().unwrap() = Some(seed);
        Ok(())
    }

    /// `configEdit` (§4.4, "Edit"). Changing the password requires the old
    /// password, since it re-derives the key that seals the stored seed.
    pub fn config_edit(&self, req: ConfigEditRequest) -> Result<(), ApiError> {
        self.store.update(|h| {
            let mut cfg = h
                .get_config()?
                .ok_or_else(|| ApiError::configuration("agent is not configured"))?;

            if let Some(new_password) = &req.new_password {
                let old_password = req.old_password.as_deref().ok_or_else(|| {
                    ApiError::configuration("changing the password requires the old password")
                })?;
                if !cfg.password_hash.verify(old_password) {
                    return Err(ApiError::configuration("old password is incorrect"));
                }
                config::validate_password(new_password)?;
                let encrypted = h
                    .get_encrypted_seed()?
                    .ok_or_else(|| ApiError::configuration("no sealed seed on record"))?;
                let seed = EncryptedSeed::from_bytes(encrypted)
                    .unseal(old_password)
                    .map_err(|e| ApiError::configuration(e.to_string()))?;
                let resealed = EncryptedSeed::seal(&seed, new_password);
                h.put_encrypted_seed(resealed.as_bytes())?;
                cfg.password_hash = PasswordHash::hash(new_password);
            }

            if let Some(url) = &req.horizon_url {
                let parsed = config::validate_horizon_url(url)?;
                cfg.horizon_url = parsed.to_string();
            }

            h.put_config(&cfg)?;
            h.append_update(&UpdateRecord::Config)?;
            Ok(())
        })
    }

    /// `authenticate` (§4.4). Validates the username, compares the password
    /// against the stored hash, and -- if the seed isn't already resident --
    /// decrypts it into memory.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let cfg = self.require_config()?;
        if cfg.username != username {
            return Err(ApiError::configuration("unknown username"));
        }
        if !cfg.password_hash.verify(password) {
            return Err(ApiError::configuration("incorrect password"));
        }
        if self.seed.lock().unwrap().is_some() {
            return Ok(());
        }
        let encrypted = self
            .store
            .view(|v| v.get_encrypted_seed())?
            .ok_or_else(|| ApiError::configuration("no sealed seed on record"))?;
        let seed = EncryptedSeed::from_bytes(encrypted)
            .unseal(password)
            .map_err(|e| ApiError::configuration(e.to_string()))?;
        *self.seed.lock().unwrap() = Some(seed);
        Ok(())
    }

    // --- Channel creation (host path, §4.4) --- //

    pub async fn do_create_channel(
        self: &Arc<Self>,
        recipient: FederationAddress,
        host_amount: Stroops,
        host_url: String,
    ) -> Result<AccountId, ApiError> {
        if !host_amount.is_positive() {
            return Err(ApiError::domain("host amount must be positive"));
        }
        let config = self.require_config()?;
        let primary = self.require_primary_account()?;
        let seed = self.require_seed()?;

        let resolved = self.federation.resolve(&recipient).await?;
        if resolved.account == primary {
            return Err(ApiError::domain("cannot open a channel with your own account"));
        }
        let duplicate = self.store.view(|v| v.list_channels())?.into_iter().any(|c| {
            unordered_pair_eq((c.host_acct, c.guest_acct), (primary, resolved.account))
        });
        if duplicate {
            return Err(ApiError::domain(
                "a channel already exists with this counterparty",
            ));
        }

        let reserve = setup_and_funding_reserve_amount(host_amount);
        let now = self.ledger.now();
        let this = self.clone();

        self.store.update(move |h| {
            let mut w = h.get_wallet()?;
            w.balance = w
                .balance
                .checked_sub_nonnegative(reserve)
                .ok_or_else(|| ApiError::domain("insufficient balance"))?;

            let key_index = h.allocate_key_indices(3)?;
            let keys = seed.derive_channel_accounts(key_index);
            let record = ChannelRecord {
                id: keys.escrow_account_id(),
                role: Role::Host,
                state: ChannelState::Start,
                round_number: RoundNumber::default(),
                host_amount: Stroops::ZERO,
                guest_amount: Stroops::ZERO,
                pending_amount: Stroops::ZERO,
                funding_amount: host_amount,
                counterparty_address: recipient.clone(),
                remote_url: resolved.starlight_url.clone(),
                host_acct: primary,
                guest_acct: resolved.account,
                escrow_acct: keys.escrow_account_id(),
                host_ratchet_acct: keys.host_ratchet_account_id(),
                guest_ratchet_acct: keys.guest_ratchet_account_id(),
                base_seq_num: 0,
                host_ratchet_seq_num: 0,
                guest_ratchet_seq_num: 0,
                key_index,
                max_round_duration_secs: config.max_round_duration_secs,
                finality_delay_secs: config.finality_delay_secs,
                channel_feerate: config.channel_feerate,
                host_feerate: config.host_feerate,
                funding_time: None,
                payment_time: None,
                passphrase: config.network_passphrase.clone(),
                current_proposal: None,
                folded_amount: None,
                last_seen_counterparty_ratchet_round: None,
            };

            h.put_wallet(&w)?;
            h.put_channel(&record)?;
            this.apply_transition(
                h,
                record.clone(),
                Input::Command(Command::CreateChannel {
                    recipient: recipient.clone(),
                    host_amount,
                    host_url: host_url.clone(),
                }),
                now,
            )?;

            let watcher = this.clone();
            let watch_record = record.clone();
            h.defer(move || watcher.spawn_channel_watchers(&watch_record));

            Ok(record.id)
        })
    }

    // --- Generic entry points (§4.4, "Command / message / timer entry points") --- //

    pub async fn handle_command(self: &Arc<Self>, channel_id: AccountId, command: Command) -> Result<(), ApiError> {
        let now = self.ledger.now();
        let this = self.clone();
        self.store.update(move |h| {
            let record = h
                .get_channel(&channel_id)?
                .ok_or_else(|| ApiError::domain("no such channel"))?;
            this.apply_transition(h, record, Input::Command(command.clone()), now)?;
            Ok(())
        })
    }

    /// `POST /starlight/message` dispatch target (§4.4, "Peer surface").
    /// When the message is a `ChannelPropose` the agent has never seen, this
    /// performs the channel-uniqueness and federation cross-checks and
    /// pre-fetches the three accounts' ledger sequence numbers before
    /// constructing the guest's initial record and entering the FSM.
    pub async fn handle_peer_envelope(self: &Arc<Self>, envelope: PeerEnvelope) -> Result<(), ApiError> {
        let now = self.ledger.now();
        let channel_id = envelope.channel_id;

        if let PeerMessage::ChannelPropose(msg) = &envelope.message {
            if self.store.view(|v| v.get_channel(&channel_id))?.is_some() {
                return Err(ApiError::protocol_non_retriable("channel already exists"));
            }
            let duplicate = self.store.view(|v| v.list_channels())?.into_iter().any(|c| {
                unordered_pair_eq((c.host_acct, c.guest_acct), (msg.host_acct, msg.guest_acct))
            });
            if duplicate {
                return Err(ApiError::protocol_non_retriable(
                    "a channel already exists between this pair",
                ));
            }

            let resolved = self.federation.resolve(&msg.counterparty_address).await?;
            if resolved.account != msg.host_acct {
                return Err(ApiError::domain(
                    "federation lookup disagrees with the proposal's declared host account",
                ));
            }

            let base_seq = self
                .ledger
                .sequence_for_account(msg.escrow_acct)
                .await
                .map_err(ledger_error_to_api)?;
            let host_ratchet_seq = self
                .ledger
                .sequence_for_account(msg.host_ratchet_acct)
                .await
                .map_err(ledger_error_to_api)?;
            let guest_ratchet_seq = self
                .ledger
                .sequence_for_account(msg.guest_ratchet_acct)
                .await
                .map_err(ledger_error_to_api)?;

            let network_passphrase = self.require_config()?.network_passphrase;
            let msg = msg.clone();
            let message = envelope.message.clone();
            let this = self.clone();

            return self.store.update(move |h| {
                let key_index = h.allocate_key_indices(1)?;
                let record = new_guest_record(
                    channel_id,
                    &msg,
                    key_index,
                    base_seq.0,
                    host_ratchet_seq.0,
                    guest_ratchet_seq.0,
                    network_passphrase.clone(),
                );
                h.put_channel(&record)?;
                this.apply_transition(h, record.clone(), Input::Peer(message.clone()), now)?;

                let watcher = this.clone();
                let watch_record = record.clone();
                h.defer(move || watcher.spawn_channel_watchers(&watch_record));
                Ok(())
            });
        }

        let this = self.clone();
        let message = envelope.message.clone();
        self.store.update(move |h| {
            let record = h
                .get_channel(&channel_id)?
                .ok_or_else(|| ApiError::domain("no such channel"))?;
            this.apply_transition(h, record, Input::Peer(message.clone()), now)?;
            Ok(())
        })
    }

    pub async fn handle_timer(self: &Arc<Self>, channel_id: AccountId, kind: TimerKind) -> Result<(), ApiError> {
        let now = self.ledger.now();
        let this = self.clone();
        self.store.update(move |h| {
            let record = match h.get_channel(&channel_id)? {
                Some(record) if !record.state.is_terminal() => record,
                _ => return Ok(()),
            };
            this.apply_transition(h, record, Input::Timer(kind), now)?;
            Ok(())
        })
    }

    /// Delivers one confirmed ledger transaction to every channel whose
    /// escrow/host/guest/host-ratchet/guest-ratchet account it touches
    /// (`host_acct`/`guest_acct` are watched too: `fsm::observe_settlement`
    /// keys the `AwaitingSettlement -> Closed` transition on a payment
    /// landing in one of those two, not the escrow/ratchet accounts). A
    /// linear scan over this agent's (small) channel set rather than an
    /// account index -- acceptable at the scale this agent targets, see
    /// DESIGN.md.
    pub async fn handle_ledger_tx(self: &Arc<Self>, tx: LedgerTransaction) -> Result<(), ApiError> {
        let now = self.ledger.now();
        let touched: Vec<AccountId> = tx.operations.iter().map(|op| op.destination).collect();
        let channels = self.store.view(|v| v.list_channels())?;

        for candidate in channels {
            if candidate.state.is_terminal() {
                continue;
            }
            let matches = touched.iter().any(|acct| {
                *acct == candidate.escrow_acct
                    || *acct == candidate.host_ratchet_acct
                    || *acct == candidate.guest_ratchet_acct
                    || *acct == candidate.host_acct
                    || *acct == candidate.guest_acct
            });
            if !matches {
                continue;
            }

            let this = self.clone();
            let tx = tx.clone();
            let channel_id = candidate.id;
            self.store.update(move |h| {
                let record = match h.get_channel(&channel_id)? {
                    Some(record) if !record.state.is_terminal() => record,
                    _ => return Ok(()),
                };
                this.apply_transition(h, record, Input::LedgerTx(tx.clone()), now)?;
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Runs `record` and `input` through the FSM and translates its outputs
    /// into store writes and post-commit hooks, all inside the caller's
    /// already-open transaction (§4.4: "opens an update, loads the channel,
    /// runs the FSM, persists new state, registers side effects, records an
    /// update").
    fn apply_transition(
        self: &Arc<Self>,
        handle: &mut UpdateHandle<'_>,
        record: ChannelRecord,
        input: Input,
        now: DateTime<Utc>,
    ) -> Result<ChannelRecord, ApiError> {
        let seed = self.seed.lock().unwrap().clone();
        let builder = SigningTxBuilder::new(seed);
        let (new_record, outputs) = channel::transition(record, input, now, &builder)?;
        handle.put_channel(&new_record)?;

        for output in outputs {
            match output {
                Output::SubmitTx { envelope } => {
                    task_basket::add(
                        handle,
                        self.task_wake.clone(),
                        TaskKind::SendTx { channel: new_record.id, envelope },
                        now,
                    )?;
                }
                Output::SendPeerMessage { message } => {
                    let body = serde_json::to_value(PeerEnvelope { channel_id: new_record.id, message })
                        .map_err(|e| ApiError::transient(format!("failed to encode peer message: {e}")))?;
                    task_basket::add(
                        handle,
                        self.task_wake.clone(),
                        TaskKind::SendMsg {
                            channel: new_record.id,
                            url: new_record.counterparty_url().to_string(),
                            body,
                        },
                        now,
                    )?;
                }
                Output::ArmTimer { kind, at } => {
                    let this = self.clone();
                    let channel_id = new_record.id;
                    handle.defer(move || this.arm_timer(channel_id, kind, at));
                }
                Output::Update(update) => {
                    handle.append_update(&update)?;
                }
            }
        }

        Ok(new_record)
    }

    /// Arms a timer by spawning a task that waits for `at` (via the ledger
    /// client's clock, §6a `afterFunc`) and re-enters the FSM (§4.5,
    /// "Timers are armed via post-commit hooks; firing re-enters the FSM
    /// with a timer input"). Detached rather than tracked in a min-heap:
    /// the spawned task is the handle, and letting it run to completion (or
    /// until shutdown) is sufficient since at most one timer is ever
    /// meaningfully outstanding per channel state.
    fn arm_timer(self: &Arc<Self>, channel_id: AccountId, kind: TimerKind, at: DateTime<Utc>) {
        let this = self.clone();
        let ledger = self.ledger.clone();
        let _task = NamedTask::spawn_named("channel-timer", async move {
            ledger.after(at).await;
            if let Err(e) = this.handle_timer(channel_id, kind).await {
                warn!(error = %e, channel = %channel_id, "timer-driven transition failed");
            }
        });
    }

    /// Spawns one ledger-stream watcher per account belonging to this
    /// channel (escrow, host-ratchet, guest-ratchet, host, guest), each
    /// re-delivering observed transactions via [`Self::handle_ledger_tx`].
    /// `host_acct`/`guest_acct` must be watched too: settlement transactions
    /// pay out to those two accounts, and `fsm::observe_settlement`'s
    /// `AwaitingSettlement -> Closed` transition never fires without that
    /// observation reaching the FSM. Restart-safe by re-subscription from
    /// [`Cursor::START`] rather than a persisted per-account cursor -- see
    /// DESIGN.md's Open Question on channel ledger-transaction delivery.
    fn spawn_channel_watchers(self: &Arc<Self>, record: &ChannelRecord) {
        for account in [
            record.escrow_acct,
            record.host_ratchet_acct,
            record.guest_ratchet_acct,
            record.host_acct,
            record.guest_acct,
        ] {
            let this = self.clone();
            let shutdown = self.shutdown.clone();
            let _task = NamedTask::spawn_named("channel-ledger-watcher", async move {
                this.watch_account(account, shutdown).await;
            });
        }
    }

    async fn watch_account(self: Arc<Self>, account: AccountId, shutdown: ShutdownChannel) {
        let mut backoff = get_backoff_iter();
        loop {
            let mut rx = match self.ledger.stream_txs(account, Cursor::START).await {
                Ok(rx) => rx,
                Err(e) => {
                    let wait = backoff.next().unwrap_or(std::time::Duration::from_secs(32));
                    warn!(error = %e, %account, wait_ms = wait.as_millis() as u64, "channel ledger stream failed to start, backing off");
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        _ = tokio::time::sleep(wait) => continue,
                    }
                }
            };
            backoff = get_backoff_iter();

            loop {
                tokio::select! {
                    _ = shutdown.recv() => return,
                    maybe_tx = rx.recv() => match maybe_tx {
                        Some(tx) => {
                            if let Err(e) = self.handle_ledger_tx(tx).await {
                                warn!(error = %e, %account, "failed to apply channel ledger transaction");
                            }
                        }
                        None => break,
                    },
                }
            }
        }
    }

    /// Spawns ledger watchers for every non-terminal channel. Called once
    /// at process start (§5, "each FSM state that depends on a timer
    /// re-arms it during the start routine").
    pub fn start_channel_watchers(self: &Arc<Self>) {
        let channels = match self.store.view(|v| v.list_channels()) {
            Ok(channels) => channels,
            Err(e) => {
                warn!(error = %e, "failed to list channels while starting watchers");
                return;
            }
        };
        for record in channels.iter().filter(|record| !record.state.is_terminal()) {
            self.spawn_channel_watchers(record);
        }
    }

    /// Re-arms every outstanding channel timer at process start, since
    /// timers aren't restored automatically (§5, "Failure model"). Exact
    /// deadlines are recomputed from `funding_time`/`payment_time` where the
    /// state derives them; states whose timer depends on an unpersisted
    /// ledger-observation instant (`AwaitingSettlementMintime`) fire
    /// immediately instead of reconstructing the original deadline -- see
    /// DESIGN.md's Open Question on timer restoration.
    pub fn rearm_timers(self: &Arc<Self>) {
        let now = self.ledger.now();
        let channels = match self.store.view(|v| v.list_channels()) {
            Ok(channels) => channels,
            Err(e) => {
                warn!(error = %e, "failed to list channels while rearming timers");
                return;
            }
        };
        for record in channels {
            if record.state.is_terminal() {
                continue;
            }
            let round_duration = chrono::Duration::seconds(record.max_round_duration_secs);
            let (kind, at) = match record.state {
                ChannelState::ChannelProposed => (
                    TimerKind::Round1Timeout,
                    record.funding_time.map(|t| t + round_duration).unwrap_or(now),
                ),
                ChannelState::AwaitingFunding => (
                    TimerKind::PreFundTimeout,
                    record.funding_time.map(|t| t + round_duration).unwrap_or(now),
                ),
                ChannelState::PaymentProposed | ChannelState::PaymentAccepted => (
                    TimerKind::RoundTimeout,
                    record.payment_time.map(|t| t + round_duration).unwrap_or(now),
                ),
                ChannelState::AwaitingSettlementMintime => (TimerKind::SettlementMintimeTimeout, now),
                _ => continue,
            };
            self.arm_timer(record.id, kind, at);
        }
    }

    /// The background dispatch loop (§4.4a): starts channel watchers and
    /// re-arms timers, then multiplexes the task basket and wallet watcher
    /// until `shutdown` fires. Returns once both exit.
    pub async fn run(self: Arc<Self>, config: Arc<AgentConfig>, primary_account: AccountId) {
        self.start_channel_watchers();
        self.rearm_timers();

        let task_ctx = Arc::new(TaskContext {
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            http: self.http.clone(),
            wake: self.task_wake.clone(),
        });

        tokio::join!(
            task_basket::run(task_ctx, config, self.shutdown.clone()),
            wallet::run(self.store.clone(), self.ledger.clone(), primary_account, self.shutdown.clone()),
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{channel::input::ChannelProposeMsg, ledger::MockLedgerClient};

    fn test_agent() -> Arc<AgentCore> {
        Arc::new(AgentCore::new(
            Arc::new(DurableStore::open_temporary().unwrap()),
            Arc::new(MockLedgerClient::new()),
            Arc::new(federation::mock::MockFederationResolver::new()),
            reqwest::Client::new(),
            ShutdownChannel::new(),
        ))
    }

    #[tokio::test]
    async fn config_init_rejects_non_testnet_url() {
        let agent = test_agent();
        let err = agent
            .config_init(ConfigInitRequest {
                username: "alice".into(),
                password: "correct horse battery staple".into(),
                horizon_url: "https://horizon.stellar.org".into(),
                network_passphrase: starlight_common::network::TESTNET_PASSPHRASE.into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, starlight_common::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn config_init_then_double_init_fails() {
        let agent = test_agent();
        agent
            .config_init(ConfigInitRequest {
                username: "alice".into(),
                password: "correct horse battery staple".into(),
                horizon_url: "https://horizon-testnet.stellar.org".into(),
                network_passphrase: starlight_common::network::TESTNET_PASSPHRASE.into(),
            })
            .await
            .unwrap();
        assert!(agent.is_configured().unwrap());

        let err = agent
            .config_init(ConfigInitRequest {
                username: "alice".into(),
                password: "correct horse battery staple".into(),
                horizon_url: "https://horizon-testnet.stellar.org".into(),
                network_passphrase: starlight_common::network::TESTNET_PASSPHRASE.into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, starlight_common::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn authenticate_requires_correct_password() {
        let agent = test_agent();
        agent
            .config_init(ConfigInitRequest {
                username: "alice".into(),
                password: "correct horse battery staple".into(),
                horizon_url: "https://horizon-testnet.stellar.org".into(),
                network_passphrase: starlight_common::network::TESTNET_PASSPHRASE.into(),
            })
            .await
            .unwrap();

        assert!(agent.authenticate("alice", "wrong password").is_err());
        agent.authenticate("alice", "correct horse battery staple").unwrap();
        assert!(agent.require_seed().is_ok());
    }

    #[tokio::test]
    async fn config_edit_changes_password_only_with_old_password() {
        let agent = test_agent();
        agent
            .config_init(ConfigInitRequest {
                username: "alice".into(),
                password: "correct horse battery staple".into(),
                horizon_url: "https://horizon-testnet.stellar.org".into(),
                network_passphrase: starlight_common::network::TESTNET_PASSPHRASE.into(),
            })
            .await
            .unwrap();

        let err = agent
            .config_edit(ConfigEditRequest {
                old_password: None,
                new_password: Some("new password".into()),
                horizon_url: None,
            })
            .unwrap_err();
        assert_eq!(err.kind, starlight_common::ErrorKind::Configuration);

        agent
            .config_edit(ConfigEditRequest {
                old_password: Some("correct horse battery staple".into()),
                new_password: Some("new password".into()),
                horizon_url: None,
            })
            .unwrap();
        agent.authenticate("alice", "new password").unwrap();
    }

    #[tokio::test]
    async fn do_create_channel_rejects_self_channel() {
        let federation = Arc::new(federation::mock::MockFederationResolver::new());
        let agent = Arc::new(AgentCore::new(
            Arc::new(DurableStore::open_temporary().unwrap()),
            Arc::new(MockLedgerClient::new()),
            federation.clone(),
            reqwest::Client::new(),
            ShutdownChannel::new(),
        ));
        agent
            .config_init(ConfigInitRequest {
                username: "alice".into(),
                password: "correct horse battery staple".into(),
                horizon_url: "https://horizon-testnet.stellar.org".into(),
                network_passphrase: starlight_common::network::TESTNET_PASSPHRASE.into(),
            })
            .await
            .unwrap();
        agent.authenticate("alice", "correct horse battery staple").unwrap();
        let primary = agent.require_primary_account().unwrap();

        // The agent's own federation address resolves back to its own
        // primary account -- the "open a channel with myself" case.
        let self_address: FederationAddress = "alice*example.com".parse().unwrap();
        federation.insert(
            self_address.clone(),
            federation::FederationRecord {
                account: primary,
                starlight_url: "https://example.com/starlight".into(),
            },
        );

        let err = agent
            .do_create_channel(self_address, Stroops::from_lumens(10), "alice.example".into())
            .await
            .unwrap_err();
        assert_eq!(err.kind, starlight_common::ErrorKind::Domain);
    }

    #[tokio::test]
    async fn handle_peer_envelope_creates_guest_record_on_first_propose() {
        let agent = test_agent();
        let host_account = AccountId([9u8; 32]);
        let escrow = AccountId([1u8; 32]);
        let host_ratchet = AccountId([2u8; 32]);
        let guest_ratchet = AccountId([3u8; 32]);
        let guest_account = AccountId([8u8; 32]);

        agent
            .config_init(ConfigInitRequest {
                username: "bob".into(),
                password: "correct horse battery staple".into(),
                horizon_url: "https://horizon-testnet.stellar.org".into(),
                network_passphrase: starlight_common::network::TESTNET_PASSPHRASE.into(),
            })
            .await
            .unwrap();

        let counterparty_address: FederationAddress = "alice*example.com".parse().unwrap();
        let federation = federation::mock::MockFederationResolver::new();
        federation.insert(
            counterparty_address.clone(),
            federation::FederationRecord {
                account: host_account,
                starlight_url: "https://alice.example/starlight".into(),
            },
        );

        let agent = Arc::new(AgentCore::new(
            agent.store.clone(),
            agent.ledger.clone(),
            Arc::new(federation),
            reqwest::Client::new(),
            ShutdownChannel::new(),
        ));

        let propose = ChannelProposeMsg {
            host_acct: host_account,
            guest_acct: guest_account,
            escrow_acct: escrow,
            host_ratchet_acct: host_ratchet,
            guest_ratchet_acct: guest_ratchet,
            host_amount: Stroops::from_lumens(100),
            funding_time: Utc::now(),
            max_round_duration_secs: 600,
            finality_delay_secs: 300,
            channel_feerate: Stroops(100),
            host_feerate: Stroops(100),
            counterparty_address,
            remote_url: "https://alice.example/starlight".into(),
        };
        agent
            .handle_peer_envelope(PeerEnvelope {
                channel_id: escrow,
                message: PeerMessage::ChannelPropose(propose),
            })
            .await
            .unwrap();

        let record = agent.store.view(|v| v.get_channel(&escrow)).unwrap().unwrap();
        assert_eq!(record.role, Role::Guest);
        assert_eq!(record.state, ChannelState::AwaitingFunding);
    }
}
