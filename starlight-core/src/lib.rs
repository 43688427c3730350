//! The agent's runtime: durable store, task basket, wallet watcher, channel
//! state machine, and the dispatcher that wires them together. Everything
//! peer-facing or CLI-facing that *uses* this crate lives one layer up, in
//! `starlight-api` and the `starlight` binary.

/// The agent dispatcher: configuration, authentication, channel creation,
/// the generic command/message/timer entry points, and the background
/// dispatch loop.
pub mod agent;
/// The per-channel replicated state machine -- the centerpiece (§4.5).
pub mod channel;
/// Root seed derivation and the password-based seed sealing scheme.
pub mod keys;
/// The abstract ledger client and its Horizon / mock implementations.
pub mod ledger;
/// The durable, transactional key/value store.
pub mod store;
/// Small runtime utilities shared across subsystems (shutdown, backoff,
/// named tasks) that aren't specific to this agent's domain.
pub mod support;
/// The persistent retry queue for outbound side effects.
pub mod task_basket;
/// The primary account's balance/cursor tracker.
pub mod wallet;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use starlight_common::{AccountId, Stroops};

/// Process-wide configuration (§3, Agent state `config` field). Owned by
/// the agent core and persisted in the `config` bucket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub username: String,
    pub password_hash: crate::keys::PasswordHash,
    pub horizon_url: String,
    pub network_passphrase: String,
    pub max_round_duration_secs: i64,
    pub finality_delay_secs: i64,
    pub channel_feerate: Stroops,
    pub host_feerate: Stroops,
    pub keep_alive_secs: i64,
}

impl AgentConfig {
    /// Default per-channel timing/fee parameters seeded by `configInit`
    /// (§4.4, "seeds default timing/fee parameters").
    pub const DEFAULT_MAX_ROUND_DURATION_SECS: i64 = 60 * 10;
    pub const DEFAULT_FINALITY_DELAY_SECS: i64 = 60 * 5;
    pub const DEFAULT_KEEP_ALIVE_SECS: i64 = 30;

    pub fn max_round_duration(&self) -> Duration {
        Duration::from_secs(self.max_round_duration_secs.max(0) as u64)
    }

    pub fn finality_delay(&self) -> Duration {
        Duration::from_secs(self.finality_delay_secs.max(0) as u64)
    }

    pub fn keep_alive_ms(&self) -> u64 {
        (self.keep_alive_secs.max(0) as u64).saturating_mul(1000)
    }

    #[cfg(test)]
    pub fn default_for_test() -> Self {
        Self {
            username: "alice".to_string(),
            password_hash: crate::keys::PasswordHash::hash("correct horse battery staple"),
            horizon_url: "https://horizon-testnet.stellar.org".to_string(),
            network_passphrase: starlight_common::network::TESTNET_PASSPHRASE.to_string(),
            max_round_duration_secs: Self::DEFAULT_MAX_ROUND_DURATION_SECS,
            finality_delay_secs: Self::DEFAULT_FINALITY_DELAY_SECS,
            channel_feerate: Stroops(100),
            host_feerate: Stroops(100),
            keep_alive_secs: Self::DEFAULT_KEEP_ALIVE_SECS,
        }
    }
}

/// One entry in the observable update log (§3, "Update record"). Every
/// successful durable transaction may append zero or one of these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UpdateRecord {
    /// The agent was configured for the first time.
    Init,
    /// `config` was edited.
    Config,
    /// The primary wallet's balance changed.
    Account { account: AccountId, balance: Stroops },
    /// A channel's state or amounts changed.
    Channel {
        channel: AccountId,
        state: String,
        host_amount: Stroops,
        guest_amount: Stroops,
    },
    /// A transaction this agent submitted was confirmed on-ledger.
    TxSuccess {
        channel: Option<AccountId>,
        ledger_sequence: u64,
    },
    /// A recoverable failure that the caller should know about but that
    /// doesn't block progress (§7: transient errors after bounded retries,
    /// or a task basket giving up on a non-retriable error).
    Warning {
        channel: Option<AccountId>,
        message: String,
    },
}

impl UpdateRecord {
    pub fn warning(channel: Option<AccountId>, message: impl Into<String>) -> Self {
        UpdateRecord::Warning {
            channel,
            message: message.into(),
        }
    }
}
