//! The per-channel replicated state machine (§4.5) -- the centerpiece of
//! this agent. [`ChannelRecord`] is the persisted state; [`fsm::transition`]
//! is the pure function that advances it.

/// The channel's abstract transaction-building dependency: constructs the
/// signed envelopes the FSM emits, without the FSM needing to know how a
/// Stellar transaction is assembled.
pub mod builder;
/// The pure state-transition function.
pub mod fsm;
/// The three input classes the FSM accepts.
pub mod input;
/// The FSM's emitted outputs.
pub mod output;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use starlight_common::{AccountId, FederationAddress, RoundNumber, Stroops};

pub use builder::TxBuilder;
pub use fsm::transition;
pub use input::{
    ChannelAcceptMsg, ChannelProposeMsg, CloseMsg, Command, Input, PaymentAcceptMsg,
    PaymentCompleteMsg, PaymentProposeMsg, PeerEnvelope, PeerMessage, TimerKind,
};
pub use output::Output;

/// Which party a given agent process is playing in a channel (§3,
/// Channel record `role`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Host,
    Guest,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Host => Role::Guest,
            Role::Guest => Role::Host,
        }
    }
}

/// One of the fourteen states a channel may be in (§4.5, "States"). `Closed`
/// is terminal: no transition ever leaves it (§8 invariant 4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Start,
    SettingUp,
    ChannelProposed,
    AwaitingFunding,
    Open,
    PaymentProposed,
    PaymentAccepted,
    AwaitingPaymentMerge,
    AwaitingClose,
    AwaitingCleanup,
    AwaitingRatchet,
    AwaitingSettlementMintime,
    AwaitingSettlement,
    Closed,
}

impl ChannelState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Closed)
    }
}

/// The signed artifacts for an in-flight round (§3, Channel record
/// `currentProposal`): either a payment proposal awaiting counter-signature,
/// or the party's own half of a still-unconfirmed payment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub round_number: RoundNumber,
    pub amount: Stroops,
    pub envelopes: Vec<crate::ledger::TxEnvelope>,
    /// Which side is debited when this round settles, fixed at the moment
    /// the proposal is created rather than re-derived later from `role` and
    /// `folded_amount` (which only agree on the proposer's own side).
    pub payer: Role,
}

/// The persisted, replicated state of one channel (§3, "Channel record").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// The escrow account's public key; also the channel's map key in the
    /// `channels` bucket and the value of `ChannelId`.
    pub id: AccountId,
    pub role: Role,
    pub state: ChannelState,
    pub round_number: RoundNumber,
    pub host_amount: Stroops,
    pub guest_amount: Stroops,
    pub pending_amount: Stroops,
    /// The total value escrowed when the channel was funded; `host_amount +
    /// guest_amount + pending_amount` must never exceed this (§3 invariant,
    /// value conservation).
    pub funding_amount: Stroops,
    pub counterparty_address: FederationAddress,
    pub remote_url: String,
    pub host_acct: AccountId,
    pub guest_acct: AccountId,
    pub escrow_acct: AccountId,
    pub host_ratchet_acct: AccountId,
    pub guest_ratchet_acct: AccountId,
    pub base_seq_num: i64,
    pub host_ratchet_seq_num: i64,
    pub guest_ratchet_seq_num: i64,
    pub key_index: u64,
    pub max_round_duration_secs: i64,
    pub finality_delay_secs: i64,
    pub channel_feerate: Stroops,
    pub host_feerate: Stroops,
    pub funding_time: Option<DateTime<Utc>>,
    pub payment_time: Option<DateTime<Utc>>,
    pub passphrase: String,
    pub current_proposal: Option<Proposal>,
    /// Set on the losing side of a simultaneous-payment conflict (§4.5,
    /// "Simultaneous payment (conflict)"): the amount the loser still owes,
    /// folded into the winner's next round once it arrives.
    pub folded_amount: Option<Stroops>,
    /// The last round number observed in a counterparty ratchet transaction
    /// during force-close, used to detect the "outdated round" penalty case.
    pub last_seen_counterparty_ratchet_round: Option<RoundNumber>,
}

impl ChannelRecord {
    pub fn value_conserved(&self) -> bool {
        match self.host_amount.checked_add(self.guest_amount).and_then(|s| s.checked_add(self.pending_amount)) {
            Some(total) => total.0 <= self.funding_amount.0,
            None => false,
        }
    }

    pub fn counterparty_url(&self) -> &str {
        &self.remote_url
    }
}
