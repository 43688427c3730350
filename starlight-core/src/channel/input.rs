//! The three input classes the FSM accepts (§4.5, "Inputs"): user commands,
//! peer messages, and ledger/time events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use starlight_common::{AccountId, ChannelId, FederationAddress, RoundNumber, Stroops};

use crate::ledger::{LedgerTransaction, TxEnvelope};

/// User-initiated commands (§4.5, "User commands").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Command {
    CreateChannel {
        recipient: FederationAddress,
        host_amount: Stroops,
        host_url: String,
    },
    ChannelPay {
        amount: Stroops,
    },
    TopUp {
        amount: Stroops,
    },
    CloseChannel,
    ForceClose,
    CleanUp,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelProposeMsg {
    pub host_acct: AccountId,
    pub guest_acct: AccountId,
    pub escrow_acct: AccountId,
    pub host_ratchet_acct: AccountId,
    pub guest_ratchet_acct: AccountId,
    pub host_amount: Stroops,
    pub funding_time: DateTime<Utc>,
    pub max_round_duration_secs: i64,
    pub finality_delay_secs: i64,
    pub channel_feerate: Stroops,
    pub host_feerate: Stroops,
    /// The host's own federation address, cross-checked by the recipient
    /// against the federation lookup of the sender (§4.4, Peer surface:
    /// "performs ... federation cross-checks when the message is a
    /// `ChannelPropose`").
    pub counterparty_address: FederationAddress,
    pub remote_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelAcceptMsg {
    pub funding_tx: TxEnvelope,
    pub host_ratchet_tx: TxEnvelope,
    pub guest_ratchet_tx: TxEnvelope,
    pub base_seq_num: i64,
    pub host_ratchet_seq_num: i64,
    pub guest_ratchet_seq_num: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentProposeMsg {
    pub round_number: RoundNumber,
    pub amount: Stroops,
    pub proposed_txs: Vec<TxEnvelope>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentAcceptMsg {
    pub round_number: RoundNumber,
    pub countersigned_txs: Vec<TxEnvelope>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentCompleteMsg {
    pub round_number: RoundNumber,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CloseMsg {
    pub cooperative_close_tx: TxEnvelope,
}

/// A message received from (or to be sent to) the channel counterparty
/// (§6, "Peer messages").
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PeerMessage {
    ChannelPropose(ChannelProposeMsg),
    ChannelAccept(ChannelAcceptMsg),
    PaymentPropose(PaymentProposeMsg),
    PaymentAccept(PaymentAcceptMsg),
    PaymentComplete(PaymentCompleteMsg),
    Close(CloseMsg),
}

/// The wire envelope required by §6: `{ChannelID, <oneof kind>}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerEnvelope {
    pub channel_id: ChannelId,
    pub message: PeerMessage,
}

/// Timers armed by the FSM and re-delivered as inputs when they fire
/// (§4.5, "Timers").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerKind {
    PreFundTimeout,
    Round1Timeout,
    RoundTimeout,
    SettlementMintimeTimeout,
}

/// The union of everything that can drive a channel transition. Not
/// persisted directly -- only [`super::ChannelRecord`] is -- so this has no
/// serde impl of its own.
#[derive(Clone, Debug)]
pub enum Input {
    Command(Command),
    Peer(PeerMessage),
    /// A confirmed ledger transaction touching one of this channel's
    /// accounts (escrow, host-ratchet, or guest-ratchet).
    LedgerTx(LedgerTransaction),
    Timer(TimerKind),
}
