//! The abstract ledger interface (§6a): stream confirmed transactions for an
//! account from a cursor, submit a signed envelope, read sequence numbers,
//! schedule wall-clock callbacks. Building and signing real XDR transaction
//! envelopes is out of scope (§1); [`TxEnvelope`] is a thin wrapper around
//! `stellar_xdr`'s envelope type rather than a reimplementation of Horizon's
//! transaction-building internals.

use std::{future::Future, pin::Pin};

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use starlight_common::{AccountId, Stroops};
use stellar_xdr::curr::{Limits, ReadXdr, TransactionEnvelope, WriteXdr};
use tokio::sync::mpsc;

/// Horizon-backed implementation of [`LedgerClient`].
pub mod horizon;
/// In-memory, channel-driven implementation used by the scenario tests.
pub mod mock;

pub use horizon::HorizonLedgerClient;
pub use mock::MockLedgerClient;

/// Paging token for the ledger transaction stream; persisted so a restart
/// resumes exactly where the wallet watcher left off.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor(pub String);

impl Cursor {
    pub const START: Cursor = Cursor(String::new());
}

/// The ledger sequence number of a submitted or observed transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(pub i64);

/// An opaque signed transaction envelope: raw XDR bytes, base64-encoded on
/// the wire and in the store. Building these (deriving the right sequence
/// number, assembling operations, collecting signatures) is out of scope
/// (§1); this is deliberately a thin wrapper rather than a reimplementation
/// of that machinery, so the rest of the agent can treat envelopes as opaque
/// values it signs, submits, and compares for equality.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxEnvelope(pub Vec<u8>);

impl TxEnvelope {
    /// Decodes the wrapped bytes into the structured `stellar_xdr` type,
    /// e.g. just before handing it to the Horizon submission endpoint.
    pub fn decode(&self) -> Result<TransactionEnvelope, stellar_xdr::curr::Error> {
        TransactionEnvelope::from_xdr(&self.0, Limits::none())
    }

    pub fn from_xdr(envelope: &TransactionEnvelope) -> Result<Self, stellar_xdr::curr::Error> {
        Ok(TxEnvelope(envelope.to_xdr(Limits::none())?))
    }
}

impl Serialize for TxEnvelope {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for TxEnvelope {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(de::Error::custom)?;
        Ok(TxEnvelope(bytes))
    }
}

/// One operation within an observed transaction, restricted to the three
/// kinds the wallet watcher and channel FSM care about (§4.3).
#[derive(Clone, Debug)]
pub struct Operation {
    pub destination: AccountId,
    pub source: Option<AccountId>,
    pub kind: OperationKind,
}

#[derive(Clone, Debug)]
pub enum OperationKind {
    CreateAccount { starting_balance: Stroops },
    Payment { amount: Stroops },
    AccountMerge { merged_balance: Stroops },
    /// Any other operation type; ignored per §4.3.
    Other,
}

/// A confirmed, successful transaction delivered by [`LedgerClient::stream_txs`].
#[derive(Clone, Debug)]
pub struct LedgerTransaction {
    pub submitted_by: AccountId,
    pub ledger_sequence: u64,
    pub operations: Vec<Operation>,
    /// The cursor value to persist *after* processing this transaction.
    pub cursor: Cursor,
}

/// The outcome of a [`LedgerClient::submit`] call.
#[derive(Clone, Debug)]
pub enum SubmitOutcome {
    Success { ledger_sequence: u64 },
    Failed(LedgerError),
}

/// Ledger-level errors, classified as retriable or permanent so the task
/// basket (§4.2) and the force-close fallback (§5, "Failure model") know
/// whether to retry or give up.
#[derive(Clone, Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("transient ledger error: {0}")]
    Retriable(String),
    #[error("permanent ledger rejection: {0}")]
    Permanent(String),
}

impl LedgerError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, LedgerError::Retriable(_))
    }
}

/// The abstract ledger client (§6a). Implementations: [`HorizonLedgerClient`]
/// for production use, [`MockLedgerClient`] for tests.
#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    /// Streams successful transactions touching `account`, starting just
    /// after `cursor`. The stream runs until the returned receiver is
    /// dropped or the underlying connection fails.
    async fn stream_txs(
        &self,
        account: AccountId,
        cursor: Cursor,
    ) -> Result<mpsc::Receiver<LedgerTransaction>, LedgerError>;

    /// Submits a signed envelope, returning its classified outcome.
    async fn submit(&self, envelope: TxEnvelope) -> Result<SubmitOutcome, LedgerError>;

    /// The current sequence number for `account`.
    async fn sequence_for_account(
        &self,
        account: AccountId,
    ) -> Result<SequenceNumber, LedgerError>;

    /// The client's canonical notion of "now".
    fn now(&self) -> DateTime<Utc>;

    /// Returns a future that resolves once wall-clock time `at` has passed,
    /// used to arm the timers in §4.5 ("Timers are armed via post-commit
    /// hooks; firing re-enters the FSM with a timer input").
    fn after(&self, at: DateTime<Utc>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}
