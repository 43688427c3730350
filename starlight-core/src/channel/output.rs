//! The FSM's outputs (§4.5: "outputs are an ordered list of: outgoing peer
//! message, outgoing ledger transaction, timer, update record").

use chrono::{DateTime, Utc};

use crate::{ledger::TxEnvelope, UpdateRecord};

use super::{input::TimerKind, PeerMessage};

/// One effect the dispatcher must carry out after a transition commits.
/// Peer messages and ledger transactions are enrolled into the task basket
/// (§4.2); timers are armed via post-commit hook (§4.5); updates are
/// appended to the observable log.
#[derive(Clone, Debug)]
pub enum Output {
    SendPeerMessage { message: PeerMessage },
    SubmitTx { envelope: TxEnvelope },
    ArmTimer { kind: TimerKind, at: DateTime<Utc> },
    Update(UpdateRecord),
}
