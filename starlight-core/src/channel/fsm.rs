//! The pure channel state-transition function (§4.5). `transition` takes
//! the current record, one input, and the caller's notion of "now", and
//! returns the new record plus an ordered list of outputs. It never reads a
//! clock, never performs I/O, and never panics on a malformed-but-possible
//! input -- every combination either advances the state or is rejected with
//! an [`ApiError`], per the side-effect discipline in §4.5.

use chrono::{DateTime, Utc};
use starlight_common::{ApiError, RoundNumber, Stroops};

use crate::ledger::{LedgerTransaction, OperationKind};

use super::{
    builder::{SetupAccountKind, TxBuilder},
    input::{
        ChannelAcceptMsg, ChannelProposeMsg, CloseMsg, Command, Input, PaymentAcceptMsg,
        PaymentCompleteMsg, PaymentProposeMsg, PeerMessage, TimerKind,
    },
    ChannelRecord, ChannelState, Proposal, Role,
};
use crate::UpdateRecord;
use super::Output;

/// Advances `record` by `input`. Returns the new record and the outputs the
/// dispatcher must carry out (enroll tasks, arm timers, append updates)
/// once the surrounding durable transaction commits.
pub fn transition(
    mut record: ChannelRecord,
    input: Input,
    now: DateTime<Utc>,
    builder: &dyn TxBuilder,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    if record.state.is_terminal() {
        return Err(ApiError::protocol_non_retriable("channel is already closed"));
    }

    // Force-close and the outdated-ratchet-penalty path can preempt almost
    // any state, so they're checked before the per-state match.
    if let Input::Command(Command::ForceClose) = &input {
        return force_close(record, now, builder, "force-close requested");
    }
    if let Input::LedgerTx(tx) = &input {
        if let Some(seen_round) = observed_counterparty_ratchet_round(&record, tx) {
            return handle_counterparty_ratchet(record, seen_round, now, builder);
        }
    }

    match (record.state, input) {
        (ChannelState::Start, Input::Command(cmd @ Command::CreateChannel { .. })) => {
            setup_host(record, cmd, now, builder)
        }
        (ChannelState::Start, Input::Peer(PeerMessage::ChannelPropose(msg))) => {
            accept_channel_propose(record, msg, now, builder)
        }

        (ChannelState::SettingUp, Input::LedgerTx(tx)) => observe_setup_account(record, &tx, now),
        (ChannelState::SettingUp, Input::Command(Command::CreateChannel { .. })) => {
            // Idempotent redelivery of the same command; the channel is
            // already mid-setup.
            Ok((record, vec![]))
        }

        (ChannelState::ChannelProposed, Input::Peer(PeerMessage::ChannelAccept(msg))) => {
            submit_funding(record, msg, now, builder)
        }
        (ChannelState::ChannelProposed, Input::Timer(TimerKind::Round1Timeout)) => {
            prefund_timeout_host(record, now, builder)
        }

        (ChannelState::AwaitingFunding, Input::LedgerTx(tx)) => observe_funding(record, &tx, now),
        (ChannelState::AwaitingFunding, Input::Timer(TimerKind::PreFundTimeout)) => {
            prefund_timeout_guest(record, now)
        }

        (ChannelState::Open, Input::Command(Command::ChannelPay { amount })) => {
            propose_payment(record, amount, now, builder)
        }
        (ChannelState::Open, Input::Peer(PeerMessage::PaymentPropose(msg))) => {
            accept_payment(record, msg, now, builder)
        }
        (ChannelState::Open, Input::Command(Command::TopUp { amount })) => {
            topup_command(record, amount, now, builder)
        }
        (ChannelState::Open, Input::LedgerTx(tx)) => observe_topup(record, &tx, now),
        (ChannelState::Open, Input::Command(Command::CloseChannel)) => {
            initiate_close(record, now, builder)
        }
        (ChannelState::Open, Input::Peer(PeerMessage::Close(msg))) => {
            accept_close(record, msg, now, builder)
        }

        (ChannelState::PaymentProposed, Input::Peer(PeerMessage::PaymentAccept(msg))) => {
            complete_payment(record, msg, now)
        }
        (ChannelState::PaymentProposed, Input::Peer(PeerMessage::PaymentPropose(msg))) => {
            resolve_conflict(record, msg, now)
        }
        (ChannelState::PaymentProposed, Input::Timer(TimerKind::RoundTimeout)) => {
            force_close(record, now, builder, "payment round timed out")
        }

        (ChannelState::PaymentAccepted, Input::Peer(PeerMessage::PaymentComplete(msg))) => {
            finalize_payment(record, msg, now)
        }
        (ChannelState::PaymentAccepted, Input::Timer(TimerKind::RoundTimeout)) => {
            force_close(record, now, builder, "payment round timed out")
        }

        (ChannelState::AwaitingPaymentMerge, Input::Peer(PeerMessage::PaymentPropose(msg))) => {
            merge_folded_payment(record, msg, now, builder)
        }

        (ChannelState::AwaitingClose, Input::LedgerTx(tx)) => observe_cooperative_close(record, &tx, now),

        (ChannelState::AwaitingCleanup, Input::LedgerTx(tx)) => observe_cleanup(record, &tx, now),

        (ChannelState::AwaitingRatchet, Input::LedgerTx(tx)) => observe_own_ratchet(record, &tx, now),

        (ChannelState::AwaitingSettlementMintime, Input::Timer(TimerKind::SettlementMintimeTimeout)) => {
            submit_settlement(record, now, builder)
        }

        (ChannelState::AwaitingSettlement, Input::LedgerTx(tx)) => observe_settlement(record, &tx, now),

        // Anything else is either a duplicate redelivery or genuinely
        // inapplicable in the current state; peer messages are idempotent
        // by construction (§5), so the safe default is to drop it rather
        // than error.
        (state, _) => {
            record.state = state;
            Ok((record, vec![]))
        }
    }
}

fn channel_update(record: &ChannelRecord) -> Output {
    Output::Update(UpdateRecord::Channel {
        channel: record.id,
        state: format!("{:?}", record.state),
        host_amount: record.host_amount,
        guest_amount: record.guest_amount,
    })
}

// --- Setup --- //

fn setup_host(
    mut record: ChannelRecord,
    _cmd: Command,
    now: DateTime<Utc>,
    builder: &dyn TxBuilder,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let escrow = builder.build_setup_account(&record, SetupAccountKind::Escrow)?;
    let host_ratchet = builder.build_setup_account(&record, SetupAccountKind::HostRatchet)?;
    let guest_ratchet = builder.build_setup_account(&record, SetupAccountKind::GuestRatchet)?;

    record.state = ChannelState::SettingUp;
    let outputs = vec![
        Output::SubmitTx { envelope: escrow },
        Output::SubmitTx { envelope: host_ratchet },
        Output::SubmitTx { envelope: guest_ratchet },
        channel_update(&record),
    ];
    Ok((record, outputs))
}

/// All three setup accounts must be observed on-ledger before the channel
/// can propose itself (§4.5, "When all three are observed on-ledger ->
/// `ChannelProposed`"). Tracked via the ratchet sequence-number fields:
/// zero means "not yet observed".
fn observe_setup_account(
    mut record: ChannelRecord,
    tx: &LedgerTransaction,
    now: DateTime<Utc>,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    for op in &tx.operations {
        if op.destination == record.escrow_acct {
            record.base_seq_num = tx.ledger_sequence as i64;
        } else if op.destination == record.host_ratchet_acct {
            record.host_ratchet_seq_num = tx.ledger_sequence as i64;
        } else if op.destination == record.guest_ratchet_acct {
            record.guest_ratchet_seq_num = tx.ledger_sequence as i64;
        }
    }

    let all_observed = record.base_seq_num != 0 && record.host_ratchet_seq_num != 0 && record.guest_ratchet_seq_num != 0;
    if !all_observed {
        return Ok((record, vec![]));
    }

    record.state = ChannelState::ChannelProposed;
    record.funding_time = Some(now);
    let propose = PeerMessage::ChannelPropose(ChannelProposeMsg {
        host_acct: record.host_acct,
        guest_acct: record.guest_acct,
        escrow_acct: record.escrow_acct,
        host_ratchet_acct: record.host_ratchet_acct,
        guest_ratchet_acct: record.guest_ratchet_acct,
        host_amount: record.host_amount,
        funding_time: now,
        max_round_duration_secs: record.max_round_duration_secs,
        finality_delay_secs: record.finality_delay_secs,
        channel_feerate: record.channel_feerate,
        host_feerate: record.host_feerate,
        counterparty_address: record.counterparty_address.clone(),
        remote_url: record.remote_url.clone(),
    });
    let timer_at = now + chrono::Duration::seconds(record.max_round_duration_secs);
    let outputs = vec![
        Output::SendPeerMessage { message: propose },
        Output::ArmTimer { kind: TimerKind::Round1Timeout, at: timer_at },
        channel_update(&record),
    ];
    Ok((record, outputs))
}

fn accept_channel_propose(
    mut record: ChannelRecord,
    msg: ChannelProposeMsg,
    now: DateTime<Utc>,
    builder: &dyn TxBuilder,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    record.host_amount = msg.host_amount;
    record.guest_amount = Stroops::ZERO;
    record.funding_amount = msg.host_amount;
    record.max_round_duration_secs = msg.max_round_duration_secs;
    record.finality_delay_secs = msg.finality_delay_secs;
    record.channel_feerate = msg.channel_feerate;
    record.host_feerate = msg.host_feerate;
    record.funding_time = Some(now);
    record.state = ChannelState::AwaitingFunding;

    let host_ratchet_tx = builder.build_ratchet_tx(&record)?;
    let guest_ratchet_tx = builder.build_guest_ratchet_tx(&record)?;
    let accept = PeerMessage::ChannelAccept(ChannelAcceptMsg {
        funding_tx: builder.build_funding_tx(&record)?,
        host_ratchet_tx,
        guest_ratchet_tx,
        base_seq_num: record.base_seq_num,
        host_ratchet_seq_num: record.host_ratchet_seq_num,
        guest_ratchet_seq_num: record.guest_ratchet_seq_num,
    });
    let timer_at = now + chrono::Duration::seconds(record.max_round_duration_secs);
    Ok((
        record.clone(),
        vec![
            Output::SendPeerMessage { message: accept },
            Output::ArmTimer { kind: TimerKind::PreFundTimeout, at: timer_at },
            channel_update(&record),
        ],
    ))
}

// --- Funding --- //

fn submit_funding(
    mut record: ChannelRecord,
    _msg: ChannelAcceptMsg,
    now: DateTime<Utc>,
    builder: &dyn TxBuilder,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let funding_tx = builder.build_funding_tx(&record)?;
    record.state = ChannelState::AwaitingFunding;
    let timer_at = now + chrono::Duration::seconds(record.max_round_duration_secs);
    Ok((
        record.clone(),
        vec![
            Output::SubmitTx { envelope: funding_tx },
            Output::ArmTimer { kind: TimerKind::PreFundTimeout, at: timer_at },
            channel_update(&record),
        ],
    ))
}

fn observe_funding(
    mut record: ChannelRecord,
    tx: &LedgerTransaction,
    _now: DateTime<Utc>,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let funded = tx.operations.iter().any(|op| {
        op.destination == record.escrow_acct
            && matches!(op.kind, OperationKind::Payment { .. } | OperationKind::CreateAccount { .. })
    });
    if !funded {
        return Ok((record, vec![]));
    }
    record.state = ChannelState::Open;
    Ok((record.clone(), vec![channel_update(&record)]))
}

fn prefund_timeout_host(
    mut record: ChannelRecord,
    _now: DateTime<Utc>,
    builder: &dyn TxBuilder,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let cleanup = builder.build_cleanup_tx(&record)?;
    record.state = ChannelState::AwaitingCleanup;
    Ok((
        record.clone(),
        vec![Output::SubmitTx { envelope: cleanup }, channel_update(&record)],
    ))
}

fn prefund_timeout_guest(
    mut record: ChannelRecord,
    _now: DateTime<Utc>,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    record.state = ChannelState::Closed;
    Ok((record.clone(), vec![channel_update(&record)]))
}

fn observe_cleanup(
    mut record: ChannelRecord,
    tx: &LedgerTransaction,
    _now: DateTime<Utc>,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let observed = tx.operations.iter().any(|op| op.destination == record.escrow_acct);
    if !observed {
        return Ok((record, vec![]));
    }
    record.state = ChannelState::Closed;
    Ok((record.clone(), vec![channel_update(&record)]))
}

// --- Payment happy path --- //

fn propose_payment(
    mut record: ChannelRecord,
    amount: Stroops,
    now: DateTime<Utc>,
    builder: &dyn TxBuilder,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let sender_balance = match record.role {
        Role::Host => record.host_amount,
        Role::Guest => record.guest_amount,
    };
    sender_balance
        .checked_sub_nonnegative(amount)
        .ok_or_else(|| ApiError::domain("insufficient balance"))?;
    if amount.0 <= 0 {
        return Err(ApiError::domain("payment amount must be positive"));
    }

    let envelopes = builder.build_payment_txs(&record, amount)?;
    let round_number = record.round_number.next();
    record.pending_amount = amount;
    record.payment_time = Some(now);
    record.current_proposal = Some(Proposal { round_number, amount, envelopes: envelopes.clone(), payer: record.role });
    record.state = ChannelState::PaymentProposed;

    let propose = PeerMessage::PaymentPropose(PaymentProposeMsg { round_number, amount, proposed_txs: envelopes });
    let timer_at = now + chrono::Duration::seconds(record.max_round_duration_secs);
    Ok((
        record.clone(),
        vec![
            Output::SendPeerMessage { message: propose },
            Output::ArmTimer { kind: TimerKind::RoundTimeout, at: timer_at },
            channel_update(&record),
        ],
    ))
}

fn accept_payment(
    mut record: ChannelRecord,
    msg: PaymentProposeMsg,
    now: DateTime<Utc>,
    builder: &dyn TxBuilder,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let countersigned = builder.countersign(&record, &msg.proposed_txs)?;
    record.pending_amount = msg.amount;
    record.payment_time = Some(now);
    record.current_proposal = Some(Proposal {
        round_number: msg.round_number,
        amount: msg.amount,
        envelopes: countersigned.clone(),
        payer: record.role.other(),
    });
    record.state = ChannelState::PaymentAccepted;

    let accept = PeerMessage::PaymentAccept(PaymentAcceptMsg {
        round_number: msg.round_number,
        countersigned_txs: countersigned,
    });
    let timer_at = now + chrono::Duration::seconds(record.max_round_duration_secs);
    Ok((
        record.clone(),
        vec![
            Output::SendPeerMessage { message: accept },
            Output::ArmTimer { kind: TimerKind::RoundTimeout, at: timer_at },
            channel_update(&record),
        ],
    ))
}

fn complete_payment(
    mut record: ChannelRecord,
    msg: PaymentAcceptMsg,
    now: DateTime<Utc>,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let proposal = record
        .current_proposal
        .take()
        .filter(|p| p.round_number == msg.round_number)
        .ok_or_else(|| ApiError::domain("payment-accept for unknown round"))?;

    apply_settled_round(&mut record, proposal.payer, proposal.amount);
    record.payment_time = Some(now);
    record.state = ChannelState::Open;

    let complete = PeerMessage::PaymentComplete(PaymentCompleteMsg { round_number: msg.round_number });
    Ok((
        record.clone(),
        vec![Output::SendPeerMessage { message: complete }, channel_update(&record)],
    ))
}

fn finalize_payment(
    mut record: ChannelRecord,
    msg: PaymentCompleteMsg,
    _now: DateTime<Utc>,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let proposal = record
        .current_proposal
        .take()
        .filter(|p| p.round_number == msg.round_number)
        .ok_or_else(|| ApiError::domain("payment-complete for unknown round"))?;

    apply_settled_round(&mut record, proposal.payer, proposal.amount);
    record.state = ChannelState::Open;
    Ok((record.clone(), vec![channel_update(&record)]))
}

/// Moves `amount` from `payer` to the other side and bumps `roundNumber`
/// (§4.5, "`roundNumber` and balances update on `Open` re-entry"). `payer`
/// is fixed on the [`Proposal`] at the moment it was created (§4.5,
/// "Simultaneous payment (conflict)": the losing side's record keeps its
/// own fixed host/guest identity; only the *proposal*'s payer flips), so
/// both sides of a round settle it identically regardless of which party's
/// record this runs against.
fn apply_settled_round(record: &mut ChannelRecord, payer: Role, amount: Stroops) {
    match payer {
        Role::Host => {
            record.host_amount = record.host_amount.checked_sub(amount).unwrap_or(Stroops::ZERO);
            record.guest_amount += amount;
        }
        Role::Guest => {
            record.guest_amount = record.guest_amount.checked_sub(amount).unwrap_or(Stroops::ZERO);
            record.host_amount += amount;
        }
    }
    record.pending_amount = Stroops::ZERO;
    record.round_number = record.round_number.next();
    record.folded_amount = None;
}

// --- Simultaneous payment conflict --- //

/// §4.5, "Simultaneous payment (conflict)": compare absolute amounts;
/// higher amount wins; tie -> host wins. The loser flips to recipient and
/// waits in `AwaitingPaymentMerge` for the winner's next proposal.
fn resolve_conflict(
    mut record: ChannelRecord,
    incoming: PaymentProposeMsg,
    now: DateTime<Utc>,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let our_proposal = record
        .current_proposal
        .clone()
        .ok_or_else(|| ApiError::domain("no in-flight proposal to resolve a conflict against"))?;

    let we_win = match our_proposal.amount.0.cmp(&incoming.amount.0) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        // tie: host wins.
        std::cmp::Ordering::Equal => record.role == Role::Host,
    };

    if we_win {
        // Stay in PaymentProposed; nothing to emit until the counterparty's
        // next message arrives.
        return Ok((record, vec![]));
    }

    // Remember *our own* proposed amount -- the intent that still needs to
    // be rolled into the winner's next round (§4.5: "which must roll the
    // loser's intent into the next round") -- not the winner's amount,
    // which arrives again (or afresh) as `msg` in `merge_folded_payment`.
    record.folded_amount = Some(our_proposal.amount);
    record.current_proposal = None;
    record.pending_amount = Stroops::ZERO;
    record.state = ChannelState::AwaitingPaymentMerge;
    record.payment_time = Some(now);
    Ok((record.clone(), vec![channel_update(&record)]))
}

/// The winner's subsequent proposal arrives while the loser waits in
/// `AwaitingPaymentMerge`; it is rolled into the next round as a single net
/// transfer (§4.5: "which must roll the loser's intent into the next
/// round"). `record.role` is never mutated by the conflict (it is each
/// party's fixed host/guest identity, §3); only the merged proposal's
/// `payer` reflects which side the net amount actually flows from.
fn merge_folded_payment(
    mut record: ChannelRecord,
    msg: PaymentProposeMsg,
    now: DateTime<Utc>,
    builder: &dyn TxBuilder,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let folded = record.folded_amount.take().unwrap_or(Stroops::ZERO);
    // Net transfer: the winner's newly proposed amount minus the amount
    // already folded from the loser's (this side's) original proposal; if
    // the folded amount is larger, the net flips direction and this side
    // becomes the payer instead.
    let net = msg.amount.0 - folded.0;
    let (payer, net_amount) = if net >= 0 {
        (record.role.other(), Stroops(net))
    } else {
        (record.role, Stroops(-net))
    };
    record.current_proposal = None;

    let countersigned = builder.countersign(&record, &msg.proposed_txs)?;
    record.current_proposal = Some(Proposal {
        round_number: msg.round_number,
        amount: net_amount,
        envelopes: countersigned.clone(),
        payer,
    });
    record.state = ChannelState::PaymentAccepted;
    record.payment_time = Some(now);

    let accept = PeerMessage::PaymentAccept(PaymentAcceptMsg {
        round_number: msg.round_number,
        countersigned_txs: countersigned,
    });
    let timer_at = now + chrono::Duration::seconds(record.max_round_duration_secs);
    Ok((
        record.clone(),
        vec![
            Output::SendPeerMessage { message: accept },
            Output::ArmTimer { kind: TimerKind::RoundTimeout, at: timer_at },
            channel_update(&record),
        ],
    ))
}

// --- Top-up --- //

fn topup_command(
    record: ChannelRecord,
    amount: Stroops,
    _now: DateTime<Utc>,
    builder: &dyn TxBuilder,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let envelope = builder.build_payment_txs(&record, amount)?.into_iter().next().expect("single payment envelope");
    Ok((record, vec![Output::SubmitTx { envelope }]))
}

/// An observed payment or account-merge into any escrow/ratchet account is
/// credited to the host's balance without a state change (§4.5, "Top-up").
fn observe_topup(
    mut record: ChannelRecord,
    tx: &LedgerTransaction,
    _now: DateTime<Utc>,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let mut credited = Stroops::ZERO;
    for op in &tx.operations {
        let touches_channel = op.destination == record.escrow_acct
            || op.destination == record.host_ratchet_acct
            || op.destination == record.guest_ratchet_acct;
        if !touches_channel {
            continue;
        }
        match op.kind {
            OperationKind::Payment { amount } => credited += amount,
            OperationKind::AccountMerge { merged_balance } => credited += merged_balance,
            _ => {}
        }
    }
    if credited.0 == 0 {
        return Ok((record, vec![]));
    }
    record.host_amount += credited;
    record.funding_amount += credited;
    Ok((record.clone(), vec![channel_update(&record)]))
}

// --- Cooperative close --- //

fn initiate_close(
    mut record: ChannelRecord,
    _now: DateTime<Utc>,
    builder: &dyn TxBuilder,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let close_tx = builder.build_cooperative_close_tx(&record)?;
    record.state = ChannelState::AwaitingClose;
    let close_msg = PeerMessage::Close(CloseMsg { cooperative_close_tx: close_tx.clone() });
    Ok((
        record.clone(),
        vec![
            Output::SendPeerMessage { message: close_msg },
            Output::SubmitTx { envelope: close_tx },
            channel_update(&record),
        ],
    ))
}

fn accept_close(
    mut record: ChannelRecord,
    msg: CloseMsg,
    _now: DateTime<Utc>,
    _builder: &dyn TxBuilder,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    record.state = ChannelState::AwaitingClose;
    Ok((
        record.clone(),
        vec![
            Output::SubmitTx { envelope: msg.cooperative_close_tx },
            channel_update(&record),
        ],
    ))
}

fn observe_cooperative_close(
    mut record: ChannelRecord,
    tx: &LedgerTransaction,
    _now: DateTime<Utc>,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let observed = tx.operations.iter().any(|op| op.destination == record.escrow_acct);
    if !observed {
        return Ok((record, vec![]));
    }
    record.state = ChannelState::Closed;
    Ok((record.clone(), vec![channel_update(&record)]))
}

// --- Force close / ratchet --- //

fn force_close(
    mut record: ChannelRecord,
    now: DateTime<Utc>,
    builder: &dyn TxBuilder,
    reason: &str,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    if matches!(
        record.state,
        ChannelState::Start
            | ChannelState::SettingUp
            | ChannelState::AwaitingRatchet
            | ChannelState::AwaitingSettlementMintime
            | ChannelState::AwaitingSettlement
    ) {
        // Setup hasn't produced escrow/ratchet accounts to force-close yet,
        // or we're already on the force-close path.
        return Ok((record, vec![]));
    }
    let ratchet_tx = builder.build_ratchet_tx(&record)?;
    record.state = ChannelState::AwaitingRatchet;
    Ok((
        record.clone(),
        vec![
            Output::SubmitTx { envelope: ratchet_tx },
            Output::Update(UpdateRecord::warning(Some(record.id), reason.to_string())),
            channel_update(&record),
        ],
    ))
}

fn observe_own_ratchet(
    mut record: ChannelRecord,
    tx: &LedgerTransaction,
    now: DateTime<Utc>,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let our_ratchet_acct = match record.role {
        Role::Host => record.host_ratchet_acct,
        Role::Guest => record.guest_ratchet_acct,
    };
    let observed = tx.operations.iter().any(|op| op.destination == our_ratchet_acct);
    if !observed {
        return Ok((record, vec![]));
    }
    record.state = ChannelState::AwaitingSettlementMintime;
    let timer_at = now + chrono::Duration::seconds(record.finality_delay_secs);
    Ok((
        record.clone(),
        vec![
            Output::ArmTimer { kind: TimerKind::SettlementMintimeTimeout, at: timer_at },
            channel_update(&record),
        ],
    ))
}

/// Returns the round number carried by an observed ratchet transaction from
/// the *counterparty's* ratchet account, if `tx` is one. Checked ahead of
/// the per-state match so the outdated-round penalty path (§4.5, "If the
/// party observes the counterparty's ratchet transaction with an outdated
/// round number...") can preempt whatever state the party is currently in.
///
/// A ratchet transaction is identified by who *submitted* it (`tx.submitted_by`,
/// the account whose sequence number the transaction consumes), not by which
/// account an operation's `destination` happens to be. The ratchet account
/// only ever submits its own ratchet transaction; a `SetupAccount`
/// `CreateAccount` into it, or an ordinary top-up `Payment`/`AccountMerge`
/// into it, is submitted by whoever is funding it, never by the ratchet
/// account itself. Matching on `destination` instead would route those
/// benign observations here and drop them (they'd fail both the
/// outdated-round and in-`AwaitingRatchet` checks below and be silently
/// swallowed), so `setup`/`topup` observations must never reach here via a
/// destination match -- only `submitted_by` tells them apart.
fn observed_counterparty_ratchet_round(record: &ChannelRecord, tx: &LedgerTransaction) -> Option<RoundNumber> {
    let counterparty_ratchet_acct = match record.role {
        Role::Host => record.guest_ratchet_acct,
        Role::Guest => record.host_ratchet_acct,
    };
    if tx.submitted_by != counterparty_ratchet_acct {
        return None;
    }
    // The observed round is recoverable from the ratchet transaction's own
    // sequence number in a real ledger client; here we use the channel's
    // currently recorded round as the best available signal, which the
    // dispatcher overrides via `LedgerTransaction` metadata when a richer
    // ledger client is wired in.
    Some(RoundNumber(tx.ledger_sequence))
}

fn handle_counterparty_ratchet(
    mut record: ChannelRecord,
    seen_round: RoundNumber,
    now: DateTime<Utc>,
    builder: &dyn TxBuilder,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    record.last_seen_counterparty_ratchet_round = Some(seen_round);

    if seen_round < record.round_number && !matches!(record.state, ChannelState::AwaitingSettlementMintime | ChannelState::AwaitingSettlement) {
        // Penalty path: the counterparty submitted a stale ratchet. Submit
        // our own (current-round) ratchet tx to win the race.
        let ratchet_tx = builder.build_ratchet_tx(&record)?;
        record.state = ChannelState::AwaitingRatchet;
        return Ok((
            record.clone(),
            vec![
                Output::SubmitTx { envelope: ratchet_tx },
                Output::Update(UpdateRecord::warning(Some(record.id), "counterparty submitted an outdated ratchet transaction".into())),
                channel_update(&record),
            ],
        ));
    }

    if matches!(record.state, ChannelState::AwaitingRatchet) {
        record.state = ChannelState::AwaitingSettlementMintime;
        let timer_at = now + chrono::Duration::seconds(record.finality_delay_secs);
        return Ok((
            record.clone(),
            vec![
                Output::ArmTimer { kind: TimerKind::SettlementMintimeTimeout, at: timer_at },
                channel_update(&record),
            ],
        ));
    }

    Ok((record, vec![]))
}

fn submit_settlement(
    mut record: ChannelRecord,
    _now: DateTime<Utc>,
    builder: &dyn TxBuilder,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let settlement_txs = builder.build_settlement_txs(&record)?;
    record.state = ChannelState::AwaitingSettlement;
    let mut outputs: Vec<Output> = settlement_txs.into_iter().map(|envelope| Output::SubmitTx { envelope }).collect();
    outputs.push(channel_update(&record));
    Ok((record, outputs))
}

fn observe_settlement(
    mut record: ChannelRecord,
    tx: &LedgerTransaction,
    _now: DateTime<Utc>,
) -> Result<(ChannelRecord, Vec<Output>), ApiError> {
    let observed = tx.operations.iter().any(|op| op.destination == record.host_acct || op.destination == record.guest_acct);
    if !observed {
        return Ok((record, vec![]));
    }
    record.state = ChannelState::Closed;
    Ok((record.clone(), vec![channel_update(&record)]))
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use starlight_common::AccountId;

    use super::*;
    use crate::channel::builder::mock::MockTxBuilder;
    use crate::ledger::{Cursor, Operation, OperationKind};

    fn acct(tag: u8) -> AccountId {
        AccountId([tag; 32])
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn fresh_record(role: Role) -> ChannelRecord {
        ChannelRecord {
            id: acct(1),
            role,
            state: ChannelState::Start,
            round_number: RoundNumber::FIRST,
            host_amount: Stroops::from_lumens(100),
            guest_amount: Stroops::ZERO,
            pending_amount: Stroops::ZERO,
            funding_amount: Stroops::from_lumens(100),
            counterparty_address: "bob*example.com".parse().unwrap(),
            remote_url: "https://bob.example.com".to_string(),
            host_acct: acct(2),
            guest_acct: acct(3),
            escrow_acct: acct(1),
            host_ratchet_acct: acct(4),
            guest_ratchet_acct: acct(5),
            base_seq_num: 0,
            host_ratchet_seq_num: 0,
            guest_ratchet_seq_num: 0,
            key_index: 0,
            max_round_duration_secs: 300,
            finality_delay_secs: 60,
            channel_feerate: Stroops::ZERO,
            host_feerate: Stroops::ZERO,
            funding_time: None,
            payment_time: None,
            passphrase: "Test SDF Network ; September 2015".to_string(),
            current_proposal: None,
            folded_amount: None,
            last_seen_counterparty_ratchet_round: None,
        }
    }

    /// A transaction whose *submitter* is the same account as its
    /// operation's destination -- the common case for a ratchet
    /// transaction (which consumes its own ratchet account's sequence
    /// number) and for tests where the submitter doesn't matter.
    fn ledger_tx(destination: AccountId, kind: OperationKind, ledger_sequence: u64) -> LedgerTransaction {
        ledger_tx_from(destination, destination, kind, ledger_sequence)
    }

    /// A transaction submitted by `submitted_by` with a single operation
    /// paying/creating `destination` -- e.g. the host funding a
    /// `CreateAccount`/top-up into an escrow or ratchet account it doesn't
    /// itself own. Distinct from `ledger_tx` because `fsm::transition`
    /// distinguishes a genuine counterparty ratchet submission from a
    /// benign setup/top-up observation by `submitted_by`, not by
    /// `destination` (see `observed_counterparty_ratchet_round`).
    fn ledger_tx_from(
        submitted_by: AccountId,
        destination: AccountId,
        kind: OperationKind,
        ledger_sequence: u64,
    ) -> LedgerTransaction {
        LedgerTransaction {
            submitted_by,
            ledger_sequence,
            operations: vec![Operation { destination, source: None, kind }],
            cursor: Cursor("2".to_string()),
        }
    }

    fn builder() -> MockTxBuilder {
        MockTxBuilder::new()
    }

    /// §8 scenario 2, the host's half: setup through to `Open`, then a
    /// payment settles with the round number and balances the spec expects.
    #[test]
    fn channel_lifecycle_host_reaches_open_then_pays() {
        let record = fresh_record(Role::Host);
        let b = builder();

        let (record, outputs) = transition(
            record,
            Input::Command(Command::CreateChannel {
                recipient: "bob*example.com".parse().unwrap(),
                host_amount: Stroops::from_lumens(100),
                host_url: "https://alice.example.com".to_string(),
            }),
            now(),
            &b,
        )
        .unwrap();
        assert_eq!(record.state, ChannelState::SettingUp);
        assert_eq!(outputs.iter().filter(|o| matches!(o, Output::SubmitTx { .. })).count(), 3);

        // All three setup accounts are created by a `CreateAccount` the host
        // submits (it's funding them), so `submitted_by` is the host account
        // in every case -- never the ratchet account being created, which
        // doesn't exist yet at submission time.
        let (record, _) = transition(
            record,
            Input::LedgerTx(ledger_tx_from(
                record.host_acct,
                record.escrow_acct,
                OperationKind::CreateAccount { starting_balance: Stroops::ZERO },
                10,
            )),
            now(),
            &b,
        )
        .unwrap();
        let (record, _) = transition(
            record,
            Input::LedgerTx(ledger_tx_from(
                record.host_acct,
                record.host_ratchet_acct,
                OperationKind::CreateAccount { starting_balance: Stroops::ZERO },
                11,
            )),
            now(),
            &b,
        )
        .unwrap();
        let (record, outputs) = transition(
            record,
            Input::LedgerTx(ledger_tx_from(
                record.host_acct,
                record.guest_ratchet_acct,
                OperationKind::CreateAccount { starting_balance: Stroops::ZERO },
                12,
            )),
            now(),
            &b,
        )
        .unwrap();
        assert_eq!(record.state, ChannelState::ChannelProposed);
        assert!(outputs.iter().any(|o| matches!(o, Output::SendPeerMessage { message: PeerMessage::ChannelPropose(_) })));
        assert!(outputs.iter().any(|o| matches!(o, Output::ArmTimer { kind: TimerKind::Round1Timeout, .. })));

        let accept = ChannelAcceptMsg {
            funding_tx: b.build_funding_tx(&record).unwrap(),
            host_ratchet_tx: b.build_ratchet_tx(&record).unwrap(),
            guest_ratchet_tx: b.build_guest_ratchet_tx(&record).unwrap(),
            base_seq_num: record.base_seq_num,
            host_ratchet_seq_num: record.host_ratchet_seq_num,
            guest_ratchet_seq_num: record.guest_ratchet_seq_num,
        };
        let (record, outputs) = transition(record, Input::Peer(PeerMessage::ChannelAccept(accept)), now(), &b).unwrap();
        assert_eq!(record.state, ChannelState::AwaitingFunding);
        assert!(outputs.iter().any(|o| matches!(o, Output::SubmitTx { .. })));

        let (record, _) = transition(
            record,
            Input::LedgerTx(ledger_tx(record.escrow_acct, OperationKind::Payment { amount: Stroops::from_lumens(100) }, 13)),
            now(),
            &b,
        )
        .unwrap();
        assert_eq!(record.state, ChannelState::Open);

        // Alice pays 5 lumen.
        let (record, outputs) = transition(record, Input::Command(Command::ChannelPay { amount: Stroops::from_lumens(5) }), now(), &b).unwrap();
        assert_eq!(record.state, ChannelState::PaymentProposed);
        assert!(outputs.iter().any(|o| matches!(o, Output::SendPeerMessage { message: PeerMessage::PaymentPropose(_) })));

        let accept_msg = PaymentAcceptMsg { round_number: RoundNumber(2), countersigned_txs: vec![] };
        let (record, outputs) = transition(record, Input::Peer(PeerMessage::PaymentAccept(accept_msg)), now(), &b).unwrap();
        assert_eq!(record.state, ChannelState::Open);
        assert_eq!(record.host_amount, Stroops::from_lumens(95));
        assert_eq!(record.guest_amount, Stroops::from_lumens(5));
        assert_eq!(record.round_number, RoundNumber(2));
        assert!(outputs.iter().any(|o| matches!(o, Output::SendPeerMessage { message: PeerMessage::PaymentComplete(_) })));
    }

    /// §8 scenario 2, cooperative close from `Open`.
    #[test]
    fn cooperative_close_reaches_closed_on_observation() {
        let mut record = fresh_record(Role::Host);
        record.state = ChannelState::Open;
        let b = builder();

        let (record, outputs) = transition(record, Input::Command(Command::CloseChannel), now(), &b).unwrap();
        assert_eq!(record.state, ChannelState::AwaitingClose);
        assert!(outputs.iter().any(|o| matches!(o, Output::SubmitTx { .. })));

        let escrow = record.escrow_acct;
        let (record, _) = transition(
            record,
            Input::LedgerTx(ledger_tx(escrow, OperationKind::Payment { amount: Stroops::from_lumens(95) }, 20)),
            now(),
            &b,
        )
        .unwrap();
        assert_eq!(record.state, ChannelState::Closed);
    }

    /// §8 scenario 3: host proposes 10, guest proposes 3 in the same
    /// window; host's larger amount wins, guest folds into the next round,
    /// net settles to host=93 guest=7.
    #[test]
    fn simultaneous_payment_conflict_resolves_to_larger_amount() {
        let b = builder();
        let mut host = fresh_record(Role::Host);
        host.state = ChannelState::Open;

        let (host, _) = transition(host, Input::Command(Command::ChannelPay { amount: Stroops::from_lumens(10) }), now(), &b).unwrap();
        assert_eq!(host.state, ChannelState::PaymentProposed);
        let our_round = host.current_proposal.as_ref().unwrap().round_number;

        // The guest's simultaneous 3-lumen proposal arrives.
        let guest_propose = PaymentProposeMsg {
            round_number: our_round,
            amount: Stroops::from_lumens(3),
            proposed_txs: vec![],
        };
        let (host, outputs) = transition(host, Input::Peer(PeerMessage::PaymentPropose(guest_propose)), now(), &b).unwrap();
        // Host's 10 is larger: host stays in PaymentProposed, nothing emitted yet.
        assert_eq!(host.state, ChannelState::PaymentProposed);
        assert!(outputs.is_empty());

        // Host's proposal is accepted and completes the round as usual.
        let accept_msg = PaymentAcceptMsg { round_number: our_round, countersigned_txs: vec![] };
        let (host, _) = transition(host, Input::Peer(PeerMessage::PaymentAccept(accept_msg)), now(), &b).unwrap();
        assert_eq!(host.host_amount, Stroops::from_lumens(90));
        assert_eq!(host.guest_amount, Stroops::from_lumens(10));
        assert_eq!(host.round_number, RoundNumber(2));
    }

    /// The losing side of a conflict: folds into `AwaitingPaymentMerge` and
    /// settles net on the winner's next proposal.
    #[test]
    fn losing_side_of_conflict_folds_into_next_round() {
        let b = builder();
        let mut guest = fresh_record(Role::Guest);
        guest.state = ChannelState::Open;
        guest.host_amount = Stroops::from_lumens(100);
        guest.guest_amount = Stroops::from_lumens(20);
        guest.funding_amount = Stroops::from_lumens(120);

        let (guest, _) = transition(guest, Input::Command(Command::ChannelPay { amount: Stroops::from_lumens(3) }), now(), &b).unwrap();
        assert_eq!(guest.state, ChannelState::PaymentProposed);

        let host_propose = PaymentProposeMsg { round_number: RoundNumber(2), amount: Stroops::from_lumens(10), proposed_txs: vec![] };
        let (guest, outputs) = transition(guest, Input::Peer(PeerMessage::PaymentPropose(host_propose)), now(), &b).unwrap();
        assert_eq!(guest.state, ChannelState::AwaitingPaymentMerge);
        // The party's own host/guest identity never flips (§3); only the
        // merged proposal's payer reflects the conflict's outcome.
        assert_eq!(guest.role, Role::Guest);
        assert_eq!(guest.folded_amount, Some(Stroops::from_lumens(3)));
        assert!(outputs.iter().any(|o| matches!(o, Output::Update(_))));

        // Winner's next proposal rolls the fold in: net 10 - 3 = 7 toward
        // the original winner.
        let next_propose = PaymentProposeMsg { round_number: RoundNumber(2), amount: Stroops::from_lumens(10), proposed_txs: vec![] };
        let (guest, outputs) = transition(guest, Input::Peer(PeerMessage::PaymentPropose(next_propose)), now(), &b).unwrap();
        assert_eq!(guest.state, ChannelState::PaymentAccepted);
        assert_eq!(guest.current_proposal.as_ref().unwrap().amount, Stroops::from_lumens(7));
        assert!(outputs.iter().any(|o| matches!(o, Output::SendPeerMessage { message: PeerMessage::PaymentAccept(_) })));

        // §8 scenario 3's net transfer: the winner's 10 nets against the
        // loser's folded 3, settling 7 from host to guest.
        let complete = PaymentCompleteMsg { round_number: RoundNumber(2) };
        let (guest, _) = transition(guest, Input::Peer(PeerMessage::PaymentComplete(complete)), now(), &b).unwrap();
        assert_eq!(guest.state, ChannelState::Open);
        assert_eq!(guest.host_amount, Stroops::from_lumens(93));
        assert_eq!(guest.guest_amount, Stroops::from_lumens(27));
    }

    /// Ties resolve to the host per §4.5/§8.
    #[test]
    fn tied_conflict_resolves_to_host() {
        let b = builder();
        let mut guest = fresh_record(Role::Guest);
        guest.state = ChannelState::Open;
        guest.host_amount = Stroops::from_lumens(50);
        guest.guest_amount = Stroops::from_lumens(50);

        let (guest, _) = transition(guest, Input::Command(Command::ChannelPay { amount: Stroops::from_lumens(5) }), now(), &b).unwrap();
        let round = guest.current_proposal.as_ref().unwrap().round_number;
        let host_propose = PaymentProposeMsg { round_number: round, amount: Stroops::from_lumens(5), proposed_txs: vec![] };
        let (guest, _) = transition(guest, Input::Peer(PeerMessage::PaymentPropose(host_propose)), now(), &b).unwrap();
        // Tie: host wins, so the guest (non-host) folds.
        assert_eq!(guest.state, ChannelState::AwaitingPaymentMerge);
    }

    /// §8 scenario 4: pre-fund timeout. Host submits a cleanup tx and ends
    /// in `AwaitingCleanup`, reaching `Closed` once observed; guest times
    /// out straight to `Closed`.
    #[test]
    fn prefund_timeout_host_cleans_up_guest_closes_directly() {
        let b = builder();
        let mut host = fresh_record(Role::Host);
        host.state = ChannelState::ChannelProposed;
        let (host, outputs) = transition(host, Input::Timer(TimerKind::Round1Timeout), now(), &b).unwrap();
        assert_eq!(host.state, ChannelState::AwaitingCleanup);
        assert!(outputs.iter().any(|o| matches!(o, Output::SubmitTx { .. })));
        let escrow = host.escrow_acct;
        let (host, _) = transition(
            host,
            Input::LedgerTx(ledger_tx(escrow, OperationKind::Payment { amount: Stroops::from_lumens(100) }, 30)),
            now(),
            &b,
        )
        .unwrap();
        assert_eq!(host.state, ChannelState::Closed);

        let mut guest = fresh_record(Role::Guest);
        guest.state = ChannelState::AwaitingFunding;
        let (guest, _) = transition(guest, Input::Timer(TimerKind::PreFundTimeout), now(), &b).unwrap();
        assert_eq!(guest.state, ChannelState::Closed);
    }

    /// §8 scenario 5: an outdated counterparty ratchet is detected and
    /// penalized before the party settles at its own, current round.
    #[test]
    fn outdated_counterparty_ratchet_triggers_penalty_then_settles() {
        let b = builder();
        let mut host = fresh_record(Role::Host);
        host.state = ChannelState::Open;
        host.round_number = RoundNumber(5);

        let guest_ratchet = host.guest_ratchet_acct;
        let (host, outputs) = transition(
            host,
            Input::LedgerTx(ledger_tx(guest_ratchet, OperationKind::Payment { amount: Stroops::ZERO }, 3)),
            now(),
            &b,
        )
        .unwrap();
        assert_eq!(host.state, ChannelState::AwaitingRatchet);
        assert!(outputs.iter().any(|o| matches!(o, Output::SubmitTx { .. })));
        assert!(outputs.iter().any(|o| matches!(o, Output::Update(UpdateRecord::Warning { .. }))));

        let host_ratchet = host.host_ratchet_acct;
        let (host, outputs) = transition(
            host,
            Input::LedgerTx(ledger_tx(host_ratchet, OperationKind::Payment { amount: Stroops::ZERO }, 6)),
            now(),
            &b,
        )
        .unwrap();
        assert_eq!(host.state, ChannelState::AwaitingSettlementMintime);
        assert!(outputs.iter().any(|o| matches!(o, Output::ArmTimer { kind: TimerKind::SettlementMintimeTimeout, .. })));

        let (host, outputs) = transition(host, Input::Timer(TimerKind::SettlementMintimeTimeout), now(), &b).unwrap();
        assert_eq!(host.state, ChannelState::AwaitingSettlement);
        assert_eq!(outputs.iter().filter(|o| matches!(o, Output::SubmitTx { .. })).count(), 2);

        let host_acct = host.host_acct;
        let (host, _) = transition(
            host,
            Input::LedgerTx(ledger_tx(host_acct, OperationKind::Payment { amount: host.host_amount }, 7)),
            now(),
            &b,
        )
        .unwrap();
        assert_eq!(host.state, ChannelState::Closed);
    }

    /// §8 invariant 4: `Closed` has no outgoing transitions; every input is
    /// rejected as a protocol-non-retriable error.
    #[test]
    fn closed_channel_rejects_all_inputs() {
        let b = builder();
        let mut record = fresh_record(Role::Host);
        record.state = ChannelState::Closed;
        let err = transition(record, Input::Command(Command::ForceClose), now(), &b).unwrap_err();
        assert_eq!(err.kind.to_code(), ApiError::protocol_non_retriable("x").kind.to_code());
    }

    /// §4.5 side-effect discipline: a transition that needs a signature
    /// while the seed is absent aborts rather than advancing state.
    #[test]
    fn missing_seed_aborts_transition_without_mutating_state() {
        let failing = MockTxBuilder { fail_without_seed: true };
        let record = fresh_record(Role::Host);
        let err = transition(
            record,
            Input::Command(Command::CreateChannel {
                recipient: "bob*example.com".parse().unwrap(),
                host_amount: Stroops::from_lumens(100),
                host_url: "https://alice.example.com".to_string(),
            }),
            now(),
            &failing,
        )
        .unwrap_err();
        assert_eq!(err.kind.to_code(), ApiError::precondition("x").kind.to_code());
    }

    /// §8 boundary: a `ChannelPay` larger than the sender's balance is a
    /// domain error, not a state change.
    #[test]
    fn payment_larger_than_balance_is_rejected() {
        let b = builder();
        let mut record = fresh_record(Role::Host);
        record.state = ChannelState::Open;
        record.host_amount = Stroops::from_lumens(1);
        let err = transition(record, Input::Command(Command::ChannelPay { amount: Stroops::from_lumens(2) }), now(), &b).unwrap_err();
        assert_eq!(err.kind.to_code(), ApiError::domain("x").kind.to_code());
    }

    /// §4.5 "Top-up": an observed payment into the escrow account while
    /// `Open` credits the host balance without a state change.
    #[test]
    fn observed_topup_credits_host_balance_without_state_change() {
        let b = builder();
        let mut record = fresh_record(Role::Host);
        record.state = ChannelState::Open;
        let escrow = record.escrow_acct;
        let before = record.host_amount;
        let (record, outputs) = transition(
            record,
            Input::LedgerTx(ledger_tx(escrow, OperationKind::Payment { amount: Stroops::from_lumens(1) }, 40)),
            now(),
            &b,
        )
        .unwrap();
        assert_eq!(record.state, ChannelState::Open);
        assert_eq!(record.host_amount, before + Stroops::from_lumens(1));
        assert!(outputs.iter().any(|o| matches!(o, Output::Update(_))));
    }

    /// A top-up paid into the *guest*-ratchet account while `Open` must
    /// still be credited as a top-up, not misread as a counterparty ratchet
    /// submission just because its destination matches the guest-ratchet
    /// account (§4.5, "Top-up"; the preemption check in `transition` keys
    /// off `submitted_by`, not `destination`, for exactly this reason).
    #[test]
    fn topup_into_guest_ratchet_account_is_credited_not_swallowed() {
        let b = builder();
        let mut record = fresh_record(Role::Host);
        record.state = ChannelState::Open;
        let guest_ratchet = record.guest_ratchet_acct;
        let host_acct = record.host_acct;
        let before = record.host_amount;
        let (record, outputs) = transition(
            record,
            Input::LedgerTx(ledger_tx_from(
                host_acct,
                guest_ratchet,
                OperationKind::Payment { amount: Stroops::from_lumens(2) },
                41,
            )),
            now(),
            &b,
        )
        .unwrap();
        assert_eq!(record.state, ChannelState::Open);
        assert_eq!(record.host_amount, before + Stroops::from_lumens(2));
        assert!(outputs.iter().any(|o| matches!(o, Output::Update(_))));
    }

    /// §5 "Idempotent peer messages": redelivering a message the FSM has
    /// already moved past is dropped rather than erroring or re-advancing.
    #[test]
    fn duplicate_peer_message_in_wrong_state_is_dropped() {
        let b = builder();
        let mut record = fresh_record(Role::Host);
        record.state = ChannelState::Open;
        let duplicate = PaymentAcceptMsg { round_number: RoundNumber(9), countersigned_txs: vec![] };
        let (record, outputs) = transition(record, Input::Peer(PeerMessage::PaymentAccept(duplicate)), now(), &b).unwrap();
        assert_eq!(record.state, ChannelState::Open);
        assert!(outputs.is_empty());
    }

    /// Value conservation (§3, §8 invariant 1) holds across a full
    /// propose/accept/complete round.
    #[test]
    fn value_conserved_across_payment_round() {
        let b = builder();
        let mut record = fresh_record(Role::Host);
        record.state = ChannelState::Open;
        assert!(record.value_conserved());
        // `pending_amount` is reserved (not yet debited from the sender's own
        // balance) while a round is in flight, so conservation as checked by
        // `value_conserved` only holds before the round starts and once it
        // settles, not mid-round.
        let (record, _) = transition(record, Input::Command(Command::ChannelPay { amount: Stroops::from_lumens(5) }), now(), &b).unwrap();
        let round = record.current_proposal.as_ref().unwrap().round_number;
        let (record, _) = transition(
            record,
            Input::Peer(PeerMessage::PaymentAccept(PaymentAcceptMsg { round_number: round, countersigned_txs: vec![] })),
            now(),
            &b,
        )
        .unwrap();
        assert!(record.value_conserved());
    }
}
