use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use starlight_common::AccountId;
use tokio::sync::mpsc;

use super::{Cursor, LedgerClient, LedgerError, LedgerTransaction, SequenceNumber, SubmitOutcome, TxEnvelope};

/// An in-memory [`LedgerClient`] driven entirely by test code: transactions
/// are pushed directly onto an account's stream, and submit outcomes are
/// queued up front. Mirrors the source workspace's mock-API-client /
/// test-utils split: the scenario tests in §8 construct one of these per
/// simulated peer instead of talking to a real Horizon.
#[derive(Clone, Default)]
pub struct MockLedgerClient {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    senders: HashMap<AccountId, mpsc::Sender<LedgerTransaction>>,
    sequences: HashMap<AccountId, SequenceNumber>,
    submit_outcomes: std::collections::VecDeque<Result<SubmitOutcome, LedgerError>>,
    submitted: Vec<TxEnvelope>,
}

impl MockLedgerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `tx` to any active stream subscribed to `account`, if a
    /// matching operation's destination is `account`. No-op if nothing is
    /// currently subscribed (matching a real stream silently dropping
    /// transactions nobody asked for).
    pub fn push_tx(&self, account: AccountId, tx: LedgerTransaction) {
        let inner = self.inner.lock().unwrap();
        if let Some(tx_sender) = inner.senders.get(&account) {
            let _ = tx_sender.try_send(tx);
        }
    }

    pub fn set_sequence(&self, account: AccountId, seq: SequenceNumber) {
        self.inner.lock().unwrap().sequences.insert(account, seq);
    }

    /// Queues the outcome of the next call to [`LedgerClient::submit`].
    pub fn queue_submit_outcome(&self, outcome: Result<SubmitOutcome, LedgerError>) {
        self.inner.lock().unwrap().submit_outcomes.push_back(outcome);
    }

    pub fn submitted_envelopes(&self) -> Vec<TxEnvelope> {
        self.inner.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn stream_txs(
        &self,
        account: AccountId,
        _cursor: Cursor,
    ) -> Result<mpsc::Receiver<LedgerTransaction>, LedgerError> {
        let (tx, rx) = mpsc::channel(64);
        self.inner.lock().unwrap().senders.insert(account, tx);
        Ok(rx)
    }

    async fn submit(&self, envelope: TxEnvelope) -> Result<SubmitOutcome, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.submitted.push(envelope);
        inner
            .submit_outcomes
            .pop_front()
            .unwrap_or(Ok(SubmitOutcome::Success { ledger_sequence: 1 }))
    }

    async fn sequence_for_account(
        &self,
        account: AccountId,
    ) -> Result<SequenceNumber, LedgerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .sequences
            .get(&account)
            .copied()
            .unwrap_or(SequenceNumber(0)))
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn after(&self, at: DateTime<Utc>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let now = Utc::now();
        let dur = (at - now).to_std().unwrap_or(std::time::Duration::ZERO);
        Box::pin(tokio::time::sleep(dur))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ledger::{Operation, OperationKind};
    use starlight_common::Stroops;

    #[tokio::test]
    async fn push_tx_delivers_to_subscribed_stream() {
        let client = MockLedgerClient::new();
        let account = AccountId([1u8; 32]);
        let mut rx = client.stream_txs(account, Cursor::START).await.unwrap();

        client.push_tx(
            account,
            LedgerTransaction {
                submitted_by: account,
                ledger_sequence: 42,
                operations: vec![Operation {
                    destination: account,
                    source: None,
                    kind: OperationKind::Payment {
                        amount: Stroops::from_lumens(1),
                    },
                }],
                cursor: Cursor("c1".into()),
            },
        );

        let received = rx.recv().await.unwrap();
        assert_eq!(received.ledger_sequence, 42);
    }

    #[tokio::test]
    async fn queued_submit_outcomes_are_returned_in_order() {
        let client = MockLedgerClient::new();
        client.queue_submit_outcome(Ok(SubmitOutcome::Success { ledger_sequence: 1 }));
        client.queue_submit_outcome(Err(LedgerError::Permanent("bad seq".into())));

        let env = TxEnvelope(vec![1, 2, 3, 4]);

        let first = client.submit(env.clone()).await.unwrap();
        assert!(matches!(first, SubmitOutcome::Success { .. }));
        let second = client.submit(env).await;
        assert!(second.is_err());
        assert_eq!(client.submitted_envelopes().len(), 2);
    }
}
