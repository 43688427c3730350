//! The wallet watcher (§4.3): a single long-running consumer of the ledger
//! client's transaction stream for the agent's primary account, translating
//! observed operations into balance updates.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use starlight_common::{AccountId, Stroops};
use tracing::{error, info, instrument, warn};

use crate::{
    ledger::{Cursor, LedgerClient, LedgerTransaction, OperationKind},
    store::DurableStore,
    support::{get_backoff_iter, ShutdownChannel},
    UpdateRecord,
};

/// The primary account's on-ledger state (§3, Agent state `wallet` field).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletState {
    pub balance: Stroops,
    /// `0` until the account is observed funded on-ledger (§3, "Agent:...
    /// funded (wallet watcher observes the create-account operation, sets
    /// `seqnum > 0`)").
    pub seqnum: i64,
    pub cursor: Cursor,
}

impl WalletState {
    pub fn is_funded(&self) -> bool {
        self.seqnum > 0
    }
}

/// Runs the wallet watcher until `shutdown` fires. Restartable with
/// exponential backoff on stream error rather than aborting the process
/// (§9's Open Question -- decided in DESIGN.md in favor of graceful
/// restart, since the task basket and channel FSM already tolerate the
/// primary account's balance lagging briefly behind the ledger).
#[instrument(skip_all, fields(%primary_account))]
pub async fn run(
    store: Arc<DurableStore>,
    ledger: Arc<dyn LedgerClient>,
    primary_account: AccountId,
    shutdown: ShutdownChannel,
) {
    let mut backoff = get_backoff_iter();
    loop {
        let cursor = match store.view(|v| v.get_wallet()) {
            Ok(wallet) => wallet.cursor,
            Err(e) => {
                error!(error = %e, "failed to read wallet cursor, retrying");
                Cursor::START
            }
        };

        let mut rx = match ledger.stream_txs(primary_account, cursor).await {
            Ok(rx) => rx,
            Err(e) => {
                let wait = backoff.next().unwrap_or(std::time::Duration::from_secs(32));
                warn!(error = %e, wait_ms = wait.as_millis() as u64, "ledger stream failed to start, backing off");
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = tokio::time::sleep(wait) => continue,
                }
            }
        };
        backoff = get_backoff_iter();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("wallet watcher shutting down");
                    return;
                }
                maybe_tx = rx.recv() => {
                    match maybe_tx {
                        Some(tx) => apply_transaction(&store, primary_account, &tx),
                        None => {
                            warn!("ledger stream ended, restarting");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Applies one confirmed transaction's operations to the wallet, inside a
/// single durable update, per §4.3's per-operation rules.
fn apply_transaction(store: &DurableStore, primary_account: AccountId, tx: &LedgerTransaction) {
    let result = store.update(|h| {
        let mut wallet = h.get_wallet()?;
        let mut touched = false;

        for op in &tx.operations {
            if op.destination != primary_account {
                continue;
            }
            touched = true;
            match &op.kind {
                OperationKind::CreateAccount { starting_balance } => {
                    wallet.balance = *starting_balance;
                    wallet.seqnum = (tx.ledger_sequence as i64) << 32;
                }
                OperationKind::Payment { amount } => {
                    wallet.balance += *amount;
                }
                OperationKind::AccountMerge { merged_balance } => {
                    wallet.balance += *merged_balance;
                }
                OperationKind::Other => {}
            }
        }

        if !touched {
            wallet.cursor = tx.cursor.clone();
            h.put_wallet(&wallet)?;
            return Ok(());
        }

        wallet.cursor = tx.cursor.clone();
        h.put_wallet(&wallet)?;
        h.append_update(&UpdateRecord::Account {
            account: primary_account,
            balance: wallet.balance,
        })?;
        if tx.submitted_by == primary_account {
            h.append_update(&UpdateRecord::TxSuccess {
                channel: None,
                ledger_sequence: tx.ledger_sequence,
            })?;
        }
        Ok(())
    });

    if let Err(e) = result {
        error!(error = %e, "failed to apply wallet transaction");
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ledger::MockLedgerClient, store::DurableStore};

    #[tokio::test]
    async fn create_account_sets_balance_and_seqnum() {
        let store = Arc::new(DurableStore::open_temporary().unwrap());
        let ledger = Arc::new(MockLedgerClient::new());
        let primary = AccountId([9u8; 32]);
        let shutdown = ShutdownChannel::new();

        let watcher_store = store.clone();
        let watcher_ledger: Arc<dyn LedgerClient> = ledger.clone();
        let watcher_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            run(watcher_store, watcher_ledger, primary, watcher_shutdown).await;
        });

        tokio::task::yield_now().await;
        ledger.push_tx(
            primary,
            LedgerTransaction {
                submitted_by: primary,
                ledger_sequence: 100,
                operations: vec![crate::ledger::Operation {
                    destination: primary,
                    source: None,
                    kind: OperationKind::CreateAccount {
                        starting_balance: Stroops::from_lumens(10_000),
                    },
                }],
                cursor: Cursor("c1".into()),
            },
        );

        // give the spawned watcher a chance to process the pushed tx.
        for _ in 0..50 {
            tokio::task::yield_now().await;
            let wallet = store.view(|v| v.get_wallet()).unwrap();
            if wallet.is_funded() {
                assert_eq!(wallet.balance, Stroops::from_lumens(10_000));
                shutdown.send();
                handle.await.unwrap();
                return;
            }
        }
        panic!("wallet watcher never observed the create-account operation");
    }
}
