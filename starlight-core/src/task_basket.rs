//! The task basket (§4.2): a persistent at-least-once retry queue for the
//! two kinds of outbound side effect the agent ever needs to drive to
//! completion -- submitting a ledger transaction and delivering a peer
//! message. Grounded on the source workspace's background-processor
//! pattern, with its enum-of-task-kinds replacing dynamic dispatch on task
//! type (§9, "Dynamic dispatch on task type").

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use starlight_common::AccountId;
use tokio::sync::Notify;
use tracing::{info, instrument, warn};

use crate::{
    ledger::{LedgerClient, SubmitOutcome, TxEnvelope},
    store::DurableStore,
    support::{get_backoff_iter, ShutdownChannel},
    AgentConfig, UpdateRecord,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

/// The two side-effect kinds enrolled by the channel FSM and the dispatcher
/// (§4.2's task table).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum TaskKind {
    /// Submit a signed ledger envelope on the channel's behalf.
    SendTx { channel: AccountId, envelope: TxEnvelope },
    /// POST a peer message to the channel counterparty's `remoteURL`.
    SendMsg {
        channel: AccountId,
        url: String,
        /// The JSON-serialized peer message envelope. Kept opaque here so
        /// the task basket doesn't need to depend on the peer wire types
        /// defined alongside the HTTP surface.
        body: serde_json::Value,
    },
}

impl TaskKind {
    pub fn channel(&self) -> AccountId {
        match self {
            TaskKind::SendTx { channel, .. } => *channel,
            TaskKind::SendMsg { channel, .. } => *channel,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskRecord {
    pub kind: TaskKind,
    pub enrolled_at: DateTime<Utc>,
}

/// The outcome of one execution attempt.
enum Attempt {
    Success,
    Retriable(String),
    Permanent(String),
}

/// Everything the task basket's run loop needs: the store (to list, remove,
/// and record warnings), the ledger client (for `send-tx`), and an HTTP
/// client (for `send-msg`). Shared with the wallet watcher and the
/// dispatcher, which is why it's `Arc`-wrapped rather than owned outright.
pub struct TaskContext {
    pub store: Arc<DurableStore>,
    pub ledger: Arc<dyn LedgerClient>,
    pub http: reqwest::Client,
    /// Notified by a post-commit hook whenever `add` enrolls a new task, so
    /// the run loop doesn't have to busy-poll the store.
    pub wake: Arc<Notify>,
}

/// Enrolls a task inside the current durable transaction (§4.2, `add`).
/// Must be called from within a [`crate::store::UpdateHandle`] and armed by
/// a post-commit hook that notifies the run loop; the caller passes the
/// `Notify` handle in because the store itself has no opinion about what
/// wakes on commit.
pub fn add(
    handle: &mut crate::store::UpdateHandle<'_>,
    wake: Arc<Notify>,
    kind: TaskKind,
    now: DateTime<Utc>,
) -> Result<TaskId, starlight_common::ApiError> {
    let record = TaskRecord {
        kind,
        enrolled_at: now,
    };
    let id = handle.enqueue_task(&record)?;
    handle.defer(move || wake.notify_one());
    Ok(id)
}

/// The long-lived retry loop (§4.2, `run`). Restart-safe: on every wake it
/// re-lists the store's `tasks` bucket rather than keeping its own
/// in-memory queue, so a process restart picks up exactly the tasks that
/// were durable at the time of the crash.
#[instrument(skip_all)]
pub async fn run(ctx: Arc<TaskContext>, config: Arc<AgentConfig>, shutdown: ShutdownChannel) {
    let in_flight: Arc<Mutex<HashSet<TaskId>>> = Arc::new(Mutex::new(HashSet::new()));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("task basket shutting down");
                return;
            }
            _ = ctx.wake.notified() => {}
            _ = tokio::time::sleep(Duration::from_secs(10)) => {}
        }

        let pending = match ctx.store.view(|v| v.list_tasks()) {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "failed to list pending tasks, will retry on next wake");
                continue;
            }
        };

        for (id, record) in pending {
            let already_running = {
                let mut guard = in_flight.lock().unwrap();
                !guard.insert(id)
            };
            if already_running {
                continue;
            }

            let ctx = ctx.clone();
            let config = config.clone();
            let shutdown = shutdown.clone();
            let in_flight = in_flight.clone();
            tokio::spawn(async move {
                execute_with_retry(&ctx, &config, id, record, &shutdown).await;
                in_flight.lock().unwrap().remove(&id);
            });
        }
    }
}

#[instrument(skip(ctx, config, record, shutdown), fields(task = id.0))]
async fn execute_with_retry(
    ctx: &TaskContext,
    config: &AgentConfig,
    id: TaskId,
    record: TaskRecord,
    shutdown: &ShutdownChannel,
) {
    let mut backoff = get_backoff_iter();
    loop {
        let attempt = execute_once(ctx, &record.kind).await;
        match attempt {
            Attempt::Success => {
                let _ = ctx.store.update(|h| {
                    h.remove_task(id)?;
                    Ok(())
                });
                return;
            }
            Attempt::Permanent(msg) => {
                warn!(%msg, "task failed permanently, recording warning and dropping");
                let channel = record.kind.channel();
                let _ = ctx.store.update(|h| {
                    h.remove_task(id)?;
                    h.append_update(&UpdateRecord::warning(Some(channel), msg.clone()))?;
                    Ok(())
                });
                return;
            }
            Attempt::Retriable(msg) => {
                warn!(%msg, "task execution failed, retrying with backoff");
            }
        }

        let wait = backoff.next().unwrap_or(Duration::from_millis(config.keep_alive_ms()));
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

async fn execute_once(ctx: &TaskContext, kind: &TaskKind) -> Attempt {
    match kind {
        TaskKind::SendTx { envelope, .. } => match ctx.ledger.submit(envelope.clone()).await {
            Ok(SubmitOutcome::Success { .. }) => Attempt::Success,
            Ok(SubmitOutcome::Failed(e)) if e.is_retriable() => Attempt::Retriable(e.to_string()),
            Ok(SubmitOutcome::Failed(e)) => Attempt::Permanent(e.to_string()),
            Err(e) if e.is_retriable() => Attempt::Retriable(e.to_string()),
            Err(e) => Attempt::Permanent(e.to_string()),
        },
        TaskKind::SendMsg { url, body, .. } => match ctx.http.post(url).json(body).send().await {
            Ok(resp) if resp.status().is_success() => Attempt::Success,
            // 205 Reset Content: the peer's task basket should drop this
            // task, per §4.6 / §7's non-retriable protocol error mapping.
            Ok(resp) if resp.status().as_u16() == 205 => {
                Attempt::Permanent("peer rejected message as non-retriable".into())
            }
            Ok(resp) => Attempt::Retriable(format!("peer responded {}", resp.status())),
            Err(e) => Attempt::Retriable(e.to_string()),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ledger::{LedgerError, MockLedgerClient};

    fn test_config() -> Arc<AgentConfig> {
        Arc::new(AgentConfig::default_for_test())
    }

    #[tokio::test]
    async fn send_tx_succeeds_on_first_attempt() {
        let ledger = Arc::new(MockLedgerClient::new());
        ledger.queue_submit_outcome(Ok(SubmitOutcome::Success { ledger_sequence: 1 }));
        let ctx = TaskContext {
            store: Arc::new(DurableStore::open_temporary().unwrap()),
            ledger: ledger.clone(),
            http: reqwest::Client::new(),
            wake: Arc::new(Notify::new()),
        };
        let id = TaskId(0);
        let record = TaskRecord {
            kind: TaskKind::SendTx {
                channel: AccountId([1u8; 32]),
                envelope: TxEnvelope(vec![1, 2, 3]),
            },
            enrolled_at: Utc::now(),
        };
        ctx.store
            .update(|h| {
                h.enqueue_task(&record)?;
                Ok(())
            })
            .unwrap();

        let shutdown = ShutdownChannel::new();
        execute_with_retry(&ctx, &test_config(), id, record, &shutdown).await;
        assert_eq!(ctx.store.view(|v| v.list_tasks()).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn permanent_failure_removes_task_and_records_warning() {
        let ledger = Arc::new(MockLedgerClient::new());
        ledger.queue_submit_outcome(Err(LedgerError::Permanent("bad sequence".into())));
        let ctx = TaskContext {
            store: Arc::new(DurableStore::open_temporary().unwrap()),
            ledger: ledger.clone(),
            http: reqwest::Client::new(),
            wake: Arc::new(Notify::new()),
        };
        let channel = AccountId([2u8; 32]);
        let record = TaskRecord {
            kind: TaskKind::SendTx {
                channel,
                envelope: TxEnvelope(vec![4, 5, 6]),
            },
            enrolled_at: Utc::now(),
        };
        let shutdown = ShutdownChannel::new();
        execute_with_retry(&ctx, &test_config(), TaskId(0), record, &shutdown).await;

        assert_eq!(ctx.store.view(|v| v.list_tasks()).unwrap().len(), 0);
    }
}
