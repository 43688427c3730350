//! The durable store (§4.1): a single-writer, transactional key/value
//! database exposing `view` (read-only) and `update` (read-write, atomic)
//! scopes. Backed by `sled`, one `Tree` per logical bucket (§6), matching
//! the "logically partitioned into buckets" persistence contract.
//!
//! `update` is built over `sled::Transactional` across every bucket's tree
//! at once: either every write in the closure commits, or none do. Because
//! sled may retry a transaction closure on conflict, the closure itself must
//! not perform I/O or side effects -- callers instead call
//! [`UpdateHandle::defer`] to register a post-commit hook, which this module
//! guarantees runs exactly once, only after the transaction is durable.

/// Bucket name constants.
pub mod buckets;

use std::path::Path;

use sled::{
    transaction::{abort, ConflictableTransactionError, TransactionError, Transactional},
    Tree,
};
use starlight_common::{AccountId, ApiError};

use crate::{
    channel::ChannelRecord,
    task_basket::{TaskId, TaskRecord},
    wallet::WalletState,
    AgentConfig, UpdateRecord,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("stored record failed to deserialize: {0}")]
    Corrupt(String),
}

/// Store-level failures are always transient from a caller's perspective:
/// disk I/O glitches and corrupt records aren't the caller's fault and don't
/// map to one of §7's caller-facing kinds, so they surface as `Transient`
/// and are retried the same way a network timeout is.
impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::transient(e.to_string())
    }
}

/// Lets callers use `?` directly on [`UpdateHandle`]'s `TxResult`-returning
/// methods from inside an `update` closure (which returns plain
/// `Result<T, ApiError>`): an aborted transaction surfaces its original
/// `ApiError` unchanged, while a `sled`-level conflict/storage error is
/// classified `Transient`, same as [`StoreError`].
impl From<ConflictableTransactionError<ApiError>> for ApiError {
    fn from(e: ConflictableTransactionError<ApiError>) -> Self {
        match e {
            ConflictableTransactionError::Abort(e) => e,
            ConflictableTransactionError::Storage(e) => ApiError::transient(e.to_string()),
            _ => ApiError::transient("transaction conflict"),
        }
    }
}

/// A post-commit hook: arbitrary, non-blocking work to kick off once a
/// transaction's writes are durable (arming a timer, waking the task basket
/// loop). Registered via [`UpdateHandle::defer`], drained and run by
/// [`DurableStore::update`] after `sled`'s transaction closure returns `Ok`.
pub type PostCommitHook = Box<dyn FnOnce() + Send>;

pub struct DurableStore {
    #[allow(dead_code)]
    db: sled::Db,
    config: Tree,
    wallet: Tree,
    channels: Tree,
    tasks: Tree,
    encrypted_seed: Tree,
    next_key_index: Tree,
    primary_account: Tree,
    updates: Tree,
}

impl DurableStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Opens an ephemeral, temp-file-backed store, used by the scenario
    /// tests in §8.
    pub fn open_temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            config: db.open_tree(buckets::CONFIG)?,
            wallet: db.open_tree(buckets::WALLET)?,
            channels: db.open_tree(buckets::CHANNELS)?,
            tasks: db.open_tree(buckets::TASKS)?,
            encrypted_seed: db.open_tree(buckets::ENCRYPTED_SEED)?,
            next_key_index: db.open_tree(buckets::NEXT_KEY_INDEX)?,
            primary_account: db.open_tree(buckets::PRIMARY_ACCOUNT)?,
            updates: db.open_tree(buckets::UPDATES)?,
            db,
        })
    }

    /// A read-only, consistent snapshot over every bucket.
    pub fn view<T>(&self, f: impl FnOnce(&ViewHandle) -> T) -> T {
        f(&ViewHandle { store: self })
    }

    /// A read-write, serialized, atomic transaction. All mutation of
    /// channel records, wallet, config, and the task queue must go through
    /// here (§4.1). Returns the closure's output and runs any deferred
    /// post-commit hooks after the transaction is durable.
    pub fn update<T>(
        &self,
        f: impl Fn(&mut UpdateHandle) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let mut hooks: Vec<PostCommitHook> = Vec::new();
        let result = (
            &self.config,
            &self.wallet,
            &self.channels,
            &self.tasks,
            &self.encrypted_seed,
            &self.next_key_index,
            &self.primary_account,
            &self.updates,
        )
            .transaction(
                |(config, wallet, channels, tasks, encrypted_seed, next_key_index, primary_account, updates)| {
                    // sled may re-invoke this closure on a write conflict;
                    // never carry hooks across attempts.
                    hooks.clear();
                    let mut handle = UpdateHandle {
                        config,
                        wallet,
                        channels,
                        tasks,
                        encrypted_seed,
                        next_key_index,
                        primary_account,
                        updates,
                        hooks: &mut hooks,
                    };
                    match f(&mut handle) {
                        Ok(value) => Ok(value),
                        Err(e) => abort(e),
                    }
                },
            );

        match result {
            Ok(value) => {
                for hook in hooks {
                    hook();
                }
                Ok(value)
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(StoreError::Sled(e).into()),
        }
    }
}

macro_rules! get_json {
    ($tree:expr, $key:expr, $ty:ty) => {{
        match $tree.get($key)? {
            Some(bytes) => Some(
                serde_json::from_slice::<$ty>(&bytes).map_err(|e| {
                    ConflictableTransactionError::Abort(ApiError::from(StoreError::Corrupt(e.to_string())))
                })?,
            ),
            None => None,
        }
    }};
}

macro_rules! put_json {
    ($tree:expr, $key:expr, $value:expr) => {{
        let bytes = serde_json::to_vec($value).map_err(|e| {
            ConflictableTransactionError::Abort(ApiError::from(StoreError::Corrupt(e.to_string())))
        })?;
        $tree.insert($key, bytes)?;
    }};
}

/// A read-only handle into the store, valid for the duration of a `view`
/// call.
pub struct ViewHandle<'a> {
    store: &'a DurableStore,
}

impl<'a> ViewHandle<'a> {
    pub fn get_channel(&self, id: &AccountId) -> Result<Option<ChannelRecord>, StoreError> {
        match self.store.channels.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn list_channels(&self) -> Result<Vec<ChannelRecord>, StoreError> {
        self.store
            .channels
            .iter()
            .values()
            .map(|res| {
                let bytes = res?;
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
            })
            .collect()
    }

    pub fn get_wallet(&self) -> Result<WalletState, StoreError> {
        match self.store.wallet.get(buckets::SINGLETON_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?),
            None => Ok(WalletState::default()),
        }
    }

    pub fn get_config(&self) -> Result<Option<AgentConfig>, StoreError> {
        match self.store.config.get(buckets::SINGLETON_KEY)? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn get_encrypted_seed(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .store
            .encrypted_seed
            .get(buckets::SINGLETON_KEY)?
            .map(|b| b.to_vec()))
    }

    pub fn get_next_key_index(&self) -> Result<u64, StoreError> {
        match self.store.next_key_index.get(buckets::SINGLETON_KEY)? {
            Some(bytes) => Ok(u64::from_be_bytes(
                bytes.as_ref().try_into().map_err(|_| StoreError::Corrupt("next_key_index".into()))?,
            )),
            None => Ok(0),
        }
    }

    pub fn get_primary_account(&self) -> Result<Option<AccountId>, StoreError> {
        match self.store.primary_account.get(buckets::SINGLETON_KEY)? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn list_tasks(&self) -> Result<Vec<(TaskId, TaskRecord)>, StoreError> {
        self.store
            .tasks
            .iter()
            .map(|res| {
                let (key, bytes) = res?;
                let id = TaskId(u64::from_be_bytes(
                    key.as_ref().try_into().map_err(|_| StoreError::Corrupt("task id".into()))?,
                ));
                let record =
                    serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?;
                Ok((id, record))
            })
            .collect()
    }
}

/// A read-write handle into the store, valid for the duration of a single
/// `update` transaction attempt.
pub struct UpdateHandle<'a> {
    config: &'a sled::transaction::TransactionalTree,
    wallet: &'a sled::transaction::TransactionalTree,
    channels: &'a sled::transaction::TransactionalTree,
    tasks: &'a sled::transaction::TransactionalTree,
    encrypted_seed: &'a sled::transaction::TransactionalTree,
    next_key_index: &'a sled::transaction::TransactionalTree,
    primary_account: &'a sled::transaction::TransactionalTree,
    updates: &'a sled::transaction::TransactionalTree,
    hooks: &'a mut Vec<PostCommitHook>,
}

type TxResult<T> = Result<T, ConflictableTransactionError<ApiError>>;

impl<'a> UpdateHandle<'a> {
    pub fn get_channel(&self, id: &AccountId) -> TxResult<Option<ChannelRecord>> {
        Ok(get_json!(self.channels, id.as_bytes(), ChannelRecord))
    }

    pub fn put_channel(&self, record: &ChannelRecord) -> TxResult<()> {
        put_json!(self.channels, record.id.as_bytes(), record);
        Ok(())
    }

    pub fn get_wallet(&self) -> TxResult<WalletState> {
        Ok(get_json!(self.wallet, buckets::SINGLETON_KEY, WalletState).unwrap_or_default())
    }

    pub fn put_wallet(&self, wallet: &WalletState) -> TxResult<()> {
        put_json!(self.wallet, buckets::SINGLETON_KEY, wallet);
        Ok(())
    }

    pub fn get_config(&self) -> TxResult<Option<AgentConfig>> {
        Ok(get_json!(self.config, buckets::SINGLETON_KEY, AgentConfig))
    }

    pub fn put_config(&self, config: &AgentConfig) -> TxResult<()> {
        put_json!(self.config, buckets::SINGLETON_KEY, config);
        Ok(())
    }

    pub fn get_encrypted_seed(&self) -> TxResult<Option<Vec<u8>>> {
        Ok(self.encrypted_seed.get(buckets::SINGLETON_KEY)?.map(|b| b.to_vec()))
    }

    pub fn put_encrypted_seed(&self, bytes: &[u8]) -> TxResult<()> {
        self.encrypted_seed.insert(buckets::SINGLETON_KEY, bytes)?;
        Ok(())
    }

    pub fn get_next_key_index(&self) -> TxResult<u64> {
        match self.next_key_index.get(buckets::SINGLETON_KEY)? {
            Some(bytes) => Ok(u64::from_be_bytes(bytes.as_ref().try_into().map_err(|_| {
                ConflictableTransactionError::Abort(ApiError::from(StoreError::Corrupt("next_key_index".into())))
            })?)),
            None => Ok(0),
        }
    }

    pub fn put_next_key_index(&self, value: u64) -> TxResult<()> {
        self.next_key_index.insert(buckets::SINGLETON_KEY, &value.to_be_bytes())?;
        Ok(())
    }

    /// Consumes and returns the next `count` key indices (§4.4,
    /// `doCreateChannel` step 3: "Allocate three key indices").
    pub fn allocate_key_indices(&self, count: u64) -> TxResult<u64> {
        let start = self.get_next_key_index()?;
        self.put_next_key_index(start + count)?;
        Ok(start)
    }

    pub fn get_primary_account(&self) -> TxResult<Option<AccountId>> {
        Ok(get_json!(self.primary_account, buckets::SINGLETON_KEY, AccountId))
    }

    pub fn put_primary_account(&self, account: &AccountId) -> TxResult<()> {
        put_json!(self.primary_account, buckets::SINGLETON_KEY, account);
        Ok(())
    }

    /// Enrolls a side-effect task inside the current transaction. Visible
    /// to the task basket's `run` loop only once this transaction commits
    /// (§4.2).
    pub fn enqueue_task(&self, record: &TaskRecord) -> TxResult<TaskId> {
        let id = TaskId(self.tasks.generate_id()?);
        put_json!(self.tasks, &id.0.to_be_bytes(), record);
        Ok(id)
    }

    pub fn remove_task(&self, id: TaskId) -> TxResult<()> {
        self.tasks.remove(&id.0.to_be_bytes())?;
        Ok(())
    }

    /// Appends an entry to the observable update log (§3).
    pub fn append_update(&self, record: &UpdateRecord) -> TxResult<()> {
        let id = self.updates.generate_id()?;
        put_json!(self.updates, &id.to_be_bytes(), record);
        Ok(())
    }

    /// Registers non-blocking work to run once this transaction's writes
    /// are durable (§5, "Post-commit hooks run after durability and may
    /// start new goroutines/tasks").
    pub fn defer(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }
}
