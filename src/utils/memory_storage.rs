//! In-memory transactional storage for testing and development
//!
//! Behaves like a read-committed relational store with row-level locks on
//! accounts: a transaction that updates an account balance holds that
//! account's lock until it commits, rolls back, or is dropped. Writes are
//! staged inside the transaction and published in one step on commit.
//! Because the locks are real, two transactions that take the same two
//! account locks in opposite order block each other exactly like they
//! would in a database; a lock wait timeout turns that into
//! [`LedgerError::LockTimeout`] instead of a hang.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::config::StoreConfig;
use crate::context::Context;
use crate::traits::*;
use crate::types::*;

/// Lock wait timeout used by [`MemoryStorage::new`]
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

type RowLock = tokio::sync::Mutex<()>;

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

#[derive(Debug)]
struct Shared {
    tables: RwLock<Tables>,
    row_locks: Mutex<HashMap<AccountId, Arc<RowLock>>>,
    account_seq: AtomicI64,
    entry_seq: AtomicI64,
    transfer_seq: AtomicI64,
    lock_timeout: Duration,
}

/// In-memory storage implementation for testing and development
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
}

fn poisoned<T>(_: PoisonError<T>) -> LedgerError {
    LedgerError::Storage("memory storage lock poisoned".to_string())
}

fn next_id(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::SeqCst)
}

fn page(limit: i64, offset: i64) -> LedgerResult<(usize, usize)> {
    if limit < 0 || offset < 0 {
        return Err(LedgerError::Validation(format!(
            "limit and offset must not be negative (limit = {}, offset = {})",
            limit, offset
        )));
    }
    Ok((limit as usize, offset as usize))
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create a memory storage that gives up on row lock waits after `lock_timeout`
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: RwLock::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                account_seq: AtomicI64::new(1),
                entry_seq: AtomicI64::new(1),
                transfer_seq: AtomicI64::new(1),
                lock_timeout,
            }),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::with_lock_timeout(config.lock_timeout())
    }

    fn tables(&self) -> LedgerResult<RwLockReadGuard<'_, Tables>> {
        self.shared.tables.read().map_err(poisoned)
    }

    fn tables_mut(&self) -> LedgerResult<RwLockWriteGuard<'_, Tables>> {
        self.shared.tables.write().map_err(poisoned)
    }

    fn row_lock(&self, id: AccountId) -> LedgerResult<Arc<RowLock>> {
        let mut locks = self.shared.row_locks.lock().map_err(poisoned)?;
        Ok(locks.entry(id).or_default().clone())
    }

    fn account_exists(&self, id: AccountId) -> LedgerResult<bool> {
        Ok(self.tables()?.accounts.contains_key(&id))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    type Tx = MemoryTransaction;

    async fn begin(&self, ctx: &Context) -> LedgerResult<MemoryTransaction> {
        ctx.check()?;
        Ok(MemoryTransaction {
            storage: self.clone(),
            ctx: ctx.clone(),
            locked: HashMap::new(),
            transfers: Vec::new(),
            entries: Vec::new(),
            finished: false,
        })
    }

    async fn create_account(&self, params: CreateAccountParams) -> LedgerResult<Account> {
        let account = Account {
            id: next_id(&self.shared.account_seq),
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: Utc::now(),
        };
        self.tables_mut()?
            .accounts
            .insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, id: AccountId) -> LedgerResult<Account> {
        self.tables()?
            .accounts
            .get(&id)
            .cloned()
            .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn get_entry(&self, id: EntryId) -> LedgerResult<Entry> {
        self.tables()?
            .entries
            .get(&id)
            .cloned()
            .ok_or(LedgerError::EntryNotFound(id))
    }

    async fn get_transfer(&self, id: TransferId) -> LedgerResult<Transfer> {
        self.tables()?
            .transfers
            .get(&id)
            .cloned()
            .ok_or(LedgerError::TransferNotFound(id))
    }

    async fn list_entries(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Entry>> {
        let (limit, offset) = page(limit, offset)?;
        Ok(self
            .tables()?
            .entries
            .values()
            .filter(|entry| entry.account_id == account_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_transfers(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Transfer>> {
        let (limit, offset) = page(limit, offset)?;
        Ok(self
            .tables()?
            .transfers
            .values()
            .filter(|t| t.from_account_id == from_account_id || t.to_account_id == to_account_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Account row locked by a transaction, with its staged balance
#[derive(Debug)]
struct LockedRow {
    account: Account,
    _guard: OwnedMutexGuard<()>,
}

/// Open transaction against a [`MemoryStorage`]
#[derive(Debug)]
pub struct MemoryTransaction {
    storage: MemoryStorage,
    ctx: Context,
    locked: HashMap<AccountId, LockedRow>,
    transfers: Vec<Transfer>,
    entries: Vec<Entry>,
    finished: bool,
}

impl MemoryTransaction {
    /// Take the row lock for `id`, waiting at most the configured lock timeout
    async fn acquire(&self, id: AccountId) -> LedgerResult<LockedRow> {
        if !self.storage.account_exists(id)? {
            return Err(LedgerError::AccountNotFound(id));
        }

        let lock = self.storage.row_lock(id)?;
        let timeout = self.storage.shared.lock_timeout;
        let guard = tokio::select! {
            acquired = tokio::time::timeout(timeout, lock.lock_owned()) => {
                acquired.map_err(|_| LedgerError::LockTimeout(id))?
            }
            reason = self.ctx.done() => return Err(reason),
        };

        // Re-read under the lock so the latest committed balance is the base.
        let account = self
            .storage
            .tables()?
            .accounts
            .get(&id)
            .cloned()
            .ok_or(LedgerError::AccountNotFound(id))?;

        Ok(LockedRow {
            account,
            _guard: guard,
        })
    }

    async fn locked_account(&mut self, id: AccountId) -> LedgerResult<&mut Account> {
        if !self.locked.contains_key(&id) {
            let row = self.acquire(id).await?;
            tracing::trace!(account_id = id, "row lock acquired");
            self.locked.insert(id, row);
        }
        self.locked
            .get_mut(&id)
            .map(|row| &mut row.account)
            .ok_or(LedgerError::AccountNotFound(id))
    }

    fn require_account(&self, id: AccountId) -> LedgerResult<()> {
        if self.locked.contains_key(&id) || self.storage.account_exists(id)? {
            Ok(())
        } else {
            Err(LedgerError::AccountNotFound(id))
        }
    }
}

#[async_trait]
impl Queries for MemoryTransaction {
    async fn create_transfer(&mut self, params: CreateTransferParams) -> LedgerResult<Transfer> {
        self.require_account(params.from_account_id)?;
        self.require_account(params.to_account_id)?;

        let transfer = Transfer {
            id: next_id(&self.storage.shared.transfer_seq),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> LedgerResult<Entry> {
        self.require_account(params.account_id)?;

        let entry = Entry {
            id: next_id(&self.storage.shared.entry_seq),
            account_id: params.account_id,
            amount: params.amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn add_account_balance(
        &mut self,
        params: AddAccountBalanceParams,
    ) -> LedgerResult<Account> {
        let account = self.locked_account(params.id).await?;
        account.balance = account.balance.checked_add(params.amount).ok_or_else(|| {
            LedgerError::Validation(format!("Balance overflow on account {}", params.id))
        })?;
        Ok(account.clone())
    }

    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        match self.locked.get(&id) {
            Some(row) => Ok(row.account.clone()),
            None => self.storage.get_account(id).await,
        }
    }
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn commit(mut self) -> LedgerResult<()> {
        let mut tables = self.storage.tables_mut()?;
        for row in self.locked.values() {
            let account = tables
                .accounts
                .get_mut(&row.account.id)
                .ok_or(LedgerError::AccountNotFound(row.account.id))?;
            account.balance = row.account.balance;
        }
        tables
            .transfers
            .extend(self.transfers.drain(..).map(|t| (t.id, t)));
        tables
            .entries
            .extend(self.entries.drain(..).map(|e| (e.id, e)));
        drop(tables);

        tracing::trace!(rows_locked = self.locked.len(), "memory transaction committed");
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self) -> LedgerResult<()> {
        self.transfers.clear();
        self.entries.clear();
        self.finished = true;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                rows_locked = self.locked.len(),
                "memory transaction dropped without commit; discarding writes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    async fn seed(storage: &MemoryStorage, balance: i64) -> Account {
        storage
            .create_account(CreateAccountParams::new("owner", balance, "USD"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_commit_publishes_staged_writes() {
        let storage = MemoryStorage::new();
        let account = seed(&storage, 100).await;

        let mut tx = storage.begin(&Context::background()).await.unwrap();
        let entry = tx
            .create_entry(CreateEntryParams {
                account_id: account.id,
                amount: 25,
            })
            .await
            .unwrap();
        let updated = tx
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 25,
            })
            .await
            .unwrap();
        assert_eq!(updated.balance, 125);

        // Not visible before commit
        assert_eq!(storage.get_account(account.id).await.unwrap().balance, 100);
        assert!(storage.get_entry(entry.id).await.is_err());

        tx.commit().await.unwrap();

        assert_eq!(storage.get_account(account.id).await.unwrap().balance, 125);
        assert_eq!(storage.get_entry(entry.id).await.unwrap(), entry);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes_and_burns_ids() {
        let storage = MemoryStorage::new();
        let account = seed(&storage, 100).await;

        let mut tx = storage.begin(&Context::background()).await.unwrap();
        let discarded = tx
            .create_entry(CreateEntryParams {
                account_id: account.id,
                amount: -10,
            })
            .await
            .unwrap();
        tx.add_account_balance(AddAccountBalanceParams {
            id: account.id,
            amount: -10,
        })
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(storage.get_account(account.id).await.unwrap().balance, 100);
        assert!(storage.list_entries(account.id, 10, 0).await.unwrap().is_empty());

        let mut tx = storage.begin(&Context::background()).await.unwrap();
        let kept = tx
            .create_entry(CreateEntryParams {
                account_id: account.id,
                amount: 5,
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert!(kept.id > discarded.id);
    }

    #[tokio::test]
    async fn test_repeated_updates_in_one_transaction_reuse_the_lock() {
        let storage = MemoryStorage::with_lock_timeout(Duration::from_millis(50));
        let account = seed(&storage, 0).await;

        let mut tx = storage.begin(&Context::background()).await.unwrap();
        for _ in 0..3 {
            tx.add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 10,
            })
            .await
            .unwrap();
        }
        assert_eq!(tx.get_account(account.id).await.unwrap().balance, 30);
        tx.commit().await.unwrap();

        assert_eq!(storage.get_account(account.id).await.unwrap().balance, 30);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_opposite_lock_order_blocks_until_timeout() {
        let storage = MemoryStorage::with_lock_timeout(Duration::from_millis(100));
        let a = seed(&storage, 100).await.id;
        let b = seed(&storage, 100).await.id;
        let barrier = Arc::new(Barrier::new(2));

        let mut handles = Vec::new();
        for (first, second) in [(a, b), (b, a)] {
            let storage = storage.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                let mut tx = storage.begin(&Context::background()).await?;
                tx.add_account_balance(AddAccountBalanceParams {
                    id: first,
                    amount: -1,
                })
                .await?;
                barrier.wait().await;
                tx.add_account_balance(AddAccountBalanceParams {
                    id: second,
                    amount: 1,
                })
                .await?;
                tx.commit().await
            }));
        }

        let mut timeouts = 0;
        for handle in handles {
            if let Err(LedgerError::LockTimeout(_)) = handle.await.unwrap() {
                timeouts += 1;
            }
        }
        assert!(timeouts >= 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_lock_wait() {
        let storage = MemoryStorage::with_lock_timeout(Duration::from_secs(30));
        let account = seed(&storage, 100).await;

        let mut holder = storage.begin(&Context::background()).await.unwrap();
        holder
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 1,
            })
            .await
            .unwrap();

        let (ctx, cancel) = Context::with_cancel();
        let mut waiter = storage.begin(&ctx).await.unwrap();
        cancel.cancel();
        let result = waiter
            .add_account_balance(AddAccountBalanceParams {
                id: account.id,
                amount: 1,
            })
            .await;
        assert!(matches!(result, Err(LedgerError::Cancelled)));

        holder.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_account_is_rejected() {
        let storage = MemoryStorage::new();
        let account = seed(&storage, 0).await;

        let mut tx = storage.begin(&Context::background()).await.unwrap();
        let result = tx
            .create_transfer(CreateTransferParams {
                from_account_id: account.id,
                to_account_id: 999,
                amount: 1,
            })
            .await;
        assert!(matches!(result, Err(LedgerError::AccountNotFound(999))));

        let result = tx
            .add_account_balance(AddAccountBalanceParams { id: 999, amount: 1 })
            .await;
        assert!(matches!(result, Err(LedgerError::AccountNotFound(999))));
    }

    #[tokio::test]
    async fn test_list_transfers_matches_either_side() {
        let storage = MemoryStorage::new();
        let a = seed(&storage, 0).await.id;
        let b = seed(&storage, 0).await.id;
        let c = seed(&storage, 0).await.id;

        let mut tx = storage.begin(&Context::background()).await.unwrap();
        for (from, to) in [(a, b), (b, c), (c, a)] {
            tx.create_transfer(CreateTransferParams {
                from_account_id: from,
                to_account_id: to,
                amount: 1,
            })
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();

        let transfers = storage.list_transfers(a, a, 10, 0).await.unwrap();
        assert_eq!(transfers.len(), 2);
        assert!(storage.list_transfers(a, a, -1, 0).await.is_err());
    }
}
