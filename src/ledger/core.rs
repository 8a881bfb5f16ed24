//! Transaction orchestrator: runs units of work inside one storage transaction

use futures::future::BoxFuture;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::context::Context;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::validate_account_params;

/// Entry point of the ledger.
///
/// Owns the storage handle and runs every multi-row operation inside a
/// single storage transaction via [`Store::exec_tx`]. Cloning a `Store` is
/// as cheap as cloning its storage handle.
#[derive(Debug, Clone)]
pub struct Store<S: LedgerStorage> {
    storage: S,
    config: StoreConfig,
}

impl<S: LedgerStorage> Store<S> {
    /// Create a new store with default settings
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, StoreConfig::default())
    }

    pub fn with_config(storage: S, config: StoreConfig) -> Self {
        Self { storage, config }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Execute `unit_of_work` within a storage transaction.
    ///
    /// The unit of work receives record access bound to a freshly opened
    /// transaction. Its effects are committed if and only if it succeeds,
    /// `ctx` is still live, and the commit itself succeeds. On failure the
    /// transaction is rolled back; if the rollback fails as well, both
    /// errors are returned in [`LedgerError::Rollback`]. Cancellation of
    /// `ctx` while the unit of work runs aborts it and rolls back.
    pub async fn exec_tx<T, F>(&self, ctx: &Context, unit_of_work: F) -> LedgerResult<T>
    where
        T: Send,
        F: for<'q> FnOnce(&'q mut dyn Queries) -> BoxFuture<'q, LedgerResult<T>> + Send,
    {
        ctx.check()?;

        let tx_id = Uuid::new_v4();
        let span = tracing::debug_span!("ledger_tx", %tx_id);

        async move {
            let mut tx = self.storage.begin(ctx).await?;
            tracing::debug!("transaction opened");

            let outcome = {
                let queries: &mut dyn Queries = &mut tx;
                tokio::select! {
                    result = unit_of_work(queries) => result,
                    reason = ctx.done() => Err(reason),
                }
            };

            let value = match outcome {
                Ok(value) => value,
                Err(err) => return Err(Self::abort(tx, err).await),
            };

            // Cancellation that lands after the work finished still wins over commit.
            if let Some(reason) = ctx.err() {
                return Err(Self::abort(tx, reason).await);
            }

            if let Err(err) = tx.commit().await {
                tracing::error!(error = %err, "transaction commit failed");
                return Err(LedgerError::Commit(Box::new(err)));
            }

            tracing::debug!("transaction committed");
            Ok(value)
        }
        .instrument(span)
        .await
    }

    async fn abort(tx: S::Tx, err: LedgerError) -> LedgerError {
        tracing::warn!(error = %err, "rolling back transaction");
        match tx.rollback().await {
            Ok(()) => err,
            Err(rollback) => {
                tracing::error!(error = %err, rollback_error = %rollback, "rollback failed");
                LedgerError::Rollback {
                    source: Box::new(err),
                    rollback: Box::new(rollback),
                }
            }
        }
    }

    /// Open a new account
    pub async fn create_account(&self, params: CreateAccountParams) -> LedgerResult<Account> {
        validate_account_params(&params)?;
        let account = self.storage.create_account(params).await?;
        tracing::info!(account_id = account.id, owner = %account.owner, "account created");
        Ok(account)
    }

    /// Get committed account state by ID
    pub async fn get_account(&self, id: AccountId) -> LedgerResult<Account> {
        self.storage.get_account(id).await
    }

    pub async fn get_entry(&self, id: EntryId) -> LedgerResult<Entry> {
        self.storage.get_entry(id).await
    }

    pub async fn get_transfer(&self, id: TransferId) -> LedgerResult<Transfer> {
        self.storage.get_transfer(id).await
    }

    /// List entries of one account, oldest first
    pub async fn list_entries(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Entry>> {
        self.storage.list_entries(account_id, limit, offset).await
    }

    /// List transfers sent from `from_account_id` or received by `to_account_id`
    pub async fn list_transfers(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Transfer>> {
        self.storage
            .list_transfers(from_account_id, to_account_id, limit, offset)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;
    use futures::FutureExt;
    use std::time::Duration;

    async fn store_with_account(balance: i64) -> (Store<MemoryStorage>, Account) {
        let store = Store::new(MemoryStorage::new());
        let account = store
            .create_account(CreateAccountParams::new("alice", balance, "USD"))
            .await
            .unwrap();
        (store, account)
    }

    #[tokio::test]
    async fn test_exec_tx_commits_on_success() {
        let (store, account) = store_with_account(100).await;
        let id = account.id;

        let entry = store
            .exec_tx(&Context::background(), move |q| {
                async move {
                    q.add_account_balance(AddAccountBalanceParams { id, amount: 5 })
                        .await?;
                    q.create_entry(CreateEntryParams {
                        account_id: id,
                        amount: 5,
                    })
                    .await
                }
                .boxed()
            })
            .await
            .unwrap();

        assert_eq!(store.get_account(id).await.unwrap().balance, 105);
        assert_eq!(store.get_entry(entry.id).await.unwrap(), entry);
    }

    #[tokio::test]
    async fn test_exec_tx_rolls_back_on_failure() {
        let (store, account) = store_with_account(100).await;
        let id = account.id;

        let result: LedgerResult<()> = store
            .exec_tx(&Context::background(), move |q| {
                async move {
                    q.create_entry(CreateEntryParams {
                        account_id: id,
                        amount: 5,
                    })
                    .await?;
                    q.add_account_balance(AddAccountBalanceParams { id, amount: 5 })
                        .await?;
                    Err(LedgerError::Validation("boom".to_string()))
                }
                .boxed()
            })
            .await;

        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(store.get_account(id).await.unwrap().balance, 100);
        assert!(store.list_entries(id, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_exec_tx_refuses_cancelled_context() {
        let (store, account) = store_with_account(100).await;
        let id = account.id;
        let (ctx, cancel) = Context::with_cancel();
        cancel.cancel();

        let result = store
            .exec_tx(&ctx, move |q| async move { q.get_account(id).await }.boxed())
            .await;

        assert!(matches!(result, Err(LedgerError::Cancelled)));
    }

    #[tokio::test]
    async fn test_exec_tx_rolls_back_when_deadline_hits_mid_transaction() {
        let (store, account) = store_with_account(100).await;
        let id = account.id;
        let ctx = Context::background().with_timeout(Duration::from_millis(20));

        let result: LedgerResult<()> = store
            .exec_tx(&ctx, move |q| {
                async move {
                    q.add_account_balance(AddAccountBalanceParams { id, amount: 1 })
                        .await?;
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
                .boxed()
            })
            .await;

        assert!(matches!(result, Err(LedgerError::DeadlineExceeded)));
        assert_eq!(store.get_account(id).await.unwrap().balance, 100);

        // The row lock was released by the rollback
        store
            .exec_tx(&Context::background(), move |q| {
                async move {
                    q.add_account_balance(AddAccountBalanceParams { id, amount: 1 })
                        .await
                }
                .boxed()
            })
            .await
            .unwrap();
        assert_eq!(store.get_account(id).await.unwrap().balance, 101);
    }

    #[tokio::test]
    async fn test_create_account_validates_params() {
        let store = Store::new(MemoryStorage::new());
        let result = store
            .create_account(CreateAccountParams::new("", 0, "USD"))
            .await;
        assert!(matches!(result, Err(LedgerError::Validation(_))));
    }
}
