//! Traits for storage abstraction
//!
//! The ledger only needs a store offering atomic commit/rollback and
//! row-level locking. Anything that can do that (PostgreSQL, the in-memory
//! store in [`crate::utils::memory_storage`], a test double) plugs in by
//! implementing these traits.

use async_trait::async_trait;

use crate::context::Context;
use crate::types::*;

/// Record access bound to one open transaction.
///
/// A fresh value is handed to each unit of work; it must not outlive the
/// transaction it was created for.
#[async_trait]
pub trait Queries: Send {
    /// Insert a transfer record
    async fn create_transfer(&mut self, params: CreateTransferParams) -> LedgerResult<Transfer>;

    /// Insert a single ledger entry
    async fn create_entry(&mut self, params: CreateEntryParams) -> LedgerResult<Entry>;

    /// Atomically add a signed delta to an account balance.
    ///
    /// Takes the row lock for the account (held until the transaction ends)
    /// and returns the row as it now reads inside this transaction.
    async fn add_account_balance(&mut self, params: AddAccountBalanceParams)
        -> LedgerResult<Account>;

    /// Read an account as seen by this transaction
    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account>;
}

/// An open transaction.
///
/// Both `commit` and `rollback` consume the handle. Dropping a handle that
/// was never finished must release its locks and discard its writes.
#[async_trait]
pub trait StorageTransaction: Queries + Sized {
    async fn commit(self) -> LedgerResult<()>;

    async fn rollback(self) -> LedgerResult<()>;
}

/// Storage backend for the ledger
#[async_trait]
pub trait LedgerStorage: Send + Sync + Clone {
    type Tx: StorageTransaction + 'static;

    /// Open a new transaction. Implementations honor `ctx` while waiting.
    async fn begin(&self, ctx: &Context) -> LedgerResult<Self::Tx>;

    /// Insert an account outside of any caller transaction
    async fn create_account(&self, params: CreateAccountParams) -> LedgerResult<Account>;

    /// Get committed account state by ID
    async fn get_account(&self, id: AccountId) -> LedgerResult<Account>;

    /// Get an entry by ID
    async fn get_entry(&self, id: EntryId) -> LedgerResult<Entry>;

    /// Get a transfer by ID
    async fn get_transfer(&self, id: TransferId) -> LedgerResult<Transfer>;

    /// List entries of one account, ordered by ID
    async fn list_entries(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Entry>>;

    /// List transfers where `from` or `to` matches, ordered by ID
    async fn list_transfers(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Transfer>>;
}
