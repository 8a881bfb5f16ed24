//! # Bank Ledger
//!
//! Transactional core of a ledger service. Moves funds between two
//! accounts by recording a transfer, two offsetting entries and two balance
//! updates in one storage transaction, and stays correct under any number of
//! concurrent transfers, including transfers between the same accounts in
//! opposite directions.
//!
//! ## Features
//!
//! - **Scoped transactions**: [`Store::exec_tx`] commits a unit of work
//!   entirely or rolls it back entirely, reporting rollback failures
//!   alongside the original error
//! - **Deadlock-free transfers**: account rows are always locked in
//!   ascending ID order ([`lock_order`])
//! - **Cancellation**: a [`Context`] carries cancellation and deadlines into
//!   every transaction
//! - **Storage abstraction**: any store with transactions and row locks
//!   plugs in through [`LedgerStorage`]; an in-memory store ships for tests
//!   and a PostgreSQL store behind the `postgres` feature
//!
//! ## Quick Start
//!
//! ```rust
//! use bank_ledger::{CreateAccountParams, MemoryStorage, Store};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = Store::new(MemoryStorage::new());
//! let x = store.create_account(CreateAccountParams::new("alice", 100, "USD")).await?;
//! let y = store.create_account(CreateAccountParams::new("bob", 50, "USD")).await?;
//!
//! let result = store.transfer_money(x.id, y.id, 10).await?;
//! assert_eq!(result.from_account.balance, 90);
//! assert_eq!(result.to_account.balance, 60);
//! # Ok::<(), bank_ledger::LedgerError>(())
//! # }).unwrap();
//! ```

pub mod config;
pub mod context;
pub mod ledger;
pub mod logging;
#[cfg(feature = "postgres")]
pub mod postgres_storage;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use context::*;
pub use ledger::*;
pub use traits::*;
pub use types::*;
pub use utils::memory_storage::MemoryStorage;

#[cfg(feature = "postgres")]
pub use postgres_storage::{PgStorage, PgTransaction};
