//! Core types and data structures for the ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage-assigned account identifier
pub type AccountId = i64;
/// Storage-assigned entry identifier
pub type EntryId = i64;
/// Storage-assigned transfer identifier
pub type TransferId = i64;

/// A customer account holding a balance in minor currency units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Account {
    /// Unique identifier assigned by storage
    pub id: AccountId,
    /// Owner label
    pub owner: String,
    /// Current balance in minor units (cents)
    pub balance: i64,
    /// ISO currency code
    pub currency: String,
    /// When the account was created
    pub created_at: DateTime<Utc>,
}

/// A single signed ledger line against one account.
///
/// Negative amounts are debits, positive amounts credits. Entries are
/// immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Entry {
    pub id: EntryId,
    pub account_id: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Record of moving a fixed positive amount from one account to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct Transfer {
    pub id: TransferId,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Parameters for opening a new account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    pub balance: i64,
    pub currency: String,
}

impl CreateAccountParams {
    /// Create account parameters
    pub fn new(owner: impl Into<String>, balance: i64, currency: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            balance,
            currency: currency.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransferParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntryParams {
    pub account_id: AccountId,
    pub amount: i64,
}

/// Signed delta applied to one account's balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAccountBalanceParams {
    pub id: AccountId,
    pub amount: i64,
}

/// Input of the transfer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxParams {
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: i64,
}

impl TransferTxParams {
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: i64) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }
}

/// Everything a successful transfer created or changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    /// Source account after the debit
    pub from_account: Account,
    /// Destination account after the credit
    pub to_account: Account,
}

/// Errors that can occur in the ledger system
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),
    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),
    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Insufficient funds in account {account_id}: balance would be {balance}")]
    InsufficientFunds { account_id: AccountId, balance: i64 },
    #[error("Timed out waiting for row lock on account {0}")]
    LockTimeout(AccountId),
    #[error("Deadlock detected: {0}")]
    Deadlock(String),
    #[error("Serialization failure: {0}")]
    SerializationFailure(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Deadline exceeded")]
    DeadlineExceeded,
    /// The unit of work failed and rolling it back failed too; the state of
    /// the transaction is unknown to the caller.
    #[error("tx err: {source}, rb err: {rollback}")]
    Rollback {
        source: Box<LedgerError>,
        rollback: Box<LedgerError>,
    },
    /// Commit did not succeed; the work is not guaranteed to be applied.
    #[error("Commit failed: {0}")]
    Commit(Box<LedgerError>),
}

impl LedgerError {
    /// Whether the failure was a transient conflict with a concurrent
    /// transaction.
    ///
    /// The ledger never retries on its own. Callers that want retries can
    /// key their policy on this, keeping in mind that a transfer carries no
    /// idempotency key.
    pub fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Deadlock(_)
            | LedgerError::SerializationFailure(_)
            | LedgerError::LockTimeout(_) => true,
            LedgerError::Rollback { .. } => false,
            LedgerError::Commit(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_error_reports_both_failures() {
        let err = LedgerError::Rollback {
            source: Box::new(LedgerError::AccountNotFound(7)),
            rollback: Box::new(LedgerError::Storage("connection reset".to_string())),
        };

        assert_eq!(
            err.to_string(),
            "tx err: Account not found: 7, rb err: Storage error: connection reset"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LedgerError::Deadlock("40P01".to_string()).is_retryable());
        assert!(LedgerError::LockTimeout(1).is_retryable());
        assert!(LedgerError::Commit(Box::new(LedgerError::SerializationFailure(
            "40001".to_string()
        )))
        .is_retryable());
        assert!(!LedgerError::Cancelled.is_retryable());
        assert!(!LedgerError::Validation("bad".to_string()).is_retryable());
    }

    #[test]
    fn test_transfer_result_json_field_names() {
        let now = Utc::now();
        let transfer = Transfer {
            id: 1,
            from_account_id: 2,
            to_account_id: 3,
            amount: 10,
            created_at: now,
        };

        let json = serde_json::to_value(&transfer).unwrap();
        assert_eq!(json["from_account_id"], 2);
        assert_eq!(json["to_account_id"], 3);
        assert_eq!(json["amount"], 10);
    }
}
