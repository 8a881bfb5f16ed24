//! PostgreSQL storage backend
//!
//! Balance updates are single `UPDATE ... SET balance = balance + $1`
//! statements, so the row lock is taken and the delta applied in one step.
//! Deadlocks and serialization failures reported by the server surface as
//! [`LedgerError::Deadlock`] and [`LedgerError::SerializationFailure`].

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use crate::config::DatabaseConfig;
use crate::context::Context;
use crate::traits::*;
use crate::types::*;

const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

const FOREIGN_KEY_VIOLATION: &str = "23503";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

fn map_db_error(err: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some(DEADLOCK_DETECTED) => return LedgerError::Deadlock(db.message().to_string()),
            Some(SERIALIZATION_FAILURE) => {
                return LedgerError::SerializationFailure(db.message().to_string())
            }
            _ => {}
        }
    }
    LedgerError::Storage(err.to_string())
}

/// Constraint name of the violated foreign key, if that is what failed
fn violated_foreign_key(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) => {
            Some(db.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

/// PostgreSQL-backed ledger storage
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a connection pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(map_db_error)?;

        tracing::info!(
            max_connections = config.max_connections,
            "PostgreSQL connection pool established"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the ledger tables if they do not exist yet
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStorage for PgStorage {
    type Tx = PgTransaction;

    async fn begin(&self, ctx: &Context) -> LedgerResult<PgTransaction> {
        ctx.check()?;
        let tx = tokio::select! {
            tx = self.pool.begin() => tx.map_err(map_db_error)?,
            reason = ctx.done() => return Err(reason),
        };
        Ok(PgTransaction { tx })
    }

    async fn create_account(&self, params: CreateAccountParams) -> LedgerResult<Account> {
        sqlx::query_as::<_, Account>(&format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(&params.owner)
        .bind(params.balance)
        .bind(&params.currency)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)
    }

    async fn get_account(&self, id: AccountId) -> LedgerResult<Account> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?
        .ok_or(LedgerError::AccountNotFound(id))
    }

    async fn get_entry(&self, id: EntryId) -> LedgerResult<Entry> {
        sqlx::query_as::<_, Entry>(&format!("SELECT {} FROM entries WHERE id = $1", ENTRY_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_error)?
            .ok_or(LedgerError::EntryNotFound(id))
    }

    async fn get_transfer(&self, id: TransferId) -> LedgerResult<Transfer> {
        sqlx::query_as::<_, Transfer>(&format!(
            "SELECT {} FROM transfers WHERE id = $1",
            TRANSFER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)?
        .ok_or(LedgerError::TransferNotFound(id))
    }

    async fn list_entries(
        &self,
        account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Entry>> {
        sqlx::query_as::<_, Entry>(&format!(
            "SELECT {} FROM entries WHERE account_id = $1 ORDER BY id LIMIT $2 OFFSET $3",
            ENTRY_COLUMNS
        ))
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)
    }

    async fn list_transfers(
        &self,
        from_account_id: AccountId,
        to_account_id: AccountId,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Transfer>> {
        sqlx::query_as::<_, Transfer>(&format!(
            "SELECT {} FROM transfers WHERE from_account_id = $1 OR to_account_id = $2 \
             ORDER BY id LIMIT $3 OFFSET $4",
            TRANSFER_COLUMNS
        ))
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_db_error)
    }
}

/// Open PostgreSQL transaction; rolled back by sqlx if dropped unfinished
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl Queries for PgTransaction {
    async fn create_transfer(&mut self, params: CreateTransferParams) -> LedgerResult<Transfer> {
        sqlx::query_as::<_, Transfer>(&format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) \
             VALUES ($1, $2, $3) RETURNING {}",
            TRANSFER_COLUMNS
        ))
        .bind(params.from_account_id)
        .bind(params.to_account_id)
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match violated_foreign_key(&e) {
            Some(constraint) if constraint.contains("from_account") => {
                LedgerError::AccountNotFound(params.from_account_id)
            }
            Some(_) => LedgerError::AccountNotFound(params.to_account_id),
            None => map_db_error(e),
        })
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> LedgerResult<Entry> {
        sqlx::query_as::<_, Entry>(&format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {}",
            ENTRY_COLUMNS
        ))
        .bind(params.account_id)
        .bind(params.amount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| match violated_foreign_key(&e) {
            Some(_) => LedgerError::AccountNotFound(params.account_id),
            None => map_db_error(e),
        })
    }

    async fn add_account_balance(
        &mut self,
        params: AddAccountBalanceParams,
    ) -> LedgerResult<Account> {
        sqlx::query_as::<_, Account>(&format!(
            "UPDATE accounts SET balance = balance + $1 WHERE id = $2 RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(params.amount)
        .bind(params.id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?
        .ok_or(LedgerError::AccountNotFound(params.id))
    }

    async fn get_account(&mut self, id: AccountId) -> LedgerResult<Account> {
        sqlx::query_as::<_, Account>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_db_error)?
        .ok_or(LedgerError::AccountNotFound(id))
    }
}

#[async_trait]
impl StorageTransaction for PgTransaction {
    async fn commit(self) -> LedgerResult<()> {
        self.tx.commit().await.map_err(map_db_error)
    }

    async fn rollback(self) -> LedgerResult<()> {
        self.tx.rollback().await.map_err(map_db_error)
    }
}
