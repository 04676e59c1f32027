//! PostgreSQL ledger store.
//!
//! A unit of work is one database transaction. The balance is read with
//! `SELECT ... FOR UPDATE`, so concurrent commands on the same balance queue behind each
//! other, and the update still checks `version` as a compare-and-swap.
//!
//! `processed_messages.message_id` is the primary key: a duplicate command racing past
//! the replay check fails on insert and is reported as [`StoreError::DuplicateMessage`].
//!
//! Schema: `banking/migrations/`.

use super::store::{LedgerStore, LedgerUnitOfWork, StoreError};
use crate::domain::{
    Account, AccountId, Balance, BalanceId, CountryCode, Currency, CustomerId, Direction,
    ProcessedMessage, Transaction, TransactionId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::types::Uuid;
use std::time::Duration;

type AccountRow = (Uuid, String, String, DateTime<Utc>, DateTime<Utc>);
type BalanceRow = (Uuid, Uuid, String, Decimal, i64, DateTime<Utc>);
type TransactionRow = (
    Uuid,
    Uuid,
    Uuid,
    Decimal,
    String,
    String,
    String,
    Decimal,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
);

const BALANCE_COLUMNS: &str = "id, account_id, currency, available, version, updated_at";

fn db_error(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

fn corrupt(what: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(what.to_string())
}

fn balance_from_row((id, account_id, currency, available, version, updated_at): BalanceRow) -> Result<Balance, StoreError> {
    Ok(Balance {
        id: BalanceId::from_uuid(id),
        account_id: AccountId::from_uuid(account_id),
        currency: currency.parse().map_err(corrupt)?,
        available,
        version,
        updated_at,
    })
}

fn transaction_from_row(row: TransactionRow) -> Result<Transaction, StoreError> {
    let (
        id,
        account_id,
        balance_id,
        amount,
        currency,
        direction,
        description,
        balance_after,
        status,
        idempotency_key,
        created_at,
        updated_at,
    ) = row;
    Ok(Transaction {
        id: TransactionId::from_uuid(id),
        account_id: AccountId::from_uuid(account_id),
        balance_id: BalanceId::from_uuid(balance_id),
        amount,
        currency: currency.parse().map_err(corrupt)?,
        direction: direction.parse::<Direction>().map_err(corrupt)?,
        description,
        balance_after,
        status: status.parse().map_err(corrupt)?,
        idempotency_key,
        created_at,
        updated_at,
    })
}

async fn load_account(conn: &mut PgConnection, id: AccountId) -> Result<Option<Account>, StoreError> {
    let row: Option<AccountRow> = sqlx::query_as(
        "SELECT id, customer_id, country, created_at, updated_at FROM accounts WHERE id = $1",
    )
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_error)?;

    let Some((id, customer_id, country, created_at, updated_at)) = row else {
        return Ok(None);
    };

    let balances: Vec<BalanceRow> = sqlx::query_as(&format!(
        "SELECT {BALANCE_COLUMNS} FROM balances WHERE account_id = $1 ORDER BY currency"
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(Some(Account {
        id: AccountId::from_uuid(id),
        customer_id: CustomerId::parse(&customer_id).map_err(corrupt)?,
        country: CountryCode::parse(&country).map_err(corrupt)?,
        balances: balances
            .into_iter()
            .map(balance_from_row)
            .collect::<Result<_, _>>()?,
        created_at,
        updated_at,
    }))
}

/// Ledger stored in PostgreSQL.
#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the database is unreachable.
    pub async fn connect(url: &str, max_connections: u32, connect_timeout: Duration) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await
            .map_err(db_error)?;
        Ok(Self::new(pool))
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, StoreError> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(Box::new(PostgresUnitOfWork { tx }))
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        load_account(&mut conn, id).await
    }

    async fn list_transactions(&self, id: AccountId) -> Result<Vec<Transaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            "SELECT id, account_id, balance_id, amount, currency, direction, description,
                    balance_after, status, idempotency_key, created_at, updated_at
             FROM transactions
             WHERE account_id = $1
             ORDER BY created_at, id",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(transaction_from_row).collect()
    }
}

struct PostgresUnitOfWork {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl LedgerUnitOfWork for PostgresUnitOfWork {
    async fn processed_message(&mut self, message_id: &str) -> Result<Option<ProcessedMessage>, StoreError> {
        let row: Option<(String, String, DateTime<Utc>, serde_json::Value)> = sqlx::query_as(
            "SELECT message_id, message_type, processed_at, result
             FROM processed_messages WHERE message_id = $1",
        )
        .bind(message_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        Ok(row.map(|(message_id, message_type, processed_at, result)| ProcessedMessage {
            message_id,
            message_type,
            processed_at,
            result,
        }))
    }

    async fn find_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        load_account(&mut self.tx, id).await
    }

    async fn lock_balance(&mut self, account_id: AccountId, currency: Currency) -> Result<Option<Balance>, StoreError> {
        let row: Option<BalanceRow> = sqlx::query_as(&format!(
            "SELECT {BALANCE_COLUMNS} FROM balances WHERE account_id = $1 AND currency = $2 FOR UPDATE"
        ))
        .bind(account_id.as_uuid())
        .bind(currency.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;

        row.map(balance_from_row).transpose()
    }

    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO accounts (id, customer_id, country, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(account.id.as_uuid())
        .bind(account.customer_id.as_str())
        .bind(account.country.as_str())
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn insert_balance(&mut self, balance: &Balance) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO balances (id, account_id, currency, available, version, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(balance.id.as_uuid())
        .bind(balance.account_id.as_uuid())
        .bind(balance.currency.as_str())
        .bind(balance.available)
        .bind(balance.version)
        .bind(balance.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn update_balance(&mut self, balance: &Balance, expected_version: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE balances SET available = $1, version = $2, updated_at = $3
             WHERE id = $4 AND version = $5",
        )
        .bind(balance.available)
        .bind(balance.version)
        .bind(balance.updated_at)
        .bind(balance.id.as_uuid())
        .bind(expected_version)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::VersionConflict {
                balance_id: balance.id.to_string(),
                expected: expected_version,
            });
        }
        Ok(())
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO transactions (id, account_id, balance_id, amount, currency, direction,
                                       description, balance_after, status, idempotency_key,
                                       created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.account_id.as_uuid())
        .bind(transaction.balance_id.as_uuid())
        .bind(transaction.amount)
        .bind(transaction.currency.as_str())
        .bind(transaction.direction.as_str())
        .bind(&transaction.description)
        .bind(transaction.balance_after)
        .bind(transaction.status.as_str())
        .bind(&transaction.idempotency_key)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::DuplicateMessage(transaction.idempotency_key.clone())
            },
            other => db_error(other),
        })?;
        Ok(())
    }

    async fn insert_processed(&mut self, message: &ProcessedMessage) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO processed_messages (message_id, message_type, processed_at, result)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (message_id) DO NOTHING",
        )
        .bind(&message.message_id)
        .bind(&message.message_type)
        .bind(message.processed_at)
        .bind(&message.result)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateMessage(message.message_id.clone()));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(db_error)
    }
}
