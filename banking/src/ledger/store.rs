//! Storage contract for the ledger.
//!
//! Every mutation runs inside a [`LedgerUnitOfWork`]: reads and writes see one
//! consistent snapshot and become visible together on [`LedgerUnitOfWork::commit`].
//! Dropping a unit of work without committing discards it.

use crate::domain::{Account, AccountId, Balance, Currency, ProcessedMessage, Transaction};
use async_trait::async_trait;
use thiserror::Error;

/// Storage failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A processed-message record (or transaction) already exists for this key.
    #[error("Message '{0}' was already processed")]
    DuplicateMessage(String),

    /// The balance version moved since it was read.
    #[error("Balance {balance_id} is no longer at version {expected}")]
    VersionConflict {
        /// Balance that was updated.
        balance_id: String,
        /// Version the update expected.
        expected: i64,
    },

    /// A stored row could not be mapped back to the domain.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// The database failed.
    #[error("Database error: {0}")]
    Database(String),
}

/// Entry point to ledger storage.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Start a unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the storage cannot start one.
    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, StoreError>;

    /// Account with its balances, outside any unit of work.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Transactions of an account, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    async fn list_transactions(&self, id: AccountId) -> Result<Vec<Transaction>, StoreError>;
}

/// One atomic unit of ledger work.
#[async_trait]
pub trait LedgerUnitOfWork: Send {
    /// Processed-message record for `message_id`, if the command was handled already.
    async fn processed_message(&mut self, message_id: &str) -> Result<Option<ProcessedMessage>, StoreError>;

    /// Account with its balances.
    async fn find_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// The balance for `(account, currency)`, locked until the unit of work ends.
    async fn lock_balance(&mut self, account_id: AccountId, currency: Currency) -> Result<Option<Balance>, StoreError>;

    /// Insert an account row (balances are inserted separately).
    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError>;

    /// Insert a balance row.
    async fn insert_balance(&mut self, balance: &Balance) -> Result<(), StoreError>;

    /// Overwrite a balance if it is still at `expected_version`.
    ///
    /// Fails with [`StoreError::VersionConflict`] otherwise.
    async fn update_balance(&mut self, balance: &Balance, expected_version: i64) -> Result<(), StoreError>;

    /// Insert a transaction row.
    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError>;

    /// Insert the processed-message record.
    ///
    /// Fails with [`StoreError::DuplicateMessage`] if one exists for the same id.
    async fn insert_processed(&mut self, message: &ProcessedMessage) -> Result<(), StoreError>;

    /// Make every write of this unit of work visible.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
