//! In-memory ledger store for tests and local runs.
//!
//! A unit of work holds the store's mutex for its whole life, so units of work run one
//! at a time. It works on a copy of the ledger that replaces the shared state on commit.

use super::store::{LedgerStore, LedgerUnitOfWork, StoreError};
use crate::domain::{Account, AccountId, Balance, BalanceId, Currency, ProcessedMessage, Transaction};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    accounts: HashMap<AccountId, Account>,
    balances: HashMap<BalanceId, Balance>,
    transactions: Vec<Transaction>,
    processed: HashMap<String, ProcessedMessage>,
}

impl LedgerState {
    fn account(&self, id: AccountId) -> Option<Account> {
        let mut account = self.accounts.get(&id)?.clone();
        let mut balances: Vec<Balance> = self
            .balances
            .values()
            .filter(|b| b.account_id == id)
            .cloned()
            .collect();
        balances.sort_by_key(|b| b.currency);
        account.balances = balances;
        Some(account)
    }
}

/// Ledger held in process memory.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
}

impl InMemoryLedgerStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transaction rows.
    pub async fn transaction_count(&self) -> usize {
        self.state.lock().await.transactions.len()
    }

    /// Number of processed-message records.
    pub async fn processed_count(&self) -> usize {
        self.state.lock().await.processed.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerUnitOfWork>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork { guard, working }))
    }

    async fn find_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.state.lock().await.account(id))
    }

    async fn list_transactions(&self, id: AccountId) -> Result<Vec<Transaction>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .transactions
            .iter()
            .filter(|t| t.account_id == id)
            .cloned()
            .collect())
    }
}

struct MemoryUnitOfWork {
    guard: OwnedMutexGuard<LedgerState>,
    working: LedgerState,
}

#[async_trait]
impl LedgerUnitOfWork for MemoryUnitOfWork {
    async fn processed_message(&mut self, message_id: &str) -> Result<Option<ProcessedMessage>, StoreError> {
        Ok(self.working.processed.get(message_id).cloned())
    }

    async fn find_account(&mut self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.working.account(id))
    }

    async fn lock_balance(&mut self, account_id: AccountId, currency: Currency) -> Result<Option<Balance>, StoreError> {
        Ok(self
            .working
            .balances
            .values()
            .find(|b| b.account_id == account_id && b.currency == currency)
            .cloned())
    }

    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError> {
        let row = Account {
            balances: Vec::new(),
            ..account.clone()
        };
        self.working.accounts.insert(account.id, row);
        Ok(())
    }

    async fn insert_balance(&mut self, balance: &Balance) -> Result<(), StoreError> {
        self.working.balances.insert(balance.id, balance.clone());
        Ok(())
    }

    async fn update_balance(&mut self, balance: &Balance, expected_version: i64) -> Result<(), StoreError> {
        match self.working.balances.get_mut(&balance.id) {
            Some(current) if current.version == expected_version => {
                *current = balance.clone();
                Ok(())
            },
            _ => Err(StoreError::VersionConflict {
                balance_id: balance.id.to_string(),
                expected: expected_version,
            }),
        }
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        if self
            .working
            .transactions
            .iter()
            .any(|t| t.idempotency_key == transaction.idempotency_key)
        {
            return Err(StoreError::DuplicateMessage(transaction.idempotency_key.clone()));
        }
        self.working.transactions.push(transaction.clone());
        Ok(())
    }

    async fn insert_processed(&mut self, message: &ProcessedMessage) -> Result<(), StoreError> {
        if self.working.processed.contains_key(&message.message_id) {
            return Err(StoreError::DuplicateMessage(message.message_id.clone()));
        }
        self.working
            .processed
            .insert(message.message_id.clone(), message.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}
