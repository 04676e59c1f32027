//! Ledger engine: applies commands to the ledger exactly once per idempotency key.
//!
//! # Applying a transaction
//!
//! Inside one unit of work:
//!
//! 1. A processed-message record for the key means replay: return the stored result
//! 2. Find the account, then lock its balance in the command's currency
//! 3. Compute the new balance ([`Balance::apply`] refuses overdrafts)
//! 4. Compare-and-swap the balance on its version
//! 5. Insert the transaction (`COMPLETED`) and the processed-message record
//! 6. Commit
//!
//! Any failure drops the unit of work, so nothing is written, including the
//! processed-message record: a rejected command can be retried. A duplicate that races
//! past step 1 is caught by the processed-message key and answered as a replay.
//!
//! A key recorded for one request type and reused for the other is a validation
//! error, never a replay.

use super::store::{LedgerStore, LedgerUnitOfWork, StoreError};
use crate::domain::{
    Account, AccountId, Balance, Currency, DomainError, MAX_DESCRIPTION_LEN, ProcessedMessage,
    Transaction, TransactionId, TransactionStatus, money,
};
use crate::messages::{
    ACCOUNT_CREATE, CreateAccountCommand, CreateTransactionCommand, ErrorCode, TRANSACTION_CREATE,
};
use ledger_bridge_core::environment::Clock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Why the ledger refused a command.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The command itself is invalid.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No such account.
    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    /// The account holds no balance in the currency.
    #[error("Account {account_id} has no {currency} balance")]
    CurrencyNotFound {
        /// Account addressed.
        account_id: AccountId,
        /// Currency requested.
        currency: Currency,
    },

    /// Debit larger than the available amount.
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Amount on the balance.
        available: rust_decimal::Decimal,
        /// Amount requested.
        requested: rust_decimal::Decimal,
    },

    /// The balance changed between read and write.
    #[error("Balance was modified concurrently, retry the request")]
    ConcurrentModification,

    /// Storage failure.
    #[error("Ledger storage failed: {0}")]
    Store(StoreError),
}

impl LedgerError {
    /// Code carried on the failure channel.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationFailed,
            Self::AccountNotFound(_) => ErrorCode::AccountNotFound,
            Self::CurrencyNotFound { .. } => ErrorCode::CurrencyNotFound,
            Self::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            Self::ConcurrentModification => ErrorCode::ConcurrentModification,
            Self::Store(_) => ErrorCode::InternalError,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } => Self::ConcurrentModification,
            other => Self::Store(other),
        }
    }
}

impl From<DomainError> for LedgerError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InsufficientFunds {
                available,
                requested,
            } => Self::InsufficientFunds {
                available,
                requested,
            },
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Result of applying a command, and whether it was a replay of an earlier one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOutcome<T> {
    /// The result.
    pub value: T,
    /// `true` when the command had been applied before and nothing changed now.
    pub replayed: bool,
}

/// A transaction together with the balance it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedTransaction {
    /// The transaction row.
    pub transaction: Transaction,
    /// The balance after it.
    pub balance: Balance,
}

/// Applies account and transaction commands.
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl LedgerEngine {
    /// Create an engine over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Open an account with zero balances, once per `message_id`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`] for an empty or repeated currency list,
    /// [`LedgerError::Store`] on storage failure.
    pub async fn open_account(
        &self,
        command: &CreateAccountCommand,
        message_id: &str,
    ) -> Result<LedgerOutcome<Account>, LedgerError> {
        match self.try_open_account(command, message_id).await {
            Err(LedgerError::Store(StoreError::DuplicateMessage(_))) => {
                self.replay_committed(message_id, ACCOUNT_CREATE).await
            },
            other => other,
        }
    }

    async fn try_open_account(
        &self,
        command: &CreateAccountCommand,
        message_id: &str,
    ) -> Result<LedgerOutcome<Account>, LedgerError> {
        let mut uow = self.store.begin().await?;
        if let Some(outcome) = replay(uow.as_mut(), message_id, ACCOUNT_CREATE).await? {
            return Ok(outcome);
        }

        let now = self.clock.now();
        let account = Account::open(
            command.customer_id.clone(),
            command.country.clone(),
            &command.currencies,
            now,
        )?;

        uow.insert_account(&account).await?;
        for balance in &account.balances {
            uow.insert_balance(balance).await?;
        }
        uow.insert_processed(&processed(message_id, ACCOUNT_CREATE, now, &account)?)
            .await?;
        uow.commit().await?;

        info!(account_id = %account.id, message_id, "Account opened");
        Ok(LedgerOutcome {
            value: account,
            replayed: false,
        })
    }

    /// Apply a transaction, once per `idempotency_key`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`], [`LedgerError::AccountNotFound`],
    /// [`LedgerError::CurrencyNotFound`], [`LedgerError::InsufficientFunds`],
    /// [`LedgerError::ConcurrentModification`] or [`LedgerError::Store`]; none of them
    /// leaves a trace in storage.
    pub async fn apply_transaction(
        &self,
        command: &CreateTransactionCommand,
        idempotency_key: &str,
    ) -> Result<LedgerOutcome<AppliedTransaction>, LedgerError> {
        match self.try_apply_transaction(command, idempotency_key).await {
            Err(LedgerError::Store(StoreError::DuplicateMessage(_))) => {
                self.replay_committed(idempotency_key, TRANSACTION_CREATE).await
            },
            other => other,
        }
    }

    async fn try_apply_transaction(
        &self,
        command: &CreateTransactionCommand,
        idempotency_key: &str,
    ) -> Result<LedgerOutcome<AppliedTransaction>, LedgerError> {
        let amount = money::validate_amount(command.amount)?;
        if command.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(DomainError::DescriptionTooLong.into());
        }

        let mut uow = self.store.begin().await?;
        if let Some(outcome) = replay(uow.as_mut(), idempotency_key, TRANSACTION_CREATE).await? {
            return Ok(outcome);
        }

        if uow.find_account(command.account_id).await?.is_none() {
            return Err(LedgerError::AccountNotFound(command.account_id));
        }
        let current = uow
            .lock_balance(command.account_id, command.currency)
            .await?
            .ok_or(LedgerError::CurrencyNotFound {
                account_id: command.account_id,
                currency: command.currency,
            })?;

        let now = self.clock.now();
        let balance = current.apply(command.direction, amount, now)?;
        uow.update_balance(&balance, current.version).await?;

        let transaction = Transaction {
            id: TransactionId::new(),
            account_id: command.account_id,
            balance_id: balance.id,
            amount,
            currency: command.currency,
            direction: command.direction,
            description: command.description.clone(),
            balance_after: balance.available,
            status: TransactionStatus::Completed,
            idempotency_key: idempotency_key.to_string(),
            created_at: now,
            updated_at: now,
        };
        uow.insert_transaction(&transaction).await?;

        let applied = AppliedTransaction {
            transaction,
            balance,
        };
        uow.insert_processed(&processed(idempotency_key, TRANSACTION_CREATE, now, &applied)?)
            .await?;
        uow.commit().await?;

        info!(
            transaction_id = %applied.transaction.id,
            account_id = %command.account_id,
            direction = %command.direction,
            amount = %amount,
            balance_after = %applied.balance.available,
            version = applied.balance.version,
            "Transaction applied"
        );
        Ok(LedgerOutcome {
            value: applied,
            replayed: false,
        })
    }

    async fn replay_committed<T: DeserializeOwned>(
        &self,
        message_id: &str,
        message_type: &str,
    ) -> Result<LedgerOutcome<T>, LedgerError> {
        let mut uow = self.store.begin().await?;
        replay(uow.as_mut(), message_id, message_type).await?.ok_or_else(|| {
            LedgerError::Store(StoreError::Corrupt(format!(
                "duplicate reported for '{message_id}' but no processed record exists"
            )))
        })
    }
}

/// Stored result for `message_id`, decoded as `T`.
///
/// A record stored under another request type refuses the command.
async fn replay<T: DeserializeOwned>(
    uow: &mut dyn LedgerUnitOfWork,
    message_id: &str,
    message_type: &str,
) -> Result<Option<LedgerOutcome<T>>, LedgerError> {
    let Some(record) = uow.processed_message(message_id).await? else {
        return Ok(None);
    };
    if record.message_type != message_type {
        return Err(LedgerError::Validation(format!(
            "Idempotency key '{message_id}' was already used for {}",
            record.message_type
        )));
    }
    debug!(message_id, message_type = %record.message_type, "Replaying processed message");
    let value = serde_json::from_value(record.result)
        .map_err(|e| LedgerError::Store(StoreError::Corrupt(e.to_string())))?;
    Ok(Some(LedgerOutcome {
        value,
        replayed: true,
    }))
}

fn processed<T: Serialize>(
    message_id: &str,
    message_type: &str,
    now: chrono::DateTime<chrono::Utc>,
    result: &T,
) -> Result<ProcessedMessage, LedgerError> {
    Ok(ProcessedMessage {
        message_id: message_id.to_string(),
        message_type: message_type.to_string(),
        processed_at: now,
        result: serde_json::to_value(result)
            .map_err(|e| LedgerError::Store(StoreError::Corrupt(e.to_string())))?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::domain::{CountryCode, CustomerId, Direction};
    use crate::ledger::InMemoryLedgerStore;
    use ledger_bridge_testing::test_clock;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Fixture {
        engine: LedgerEngine,
        store: InMemoryLedgerStore,
    }

    fn fixture() -> Fixture {
        let store = InMemoryLedgerStore::new();
        Fixture {
            engine: LedgerEngine::new(Arc::new(store.clone()), Arc::new(test_clock())),
            store,
        }
    }

    fn open_command() -> CreateAccountCommand {
        CreateAccountCommand {
            customer_id: CustomerId::parse("CUST1").unwrap(),
            country: CountryCode::parse("EE").unwrap(),
            currencies: vec![Currency::Eur],
        }
    }

    fn tx(account_id: AccountId, direction: Direction, amount: Decimal) -> CreateTransactionCommand {
        CreateTransactionCommand {
            account_id,
            amount,
            currency: Currency::Eur,
            direction,
            description: "test".to_string(),
        }
    }

    async fn open(f: &Fixture) -> AccountId {
        f.engine.open_account(&open_command(), "open-1").await.unwrap().value.id
    }

    #[tokio::test]
    async fn open_account_is_idempotent() {
        let f = fixture();
        let first = f.engine.open_account(&open_command(), "open-1").await.unwrap();
        let second = f.engine.open_account(&open_command(), "open-1").await.unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.value, second.value);
        assert_eq!(first.value.balances[0].available.to_string(), "0.00");
        assert_eq!(first.value.balances[0].version, 1);
    }

    #[tokio::test]
    async fn credit_then_overdraft_leaves_balance_untouched() {
        let f = fixture();
        let account_id = open(&f).await;

        let credit = f
            .engine
            .apply_transaction(&tx(account_id, Direction::In, dec!(100.00)), "tx-1")
            .await
            .unwrap()
            .value;
        assert_eq!(credit.balance.available, dec!(100.00));
        assert_eq!(credit.balance.version, 2);
        assert_eq!(credit.transaction.status, TransactionStatus::Completed);
        assert_eq!(credit.transaction.balance_after, dec!(100.00));

        let err = f
            .engine
            .apply_transaction(&tx(account_id, Direction::Out, dec!(150.00)), "tx-2")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::InsufficientFunds);

        let account = f.store.find_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.balances[0].available, dec!(100.00));
        assert_eq!(account.balances[0].version, 2);
        assert_eq!(f.store.transaction_count().await, 1);
    }

    #[tokio::test]
    async fn replayed_transaction_is_not_applied_twice() {
        let f = fixture();
        let account_id = open(&f).await;
        let command = tx(account_id, Direction::In, dec!(10.00));

        let first = f.engine.apply_transaction(&command, "tx-1").await.unwrap();
        let second = f.engine.apply_transaction(&command, "tx-1").await.unwrap();

        assert!(second.replayed);
        assert_eq!(first.value, second.value);
        assert_eq!(f.store.transaction_count().await, 1);
    }

    #[tokio::test]
    async fn rejected_command_leaves_no_processed_record() {
        let f = fixture();
        let account_id = open(&f).await;

        f.engine
            .apply_transaction(&tx(account_id, Direction::Out, dec!(1.00)), "tx-1")
            .await
            .unwrap_err();
        assert_eq!(f.store.processed_count().await, 1);

        f.engine
            .apply_transaction(&tx(account_id, Direction::In, dec!(1.00)), "tx-1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_account_and_currency_are_distinguished() {
        let f = fixture();
        let account_id = open(&f).await;

        let missing = f
            .engine
            .apply_transaction(&tx(AccountId::new(), Direction::In, dec!(1)), "a")
            .await
            .unwrap_err();
        assert_eq!(missing.error_code(), ErrorCode::AccountNotFound);

        let usd = CreateTransactionCommand {
            currency: Currency::Usd,
            ..tx(account_id, Direction::In, dec!(1))
        };
        let no_currency = f.engine.apply_transaction(&usd, "b").await.unwrap_err();
        assert_eq!(no_currency.error_code(), ErrorCode::CurrencyNotFound);
    }

    #[tokio::test]
    async fn invalid_amounts_are_validation_errors() {
        let f = fixture();
        let account_id = open(&f).await;

        for amount in [dec!(0), dec!(-5), dec!(1.005)] {
            let err = f
                .engine
                .apply_transaction(&tx(account_id, Direction::In, amount), "bad")
                .await
                .unwrap_err();
            assert_eq!(err.error_code(), ErrorCode::ValidationFailed);
        }
    }

    #[tokio::test]
    async fn oversized_amounts_are_refused_without_writing() {
        let f = fixture();
        let account_id = open(&f).await;
        f.engine
            .apply_transaction(&tx(account_id, Direction::In, dec!(99999999999999999.00)), "fill")
            .await
            .unwrap();

        let too_big = f
            .engine
            .apply_transaction(&tx(account_id, Direction::In, Decimal::MAX), "huge")
            .await
            .unwrap_err();
        assert_eq!(too_big.error_code(), ErrorCode::ValidationFailed);

        let past_limit = f
            .engine
            .apply_transaction(&tx(account_id, Direction::In, dec!(1.00)), "over")
            .await
            .unwrap_err();
        assert_eq!(past_limit.error_code(), ErrorCode::ValidationFailed);

        let account = f.store.find_account(account_id).await.unwrap().unwrap();
        assert_eq!(account.balances[0].available, dec!(99999999999999999.00));
        assert_eq!(account.balances[0].version, 2);

        let debit = f
            .engine
            .apply_transaction(&tx(account_id, Direction::Out, dec!(1.00)), "after")
            .await
            .unwrap();
        assert_eq!(debit.value.balance.version, 3);
    }

    #[tokio::test]
    async fn account_key_reused_for_a_transaction_is_refused() {
        let f = fixture();
        let account_id = open(&f).await;

        let err = f
            .engine
            .apply_transaction(&tx(account_id, Direction::In, dec!(5.00)), "open-1")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::Validation("Idempotency key 'open-1' was already used for ACCOUNT_CREATE".to_string())
        );
        assert_eq!(f.store.transaction_count().await, 0);
    }

    #[tokio::test]
    async fn transaction_key_reused_for_an_account_is_refused() {
        let f = fixture();
        let account_id = open(&f).await;
        f.engine
            .apply_transaction(&tx(account_id, Direction::In, dec!(5.00)), "tx-1")
            .await
            .unwrap();

        let err = f.engine.open_account(&open_command(), "tx-1").await.unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::ValidationFailed);
        assert!(err.to_string().contains("TRANSACTION_CREATE"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_debits_never_overdraw() {
        let f = fixture();
        let account_id = open(&f).await;
        f.engine
            .apply_transaction(&tx(account_id, Direction::In, dec!(100.00)), "fund")
            .await
            .unwrap();

        let engine = Arc::new(f.engine);
        let debits = (0..20).map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                engine
                    .apply_transaction(&tx(account_id, Direction::Out, dec!(15.00)), &format!("debit-{i}"))
                    .await
            })
        });
        let results = futures::future::join_all(debits).await;

        let mut accepted = 0_i64;
        for result in results {
            match result.unwrap() {
                Ok(_) => accepted += 1,
                Err(err) => assert!(matches!(
                    err,
                    LedgerError::InsufficientFunds { .. } | LedgerError::ConcurrentModification
                )),
            }
        }

        let account = f.store.find_account(account_id).await.unwrap().unwrap();
        let balance = &account.balances[0];
        assert!(Decimal::from(accepted) * dec!(15.00) <= dec!(100.00));
        assert_eq!(balance.available, dec!(100.00) - Decimal::from(accepted) * dec!(15.00));
        assert!(balance.available >= Decimal::ZERO);
        assert_eq!(balance.version, 2 + accepted);
        assert_eq!(f.store.transaction_count().await, 1 + usize::try_from(accepted).unwrap());
    }

    #[test]
    fn version_conflict_maps_to_concurrent_modification() {
        let err = LedgerError::from(StoreError::VersionConflict {
            balance_id: "b".to_string(),
            expected: 3,
        });
        assert_eq!(err, LedgerError::ConcurrentModification);
        assert_eq!(err.error_code(), ErrorCode::ConcurrentModification);
    }
}
