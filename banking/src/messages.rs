//! Commands and outcome events exchanged over the broker.
//!
//! ```text
//! API ── CreateTransaction.v1 ──▶ transactions.events.created ──▶ ledger
//! API ◀── TransactionCompleted.v1 ── transactions.events.completed ◀── ledger
//! API ◀── CommandRejected.v1 ──── transactions.events.failed ◀──── ledger
//! ```
//!
//! Correlation travels in [`EventMetadata`](ledger_bridge_core::event::EventMetadata),
//! never in the bodies.

use crate::domain::{
    Account, AccountId, Balance, CountryCode, Currency, CustomerId, Direction, Transaction,
};
use chrono::{DateTime, Utc};
use ledger_bridge_core::event::Event;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event type of [`CreateAccountCommand`].
pub const CREATE_ACCOUNT: &str = "CreateAccount.v1";
/// Event type of [`CreateTransactionCommand`].
pub const CREATE_TRANSACTION: &str = "CreateTransaction.v1";
/// Event type of [`AccountCreated`].
pub const ACCOUNT_CREATED: &str = "AccountCreated.v1";
/// Event type of [`TransactionCompleted`].
pub const TRANSACTION_COMPLETED: &str = "TransactionCompleted.v1";
/// Event type of [`ErrorNotification`].
pub const COMMAND_REJECTED: &str = "CommandRejected.v1";

/// Request-type tag for account creation.
pub const ACCOUNT_CREATE: &str = "ACCOUNT_CREATE";
/// Request-type tag for transaction creation.
pub const TRANSACTION_CREATE: &str = "TRANSACTION_CREATE";

/// Open an account with zero balances in the listed currencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountCommand {
    /// Owning customer.
    pub customer_id: CustomerId,
    /// Country of the account.
    pub country: CountryCode,
    /// Currencies to open balances in.
    pub currencies: Vec<Currency>,
}

impl Event for CreateAccountCommand {
    fn event_type(&self) -> &'static str {
        CREATE_ACCOUNT
    }
}

/// Move money on one balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransactionCommand {
    /// Account to move.
    pub account_id: AccountId,
    /// Positive amount, at most two decimals.
    pub amount: Decimal,
    /// Balance currency.
    pub currency: Currency,
    /// Credit or debit.
    pub direction: Direction,
    /// Free text.
    pub description: String,
}

impl Event for CreateTransactionCommand {
    fn event_type(&self) -> &'static str {
        CREATE_TRANSACTION
    }
}

/// Success outcome of [`CreateAccountCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCreated {
    /// The account with its opening balances.
    pub account: Account,
}

impl Event for AccountCreated {
    fn event_type(&self) -> &'static str {
        ACCOUNT_CREATED
    }
}

/// Success outcome of [`CreateTransactionCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionCompleted {
    /// The transaction record.
    pub transaction: Transaction,
    /// The balance after the transaction.
    pub balance: Balance,
}

impl Event for TransactionCompleted {
    fn event_type(&self) -> &'static str {
        TRANSACTION_COMPLETED
    }
}

/// Closed set of business error codes carried on the failure channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Command failed validation.
    ValidationFailed,
    /// No such account.
    AccountNotFound,
    /// Account has no balance in the currency.
    CurrencyNotFound,
    /// Debit larger than the available amount.
    InsufficientFunds,
    /// Balance changed underneath the command.
    ConcurrentModification,
    /// Infrastructure failure on the ledger side.
    InternalError,
}

impl ErrorCode {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::AccountNotFound => "ACCOUNT_NOT_FOUND",
            Self::CurrencyNotFound => "CURRENCY_NOT_FOUND",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::ConcurrentModification => "CONCURRENT_MODIFICATION",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure outcome of any command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotification {
    /// What went wrong.
    pub error_code: ErrorCode,
    /// Human-readable detail.
    pub error_message: String,
    /// Request id of the failed command.
    pub request_id: Option<String>,
    /// When the failure was detected.
    pub timestamp: DateTime<Utc>,
}

impl Event for ErrorNotification {
    fn event_type(&self) -> &'static str {
        COMMAND_REJECTED
    }
}

/// Broker routing keys for both domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingKeys {
    /// Account commands.
    pub account_commands: String,
    /// Account success outcomes.
    pub account_completed: String,
    /// Account failure outcomes.
    pub account_failed: String,
    /// Transaction commands.
    pub transaction_commands: String,
    /// Transaction success outcomes.
    pub transaction_completed: String,
    /// Transaction failure outcomes.
    pub transaction_failed: String,
}

impl Default for RoutingKeys {
    fn default() -> Self {
        Self {
            account_commands: "accounts.events.created".to_string(),
            account_completed: "accounts.events.completed".to_string(),
            account_failed: "accounts.events.failed".to_string(),
            transaction_commands: "transactions.events.created".to_string(),
            transaction_completed: "transactions.events.completed".to_string(),
            transaction_failed: "transactions.events.failed".to_string(),
        }
    }
}

impl RoutingKeys {
    /// Topics the ledger process consumes.
    #[must_use]
    pub fn command_topics(&self) -> Vec<String> {
        vec![
            self.account_commands.clone(),
            self.transaction_commands.clone(),
        ]
    }

    /// Success and failure topics for accounts.
    #[must_use]
    pub fn account_outcome_topics(&self) -> Vec<String> {
        vec![self.account_completed.clone(), self.account_failed.clone()]
    }

    /// Success and failure topics for transactions.
    #[must_use]
    pub fn transaction_outcome_topics(&self) -> Vec<String> {
        vec![
            self.transaction_completed.clone(),
            self.transaction_failed.clone(),
        ]
    }
}
