//! Money movements and transaction history.

use super::account::{BalanceResponse, parse_account_id};
use super::{RequestBridge, store_failure};
use crate::bridge::{BridgeError, CommandRoute, OutcomeHandler};
use crate::domain::{Currency, Direction, MAX_DESCRIPTION_LEN, Transaction, TransactionStatus, money};
use crate::error::BankingError;
use crate::messages::{
    CreateTransactionCommand, RoutingKeys, TRANSACTION_COMPLETED, TRANSACTION_CREATE, TransactionCompleted,
};
use chrono::{DateTime, Utc};
use ledger_bridge_core::event::SerializedEvent;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Body of `POST /api/transactions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    /// Account to move.
    pub account_id: String,
    /// Positive amount with at most two decimals.
    pub amount: Decimal,
    /// Balance currency.
    pub currency: String,
    /// `IN` or `OUT`.
    pub direction: String,
    /// Free text.
    #[serde(default)]
    pub description: String,
}

impl CreateTransactionRequest {
    /// Validate into a command.
    ///
    /// Whether the account and balance exist is only known to the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`BankingError::Validation`] for a malformed field.
    pub fn into_command(self) -> Result<CreateTransactionCommand, BankingError> {
        if self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(BankingError::Validation(format!(
                "Description exceeds {MAX_DESCRIPTION_LEN} characters"
            )));
        }
        Ok(CreateTransactionCommand {
            account_id: parse_account_id(&self.account_id)?,
            amount: money::validate_amount(self.amount)?,
            currency: self.currency.parse::<Currency>()?,
            direction: self.direction.parse::<Direction>()?,
            description: self.description,
        })
    }
}

/// Transaction as returned to HTTP callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    /// Transaction id.
    pub transaction_id: Uuid,
    /// Account moved.
    pub account_id: Uuid,
    /// Amount moved.
    pub amount: Decimal,
    /// Currency moved.
    pub currency: Currency,
    /// `IN` or `OUT`.
    pub direction: Direction,
    /// Free text.
    pub description: String,
    /// Balance amount once applied.
    pub balance_after_transaction: Decimal,
    /// Outcome.
    pub status: TransactionStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Balance after the move; absent in history listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<BalanceResponse>,
}

impl From<&Transaction> for TransactionResponse {
    fn from(transaction: &Transaction) -> Self {
        Self {
            transaction_id: *transaction.id.as_uuid(),
            account_id: *transaction.account_id.as_uuid(),
            amount: transaction.amount,
            currency: transaction.currency,
            direction: transaction.direction,
            description: transaction.description.clone(),
            balance_after_transaction: transaction.balance_after,
            status: transaction.status,
            created_at: transaction.created_at,
            balance: None,
        }
    }
}

impl From<&TransactionCompleted> for TransactionResponse {
    fn from(completed: &TransactionCompleted) -> Self {
        Self {
            balance: Some(BalanceResponse::from(&completed.balance)),
            ..Self::from(&completed.transaction)
        }
    }
}

/// API-side transaction operations.
#[derive(Clone)]
pub struct TransactionService {
    bridge: RequestBridge,
    routing_key: String,
}

impl TransactionService {
    /// Create the service, publishing to the transaction command topic of `routing`.
    #[must_use]
    pub fn new(bridge: RequestBridge, routing: &RoutingKeys) -> Self {
        Self {
            bridge,
            routing_key: routing.transaction_commands.clone(),
        }
    }

    /// Apply a transaction through the ledger.
    ///
    /// # Errors
    ///
    /// [`BankingError::Validation`] before anything is published; otherwise the ledger's
    /// verdict ([`BankingError::InsufficientFunds`], [`BankingError::AccountNotFound`],
    /// ...) or a bridge failure.
    pub async fn create_transaction(
        &self,
        request: CreateTransactionRequest,
        idempotency_key: &str,
        request_id: &str,
    ) -> Result<TransactionResponse, BankingError> {
        let command = request.into_command()?;
        let route = CommandRoute {
            routing_key: &self.routing_key,
            idempotency_key,
            request_id,
            request_type: TRANSACTION_CREATE,
        };
        self.bridge.send(&command, route).await
    }

    /// Transactions of an account, oldest first.
    ///
    /// # Errors
    ///
    /// [`BankingError::Validation`] for a malformed id, [`BankingError::AccountNotFound`]
    /// if the account does not exist.
    pub async fn list_transactions(&self, account_id: &str) -> Result<Vec<TransactionResponse>, BankingError> {
        let id = parse_account_id(account_id)?;
        let store = self.bridge.store();
        if store.find_account(id).await.map_err(store_failure)?.is_none() {
            return Err(BankingError::AccountNotFound(format!("Account {id} not found")));
        }
        Ok(store
            .list_transactions(id)
            .await
            .map_err(store_failure)?
            .iter()
            .map(TransactionResponse::from)
            .collect())
    }
}

/// Outcome handling for the transaction topics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionOutcomes;

impl OutcomeHandler for TransactionOutcomes {
    fn domain(&self) -> &'static str {
        "transactions"
    }

    fn request_type(&self) -> &'static str {
        TRANSACTION_CREATE
    }

    fn success_event_type(&self) -> &'static str {
        TRANSACTION_COMPLETED
    }

    fn topic(&self) -> &'static str {
        "/topic/transactions"
    }

    fn shape(&self, event: &SerializedEvent) -> Result<Value, BridgeError> {
        let completed: TransactionCompleted = event
            .decode()
            .map_err(|e| BridgeError::MalformedPayload(e.to_string()))?;
        serde_json::to_value(TransactionResponse::from(&completed))
            .map_err(|e| BridgeError::Serialization(e.to_string()))
    }
}
