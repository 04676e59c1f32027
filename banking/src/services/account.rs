//! Account creation and lookup.

use super::{RequestBridge, store_failure};
use crate::bridge::{BridgeError, CommandRoute, OutcomeHandler};
use crate::domain::{Account, AccountId, Balance, CountryCode, Currency, CustomerId, distinct_currencies};
use crate::error::BankingError;
use crate::messages::{ACCOUNT_CREATE, ACCOUNT_CREATED, AccountCreated, CreateAccountCommand, RoutingKeys};
use chrono::{DateTime, Utc};
use ledger_bridge_core::event::SerializedEvent;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Body of `POST /api/accounts`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    /// Owning customer.
    pub customer_id: String,
    /// ISO 3166 alpha-2 country.
    pub country: String,
    /// Currencies to open balances in.
    pub currencies: Vec<String>,
}

impl CreateAccountRequest {
    /// Validate into a command.
    ///
    /// # Errors
    ///
    /// Returns [`BankingError::Validation`] for a bad customer id, country or currency
    /// list.
    pub fn into_command(self) -> Result<CreateAccountCommand, BankingError> {
        let currencies = self
            .currencies
            .iter()
            .map(|c| c.parse::<Currency>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CreateAccountCommand {
            customer_id: CustomerId::parse(&self.customer_id)?,
            country: CountryCode::parse(&self.country)?,
            currencies: distinct_currencies(&currencies)?,
        })
    }
}

/// One balance of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    /// Balance id.
    pub balance_id: Uuid,
    /// Currency.
    pub currency: Currency,
    /// Available amount.
    pub available_amount: Decimal,
    /// Optimistic version.
    pub version: i64,
}

impl From<&Balance> for BalanceResponse {
    fn from(balance: &Balance) -> Self {
        Self {
            balance_id: *balance.id.as_uuid(),
            currency: balance.currency,
            available_amount: balance.available,
            version: balance.version,
        }
    }
}

/// Account as returned to HTTP callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    /// Account id.
    pub account_id: Uuid,
    /// Owning customer.
    pub customer_id: String,
    /// Country.
    pub country: String,
    /// Balances, ordered by currency.
    pub balances: Vec<BalanceResponse>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            account_id: *account.id.as_uuid(),
            customer_id: account.customer_id.as_str().to_string(),
            country: account.country.as_str().to_string(),
            balances: account.balances.iter().map(BalanceResponse::from).collect(),
            created_at: account.created_at,
        }
    }
}

/// Parse an account id from a path segment.
pub(crate) fn parse_account_id(raw: &str) -> Result<AccountId, BankingError> {
    Uuid::parse_str(raw.trim())
        .map(AccountId::from_uuid)
        .map_err(|_| BankingError::Validation(format!("Invalid account id: {raw}")))
}

/// API-side account operations.
#[derive(Clone)]
pub struct AccountService {
    bridge: RequestBridge,
    routing_key: String,
}

impl AccountService {
    /// Create the service, publishing to the account command topic of `routing`.
    #[must_use]
    pub fn new(bridge: RequestBridge, routing: &RoutingKeys) -> Self {
        Self {
            bridge,
            routing_key: routing.account_commands.clone(),
        }
    }

    /// Open an account through the ledger.
    ///
    /// # Errors
    ///
    /// [`BankingError::Validation`] before anything is published; otherwise whatever
    /// the ledger or the bridge reports.
    pub async fn create_account(
        &self,
        request: CreateAccountRequest,
        idempotency_key: &str,
        request_id: &str,
    ) -> Result<AccountResponse, BankingError> {
        let command = request.into_command()?;
        let route = CommandRoute {
            routing_key: &self.routing_key,
            idempotency_key,
            request_id,
            request_type: ACCOUNT_CREATE,
        };
        self.bridge.send(&command, route).await
    }

    /// Current state of an account.
    ///
    /// # Errors
    ///
    /// [`BankingError::Validation`] for a malformed id, [`BankingError::AccountNotFound`]
    /// if it does not exist.
    pub async fn get_account(&self, account_id: &str) -> Result<AccountResponse, BankingError> {
        let id = parse_account_id(account_id)?;
        let account = self
            .bridge
            .store()
            .find_account(id)
            .await
            .map_err(store_failure)?
            .ok_or_else(|| BankingError::AccountNotFound(format!("Account {id} not found")))?;
        Ok(AccountResponse::from(&account))
    }
}

/// Outcome handling for the account topics.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountOutcomes;

impl OutcomeHandler for AccountOutcomes {
    fn domain(&self) -> &'static str {
        "accounts"
    }

    fn request_type(&self) -> &'static str {
        ACCOUNT_CREATE
    }

    fn success_event_type(&self) -> &'static str {
        ACCOUNT_CREATED
    }

    fn topic(&self) -> &'static str {
        "/topic/accounts"
    }

    fn shape(&self, event: &SerializedEvent) -> Result<Value, BridgeError> {
        let created: AccountCreated = event
            .decode()
            .map_err(|e| BridgeError::MalformedPayload(e.to_string()))?;
        serde_json::to_value(AccountResponse::from(&created.account))
            .map_err(|e| BridgeError::Serialization(e.to_string()))
    }
}
