//! Ledger data model.
//!
//! Accounts own one [`Balance`] per currency. A balance only changes through
//! [`Balance::apply`], which enforces the no-overdraft rule and bumps the version that
//! the stores use for compare-and-swap.
//!
//! All money is [`Decimal`]. Amounts carry at most two fractional digits; balances are
//! always held at scale 2, so a fresh balance reads `0.00`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Longest accepted customer identifier.
pub const MAX_CUSTOMER_ID_LEN: usize = 64;

/// Longest accepted transaction description.
pub const MAX_DESCRIPTION_LEN: usize = 255;

/// Rule violations detected by the domain types themselves.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Amount is zero, negative or has more than two fractional digits.
    #[error("Invalid amount {0}: must be positive with at most 2 decimal places")]
    InvalidAmount(Decimal),

    /// Amount above [`money::max_amount`].
    #[error("Amount {0} exceeds the maximum of {max}", max = money::max_amount())]
    AmountTooLarge(Decimal),

    /// Credit that would push the balance above [`money::max_amount`].
    #[error("Balance limit exceeded: available {available}, credit {requested}")]
    BalanceLimitExceeded {
        /// Amount on the balance.
        available: Decimal,
        /// Amount the credit asked for.
        requested: Decimal,
    },

    /// Currency outside the supported set.
    #[error("Unsupported currency: {0}")]
    InvalidCurrency(String),

    /// Direction other than `IN` or `OUT`.
    #[error("Invalid direction: {0}")]
    InvalidDirection(String),

    /// Country code that is not two ASCII letters.
    #[error("Invalid country code: {0}")]
    InvalidCountry(String),

    /// Blank or oversized customer identifier.
    #[error("Invalid customer id: {0}")]
    InvalidCustomer(String),

    /// Description longer than [`MAX_DESCRIPTION_LEN`].
    #[error("Description exceeds {MAX_DESCRIPTION_LEN} characters")]
    DescriptionTooLong,

    /// An account needs at least one currency.
    #[error("At least one currency is required")]
    NoCurrencies,

    /// The same currency was listed twice.
    #[error("Duplicate currency: {0}")]
    DuplicateCurrency(Currency),

    /// Debit larger than the available amount.
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Amount on the balance.
        available: Decimal,
        /// Amount the debit asked for.
        requested: Decimal,
    },
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Fresh random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Account identifier.
    AccountId
);
uuid_id!(
    /// Balance identifier.
    BalanceId
);
uuid_id!(
    /// Transaction identifier.
    TransactionId
);

/// Identifier of the customer owning an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CustomerId(String);

impl CustomerId {
    /// Validate and wrap a customer id (trimmed, 1 to 64 characters).
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidCustomer`] for blank or oversized ids.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_CUSTOMER_ID_LEN {
            return Err(DomainError::InvalidCustomer(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CustomerId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CustomerId> for String {
    fn from(id: CustomerId) -> Self {
        id.0
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ISO 3166 alpha-2 country code, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode(String);

impl CountryCode {
    /// Validate a two-letter country code.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidCountry`] unless the input is exactly two ASCII letters.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.len() != 2 || !trimmed.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(DomainError::InvalidCountry(raw.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// The code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CountryCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CountryCode> for String {
    fn from(code: CountryCode) -> Self {
        code.0
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Supported currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Euro
    Eur,
    /// Swedish krona
    Sek,
    /// Pound sterling
    Gbp,
    /// US dollar
    Usd,
}

impl Currency {
    /// Every supported currency.
    pub const ALL: [Self; 4] = [Self::Eur, Self::Sek, Self::Gbp, Self::Usd];

    /// ISO 4217 code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eur => "EUR",
            Self::Sek => "SEK",
            Self::Gbp => "GBP",
            Self::Usd => "USD",
        }
    }
}

impl FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::InvalidCurrency(s.to_string()))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether money moves into or out of a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Credit
    In,
    /// Debit
    Out,
}

impl Direction {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::In => "IN",
            Self::Out => "OUT",
        }
    }
}

impl FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IN" => Ok(Self::In),
            "OUT" => Ok(Self::Out),
            _ => Err(DomainError::InvalidDirection(s.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final state of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    /// Applied to the balance.
    Completed,
    /// Refused.
    Failed,
}

impl TransactionStatus {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown transaction status {other}")),
        }
    }
}

/// Money helpers over [`Decimal`].
pub mod money {
    use super::DomainError;
    use rust_decimal::Decimal;

    /// Fractional digits kept on balances.
    pub const SCALE: u32 = 2;

    /// Largest value a `NUMERIC(19,2)` column holds, in cents.
    const MAX_CENTS: i128 = 9_999_999_999_999_999_999;

    /// Largest amount or balance the ledger stores: `99999999999999999.99`.
    #[must_use]
    pub fn max_amount() -> Decimal {
        Decimal::from_i128_with_scale(MAX_CENTS, SCALE)
    }

    /// Check a transaction amount: strictly positive, at most two decimals.
    ///
    /// Returns the amount at scale 2 (`5` becomes `5.00`).
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InvalidAmount`] for zero, negative or over-precise
    /// amounts and [`DomainError::AmountTooLarge`] above [`max_amount`].
    pub fn validate_amount(amount: Decimal) -> Result<Decimal, DomainError> {
        if amount <= Decimal::ZERO || amount.normalize().scale() > SCALE {
            return Err(DomainError::InvalidAmount(amount));
        }
        if amount > max_amount() {
            return Err(DomainError::AmountTooLarge(amount));
        }
        Ok(at_scale(amount))
    }

    /// `amount` rescaled to two fractional digits.
    #[must_use]
    pub fn at_scale(amount: Decimal) -> Decimal {
        let mut scaled = amount;
        scaled.rescale(SCALE);
        scaled
    }

    /// Zero at balance scale.
    #[must_use]
    pub fn zero() -> Decimal {
        at_scale(Decimal::ZERO)
    }
}

/// A customer account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account id.
    pub id: AccountId,
    /// Owning customer.
    pub customer_id: CustomerId,
    /// Country the account is held in.
    pub country: CountryCode,
    /// One balance per currency, ordered by currency.
    pub balances: Vec<Balance>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Open an account with a zero balance for each currency.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::NoCurrencies`] for an empty list and
    /// [`DomainError::DuplicateCurrency`] when a currency repeats.
    pub fn open(
        customer_id: CustomerId,
        country: CountryCode,
        currencies: &[Currency],
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let currencies = distinct_currencies(currencies)?;
        let id = AccountId::new();
        Ok(Self {
            id,
            customer_id,
            country,
            balances: currencies
                .into_iter()
                .map(|currency| Balance::opened(id, currency, now))
                .collect(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Balance held in `currency`, if any.
    #[must_use]
    pub fn balance(&self, currency: Currency) -> Option<&Balance> {
        self.balances.iter().find(|b| b.currency == currency)
    }
}

/// Sorted copy of `currencies`, refusing empty lists and repeats.
///
/// # Errors
///
/// See [`Account::open`].
pub fn distinct_currencies(currencies: &[Currency]) -> Result<Vec<Currency>, DomainError> {
    if currencies.is_empty() {
        return Err(DomainError::NoCurrencies);
    }
    let mut sorted = currencies.to_vec();
    sorted.sort_unstable();
    if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(DomainError::DuplicateCurrency(pair[0]));
    }
    Ok(sorted)
}

/// Amount held by an account in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Balance id.
    pub id: BalanceId,
    /// Owning account.
    pub account_id: AccountId,
    /// Currency of the balance.
    pub currency: Currency,
    /// Available amount, never negative.
    pub available: Decimal,
    /// Bumped by one on every mutation.
    pub version: i64,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Balance {
    /// A fresh balance: `0.00` at version 1.
    #[must_use]
    pub fn opened(account_id: AccountId, currency: Currency, now: DateTime<Utc>) -> Self {
        Self {
            id: BalanceId::new(),
            account_id,
            currency,
            available: money::zero(),
            version: 1,
            updated_at: now,
        }
    }

    /// The balance after moving `amount` in `direction`.
    ///
    /// A debit may take the balance to exactly zero but not below.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::InsufficientFunds`] when a debit exceeds the available amount
    /// and [`DomainError::BalanceLimitExceeded`] when a credit would pass
    /// [`money::max_amount`].
    pub fn apply(
        &self,
        direction: Direction,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let available = match direction {
            Direction::In => self
                .available
                .checked_add(amount)
                .filter(|sum| *sum <= money::max_amount())
                .ok_or(DomainError::BalanceLimitExceeded {
                    available: self.available,
                    requested: amount,
                })?,
            Direction::Out if self.available >= amount => self.available - amount,
            Direction::Out => {
                return Err(DomainError::InsufficientFunds {
                    available: self.available,
                    requested: amount,
                });
            },
        };
        Ok(Self {
            available: money::at_scale(available),
            version: self.version + 1,
            updated_at: now,
            ..self.clone()
        })
    }
}

/// A money movement on one balance, created once per idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction id.
    pub id: TransactionId,
    /// Account moved.
    pub account_id: AccountId,
    /// Balance moved.
    pub balance_id: BalanceId,
    /// Unsigned amount.
    pub amount: Decimal,
    /// Currency moved.
    pub currency: Currency,
    /// Credit or debit.
    pub direction: Direction,
    /// Free text from the caller.
    pub description: String,
    /// Balance amount once applied.
    pub balance_after: Decimal,
    /// Outcome.
    pub status: TransactionStatus,
    /// Key of the request that created it.
    pub idempotency_key: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Marker that a command was handled, holding the result it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMessage {
    /// Idempotency key (or request id) of the command.
    pub message_id: String,
    /// Request-type tag of the command.
    pub message_type: String,
    /// When it was handled.
    pub processed_at: DateTime<Utc>,
    /// The result, replayed verbatim on redelivery.
    pub result: serde_json::Value,
}
