//! Errors returned by the account and transaction services.
//!
//! Business errors raised by the ledger arrive asynchronously as an
//! [`ErrorNotification`](crate::messages::ErrorNotification). They are rebuilt here into
//! the same variant a synchronous check would have produced, so a caller can tell
//! "retry is safe" ([`BankingError::is_retryable`]) from "change the request first".

use crate::bridge::BridgeError;
use crate::domain::DomainError;
use crate::messages::ErrorCode;
use ledger_bridge_web::AppError;
use thiserror::Error;

/// Service-level failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BankingError {
    /// Malformed input, rejected before anything was published.
    #[error("{0}")]
    Validation(String),

    /// The account does not exist.
    #[error("{0}")]
    AccountNotFound(String),

    /// The account has no balance in the currency.
    #[error("{0}")]
    CurrencyNotFound(String),

    /// Debit larger than the available amount.
    #[error("{0}")]
    InsufficientFunds(String),

    /// Other business rule failure reported by the ledger.
    #[error("{message}")]
    Business {
        /// Ledger error code.
        code: ErrorCode,
        /// Detail.
        message: String,
    },

    /// No outcome within the time limit; the command may still complete.
    #[error("{0}")]
    Timeout(String),

    /// Serialization, broker or storage failure.
    #[error("{0}")]
    Internal(String),
}

impl BankingError {
    /// Machine-readable code for clients.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => ErrorCode::ValidationFailed.as_str(),
            Self::AccountNotFound(_) => ErrorCode::AccountNotFound.as_str(),
            Self::CurrencyNotFound(_) => ErrorCode::CurrencyNotFound.as_str(),
            Self::InsufficientFunds(_) => ErrorCode::InsufficientFunds.as_str(),
            Self::Business { code, .. } => code.as_str(),
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => ErrorCode::InternalError.as_str(),
        }
    }

    /// Whether resending the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::Internal(_)
                | Self::Business {
                    code: ErrorCode::ConcurrentModification,
                    ..
                }
        )
    }

    /// Rebuild the typed error for a ledger error code.
    #[must_use]
    pub fn from_code(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::ValidationFailed => Self::Validation(message),
            ErrorCode::AccountNotFound => Self::AccountNotFound(message),
            ErrorCode::CurrencyNotFound => Self::CurrencyNotFound(message),
            ErrorCode::InsufficientFunds => Self::InsufficientFunds(message),
            ErrorCode::InternalError => Self::Internal(message),
            ErrorCode::ConcurrentModification => Self::Business { code, message },
        }
    }
}

impl From<BridgeError> for BankingError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Rejected(notification) => {
                Self::from_code(notification.error_code, notification.error_message)
            },
            BridgeError::Timeout { .. } => Self::Timeout(
                "The ledger did not answer in time; retry with the same Idempotency-Key".to_string(),
            ),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<DomainError> for BankingError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InsufficientFunds { .. } => Self::InsufficientFunds(err.to_string()),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<BankingError> for AppError {
    fn from(err: BankingError) -> Self {
        let code = err.error_code();
        let app = match &err {
            BankingError::Validation(m) => Self::bad_request(m.clone()),
            BankingError::AccountNotFound(m) | BankingError::CurrencyNotFound(m) => Self::not_found(m.clone()),
            BankingError::InsufficientFunds(m) => Self::unprocessable(m.clone()),
            BankingError::Business { message, .. } => Self::conflict(message.clone()),
            BankingError::Timeout(m) => Self::gateway_timeout(m.clone()),
            BankingError::Internal(m) => Self::internal("An internal error occurred")
                .with_source(anyhow::anyhow!(m.clone())),
        };
        app.with_code(code)
    }
}
