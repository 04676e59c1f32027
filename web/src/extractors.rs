//! Custom Axum extractors.
//!
//! - [`CorrelationId`]: the request's trace id
//! - [`IdempotencyKey`]: the optional `Idempotency-Key` header, generated when absent
//!
//! # Examples
//!
//! ```ignore
//! use ledger_bridge_web::extractors::{CorrelationId, IdempotencyKey};
//!
//! async fn create(
//!     State(state): State<AppState>,
//!     trace: CorrelationId,
//!     key: IdempotencyKey,
//!     Json(body): Json<CreateTransactionRequest>,
//! ) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
//!     tracing::info!(idempotency_key = %key.value, generated = key.generated, "Creating transaction");
//!     ...
//! }
//! ```

use crate::error::AppError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Header carrying the caller's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Longest accepted idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// The request's correlation id.
///
/// Uses the id stored by [`crate::middleware::correlation_id_layer`] when installed,
/// then the `X-Correlation-ID` header, then a fresh UUID.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        let correlation_id = parts
            .headers
            .get(crate::middleware::CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// Idempotency key for a command request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey {
    /// The key itself.
    pub value: String,
    /// `true` when the caller sent no key and one was generated.
    pub generated: bool,
}

impl IdempotencyKey {
    /// Validate a caller-supplied key: 1 to 128 visible ASCII characters.
    ///
    /// # Errors
    ///
    /// Returns a 400 [`AppError`] describing why the key was refused.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        if raw.is_empty() || raw.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(AppError::bad_request(format!(
                "{IDEMPOTENCY_KEY_HEADER} must be 1 to {MAX_IDEMPOTENCY_KEY_LEN} characters"
            ))
            .with_code("INVALID_IDEMPOTENCY_KEY"));
        }
        if !raw.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(AppError::bad_request(format!(
                "{IDEMPOTENCY_KEY_HEADER} must contain only visible ASCII characters"
            ))
            .with_code("INVALID_IDEMPOTENCY_KEY"));
        }
        Ok(Self {
            value: raw.to_string(),
            generated: false,
        })
    }

    /// A fresh UUID v4 key.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            value: Uuid::new_v4().to_string(),
            generated: true,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let trace = parts.extensions.get::<Uuid>().copied();
        let with_trace = |err: AppError| match trace {
            Some(id) => err.with_trace_id(id),
            None => err,
        };

        match parts.headers.get(IDEMPOTENCY_KEY_HEADER) {
            None => Ok(Self::generate()),
            Some(value) => {
                let raw = value.to_str().map_err(|_| {
                    with_trace(
                        AppError::bad_request(format!(
                            "{IDEMPOTENCY_KEY_HEADER} must contain only visible ASCII characters"
                        ))
                        .with_code("INVALID_IDEMPOTENCY_KEY"),
                    )
                })?;
                Self::parse(raw).map_err(with_trace)
            },
        }
    }
}
