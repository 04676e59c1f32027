//! Error types for web handlers.
//!
//! [`AppError`] is the single error type handlers return. It renders as
//!
//! ```json
//! { "code": "INSUFFICIENT_FUNDS", "message": "...", "traceId": "3f0c..." }
//! ```
//!
//! with the matching HTTP status. Every error body carries a trace id: handlers attach
//! the request's correlation id with [`AppError::with_trace_id`], and an error that
//! reaches the response without one gets a fresh id that is logged alongside it.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```ignore
/// async fn handler(trace: CorrelationId) -> Result<Json<Account>, AppError> {
///     let account = service.get_account(id).await
///         .map_err(|e| AppError::from(e).with_trace_id(trace.0))?;
///     Ok(Json(account))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Request trace id echoed to the client
    trace_id: Option<Uuid>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.into(),
            trace_id: None,
            source: None,
        }
    }

    /// Attach an internal source error (logged, never sent to the client).
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach the request's trace id.
    #[must_use]
    pub const fn with_trace_id(mut self, trace_id: Uuid) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Replace the error code, keeping status and message.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Trace id, if one has been attached.
    #[must_use]
    pub const fn trace_id(&self) -> Option<Uuid> {
        self.trace_id
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "BAD_REQUEST")
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message, "NOT_FOUND")
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message, "CONFLICT")
    }

    /// Create a 422 Unprocessable Entity error for a business rule violation.
    #[must_use]
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message, "UNPROCESSABLE_ENTITY")
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            "INTERNAL_SERVER_ERROR",
        )
    }

    /// Create a 504 Gateway Timeout error, for a backend that did not answer in time.
    #[must_use]
    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, message, "GATEWAY_TIMEOUT")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    code: String,
    message: String,
    trace_id: Uuid,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let trace_id = self.trace_id.unwrap_or_else(Uuid::new_v4);

        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = %self.code,
                message = %self.message,
                trace_id = %trace_id,
                error = ?self.source.as_ref().map(|e| format!("{e:#}")),
                "Internal server error"
            );
        } else {
            tracing::debug!(
                status = %self.status,
                code = %self.code,
                trace_id = %trace_id,
                "Request rejected"
            );
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            trace_id,
        };

        (self.status, Json(body)).into_response()
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}
