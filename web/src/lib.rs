//! Axum shell for the ledger bridge.
//!
//! The HTTP surface is a thin imperative shell: it extracts and validates request
//! data, hands it to a domain service, and maps the result (or a typed domain error)
//! to a response.
//!
//! # Request Flow
//!
//! 1. **Correlate**: [`middleware::correlation_id_layer`] assigns the trace id
//! 2. **Extract**: JSON body, [`IdempotencyKey`], [`CorrelationId`]
//! 3. **Dispatch**: call the domain service, which may wait on the broker
//! 4. **Map**: success to a 2xx body, failure to an [`AppError`] with the trace id
//!
//! # Example
//!
//! ```ignore
//! use ledger_bridge_web::{AppError, CorrelationId, IdempotencyKey};
//! use axum::{Router, routing::post, Json};
//!
//! async fn create_transaction(
//!     State(state): State<AppState>,
//!     trace: CorrelationId,
//!     key: IdempotencyKey,
//!     Json(request): Json<CreateTransactionRequest>,
//! ) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
//!     let created = state.transactions.create_transaction(request, &key.value).await
//!         .map_err(|e| AppError::from(e).with_trace_id(trace.0))?;
//!     Ok((StatusCode::CREATED, Json(created)))
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{CorrelationId, IdempotencyKey};
pub use handlers::TopicBroadcaster;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationIdExt, correlation_id_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
