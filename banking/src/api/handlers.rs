//! Request handlers.
//!
//! Handlers only extract, delegate to a service and attach the trace id to errors.

use super::state::AppState;
use crate::error::BankingError;
use crate::services::{AccountResponse, CreateAccountRequest, CreateTransactionRequest, TransactionResponse};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use ledger_bridge_web::{AppError, CorrelationId, IdempotencyKey, WebResult};
use tracing::info;

fn traced(trace: CorrelationId) -> impl Fn(BankingError) -> AppError {
    move |err| AppError::from(err).with_trace_id(trace.0)
}

/// `POST /api/accounts`
///
/// # Errors
///
/// 400 for invalid input, 504 when the ledger does not answer in time, 500 otherwise.
pub async fn create_account(
    State(state): State<AppState>,
    trace: CorrelationId,
    key: IdempotencyKey,
    Json(request): Json<CreateAccountRequest>,
) -> WebResult<(StatusCode, Json<AccountResponse>)> {
    info!(idempotency_key = %key.value, generated = key.generated, "Creating account");
    let account = state
        .accounts
        .create_account(request, &key.value, &trace.0.to_string())
        .await
        .map_err(traced(trace))?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// `GET /api/accounts/:id`
///
/// # Errors
///
/// 400 for a malformed id, 404 for an unknown account.
pub async fn get_account(
    State(state): State<AppState>,
    trace: CorrelationId,
    Path(id): Path<String>,
) -> WebResult<Json<AccountResponse>> {
    let account = state.accounts.get_account(&id).await.map_err(traced(trace))?;
    Ok(Json(account))
}

/// `POST /api/transactions`
///
/// # Errors
///
/// 400 for invalid input, 404 for an unknown account or currency, 422 for insufficient
/// funds, 409 for a concurrent modification, 504 on timeout.
pub async fn create_transaction(
    State(state): State<AppState>,
    trace: CorrelationId,
    key: IdempotencyKey,
    Json(request): Json<CreateTransactionRequest>,
) -> WebResult<(StatusCode, Json<TransactionResponse>)> {
    info!(idempotency_key = %key.value, generated = key.generated, "Creating transaction");
    let transaction = state
        .transactions
        .create_transaction(request, &key.value, &trace.0.to_string())
        .await
        .map_err(traced(trace))?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

/// `GET /api/accounts/:id/transactions`
///
/// # Errors
///
/// 400 for a malformed id, 404 for an unknown account.
pub async fn list_transactions(
    State(state): State<AppState>,
    trace: CorrelationId,
    Path(id): Path<String>,
) -> WebResult<Json<Vec<TransactionResponse>>> {
    let transactions = state
        .transactions
        .list_transactions(&id)
        .await
        .map_err(traced(trace))?;
    Ok(Json(transactions))
}
