//! Router configuration.

use super::handlers;
use super::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use ledger_bridge_web::correlation_id_layer;
use ledger_bridge_web::handlers::{health_check, websocket_topics};
use serde_json::Value;

/// Build the complete router.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/accounts", post(handlers::create_account))
        .route("/accounts/:id", get(handlers::get_account))
        .route("/accounts/:id/transactions", get(handlers::list_transactions))
        .route("/transactions", post(handlers::create_transaction));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(websocket_topics::handle::<Value>))
        .nest("/api", api_routes)
        .layer(correlation_id_layer())
        .with_state(state)
}
