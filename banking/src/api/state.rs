//! Shared state of the HTTP handlers.

use crate::services::{AccountService, TransactionService};
use axum::extract::FromRef;
use ledger_bridge_web::TopicBroadcaster;
use serde_json::Value;

/// Application state, cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Account operations.
    pub accounts: AccountService,
    /// Transaction operations.
    pub transactions: TransactionService,
    /// WebSocket fan-out fed by the notification routers.
    pub broadcaster: TopicBroadcaster<Value>,
}

impl AppState {
    /// Assemble the state.
    #[must_use]
    pub const fn new(
        accounts: AccountService,
        transactions: TransactionService,
        broadcaster: TopicBroadcaster<Value>,
    ) -> Self {
        Self {
            accounts,
            transactions,
            broadcaster,
        }
    }
}

// Lets the WebSocket handler extract the broadcaster from AppState
impl FromRef<AppState> for TopicBroadcaster<Value> {
    fn from_ref(state: &AppState) -> Self {
        state.broadcaster.clone()
    }
}
