//! Account and transaction services.
//!
//! API side ([`AccountService`], [`TransactionService`]): validate, consult the
//! idempotency guard, publish through the bridge and shape the reply. Ledger side
//! ([`CommandProcessor`]): run the engine and publish the outcome.

pub mod account;
pub mod processor;
pub mod transaction;

pub use account::{AccountOutcomes, AccountResponse, AccountService, BalanceResponse, CreateAccountRequest};
pub use processor::CommandProcessor;
pub use transaction::{
    CreateTransactionRequest, TransactionOutcomes, TransactionResponse, TransactionService,
};

use crate::bridge::{BridgeError, CommandPublisher, CommandRoute, IdempotencyGuard};
use crate::error::BankingError;
use crate::ledger::LedgerStore;
use ledger_bridge_core::event::Event;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What every API-side service needs to send a command and read the ledger.
#[derive(Clone)]
pub struct RequestBridge {
    publisher: Arc<CommandPublisher>,
    guard: Arc<IdempotencyGuard>,
    store: Arc<dyn LedgerStore>,
    timeout: Duration,
}

impl RequestBridge {
    /// Bundle the bridge front, the API-side guard and the read store.
    #[must_use]
    pub fn new(
        publisher: Arc<CommandPublisher>,
        guard: Arc<IdempotencyGuard>,
        store: Arc<dyn LedgerStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            publisher,
            guard,
            store,
            timeout,
        }
    }

    /// Read side of the ledger.
    #[must_use]
    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    /// Send `command` and decode the shaped outcome as `R`.
    ///
    /// A key this process already saw complete is answered from the guard, or refused
    /// if it completed for another request type. Any other key is published, including
    /// one still marked in flight: the ledger replays commands it has handled, so
    /// publishing again is safe and the caller never waits on an outcome this process
    /// may have missed.
    pub(crate) async fn send<C, R>(&self, command: &C, route: CommandRoute<'_>) -> Result<R, BankingError>
    where
        C: Event + Serialize,
        R: DeserializeOwned,
    {
        if let Some(completed) = self.guard.completed(route.idempotency_key) {
            if completed.request_type != route.request_type {
                return Err(BankingError::Validation(format!(
                    "Idempotency key '{}' was already used for {}",
                    route.idempotency_key, completed.request_type
                )));
            }
            debug!(idempotency_key = %route.idempotency_key, "Answering from idempotency guard");
            return decode_payload(completed.payload);
        }

        self.guard.mark_in_flight(route.idempotency_key);
        match self.publisher.publish_and_wait(command, route, self.timeout).await {
            Ok(payload) => decode_payload(payload),
            Err(err @ BridgeError::Timeout { .. }) => Err(err.into()),
            Err(err) => {
                if !matches!(err, BridgeError::Rejected(_)) {
                    warn!(idempotency_key = %route.idempotency_key, error = %err, "Bridged request failed");
                }
                self.guard.clear(route.idempotency_key);
                Err(err.into())
            },
        }
    }
}

fn decode_payload<R: DeserializeOwned>(payload: serde_json::Value) -> Result<R, BankingError> {
    serde_json::from_value(payload).map_err(|e| BankingError::Internal(format!("unreadable outcome: {e}")))
}

fn store_failure(err: impl std::fmt::Display) -> BankingError {
    BankingError::Internal(format!("ledger read failed: {err}"))
}
