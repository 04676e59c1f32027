//! Request/response bridge over the broker.
//!
//! The API process publishes a command and must answer its HTTP caller with the outcome
//! the ledger process emits later on a different topic. The pieces:
//!
//! - [`IdempotencyGuard`]: process-local cache of keys seen and outcomes already returned
//! - [`CorrelationTable`]: pending slots keyed by idempotency key, shared by the two halves
//! - [`CommandPublisher`]: publishes and waits on a slot
//! - [`NotificationRouter`]: consumes outcomes, resolves slots, pushes to WebSocket topics
//!
//! ```text
//! HTTP ─▶ service ─▶ CommandPublisher ──publish──▶ broker ─▶ ledger
//!                         │ wait                                │
//!                         ▼                                     ▼
//!                  CorrelationTable ◀── NotificationRouter ◀── broker
//! ```

pub mod correlation;
pub mod guard;
pub mod publisher;
pub mod router;

pub use correlation::{CorrelationTable, PendingGuard, Registration, Resolution};
pub use guard::{CompletedRequest, IdempotencyGuard};
pub use publisher::{CommandPublisher, CommandRoute};
pub use router::{NotificationRouter, OutcomeHandler};

use crate::messages::ErrorNotification;
use ledger_bridge_core::event_bus::EventBusError;
use std::time::Duration;
use thiserror::Error;

/// Failures of a bridged request.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// The command or an outcome could not be encoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The broker did not accept the command.
    #[error("Publish failed: {0}")]
    Publish(#[from] EventBusError),

    /// No outcome arrived in time.
    #[error("No outcome for '{idempotency_key}' within {after:?}")]
    Timeout {
        /// Key that timed out.
        idempotency_key: String,
        /// How long the caller waited.
        after: Duration,
    },

    /// The ledger refused the command.
    #[error("Rejected with {}: {}", .0.error_code, .0.error_message)]
    Rejected(ErrorNotification),

    /// The request was abandoned by the caller that published it.
    #[error("Request aborted: {0}")]
    Aborted(String),

    /// An outcome message could not be used.
    #[error("Malformed outcome: {0}")]
    MalformedPayload(String),
}
