//! Command publisher: the front half of the bridge.
//!
//! [`CommandPublisher::publish_and_wait`] turns "publish a command, the outcome shows
//! up later on another topic" into one awaitable call:
//!
//! 1. Serialize the command (a failure here publishes nothing)
//! 2. Register the key; a caller already waiting on it means this call just attaches
//! 3. The first caller publishes, with the correlation metadata as headers
//! 4. Wait on the slot until the router resolves it or the timeout elapses
//!
//! The slot is released on every path by the [`PendingGuard`](super::PendingGuard).

use super::BridgeError;
use super::correlation::{CorrelationTable, Registration, Resolution};
use ledger_bridge_core::environment::Clock;
use ledger_bridge_core::event::{Event, EventMetadata, SerializedEvent};
use ledger_bridge_core::event_bus::EventBus;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Identity of one command on the wire.
#[derive(Debug, Clone, Copy)]
pub struct CommandRoute<'a> {
    /// Broker topic the command goes to.
    pub routing_key: &'a str,
    /// Idempotency key, also the correlation key.
    pub idempotency_key: &'a str,
    /// Identifier of the originating request.
    pub request_id: &'a str,
    /// Request-type tag.
    pub request_type: &'a str,
}

/// Publishes commands and waits for their outcome.
pub struct CommandPublisher {
    event_bus: Arc<dyn EventBus>,
    table: CorrelationTable,
    clock: Arc<dyn Clock>,
}

impl CommandPublisher {
    /// Create a publisher resolving through `table`.
    #[must_use]
    pub fn new(event_bus: Arc<dyn EventBus>, table: CorrelationTable, clock: Arc<dyn Clock>) -> Self {
        Self {
            event_bus,
            table,
            clock,
        }
    }

    /// Correlation table this publisher registers in.
    #[must_use]
    pub const fn table(&self) -> &CorrelationTable {
        &self.table
    }

    /// Publish `command` and wait up to `timeout` for its outcome.
    ///
    /// Concurrent calls with the same idempotency key share one publication and all
    /// receive the same outcome.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::Serialization`] if the command cannot be encoded
    /// - [`BridgeError::Publish`] if the broker refused the command
    /// - [`BridgeError::Rejected`] with the ledger's error notification
    /// - [`BridgeError::Aborted`] if the publishing caller's attempt failed
    /// - [`BridgeError::Timeout`] if no outcome arrived in time
    pub async fn publish_and_wait<C>(
        &self,
        command: &C,
        route: CommandRoute<'_>,
        timeout: Duration,
    ) -> Result<Value, BridgeError>
    where
        C: Event + Serialize,
    {
        let metadata = EventMetadata::for_request(
            route.idempotency_key,
            route.request_id,
            route.request_type,
            self.clock.now(),
        );
        let event = SerializedEvent::from_event(command, metadata)
            .map_err(|e| BridgeError::Serialization(e.to_string()))?;

        let mut guard = match self.table.register(route.idempotency_key) {
            Registration::Attached(guard) => {
                debug!(
                    idempotency_key = %route.idempotency_key,
                    "Command already in flight, waiting on existing request"
                );
                guard
            },
            Registration::Publisher(guard) => {
                if let Err(e) = self.event_bus.publish(route.routing_key, &event).await {
                    warn!(
                        idempotency_key = %route.idempotency_key,
                        topic = %route.routing_key,
                        error = %e,
                        "Failed to publish command"
                    );
                    self.table.resolve(
                        route.idempotency_key,
                        Resolution::Aborted(format!("command could not be published: {e}")),
                    );
                    return Err(BridgeError::Publish(e));
                }
                crate::metrics::record_command_published(route.request_type);
                debug!(
                    idempotency_key = %route.idempotency_key,
                    request_id = %route.request_id,
                    topic = %route.routing_key,
                    "Command published"
                );
                guard
            },
        };

        match guard.wait(timeout).await {
            Some(Resolution::Completed(value)) => Ok(value),
            Some(Resolution::Rejected(notification)) => Err(BridgeError::Rejected(notification)),
            Some(Resolution::Aborted(reason)) => Err(BridgeError::Aborted(reason)),
            None => {
                crate::metrics::record_timeout(route.request_type);
                warn!(
                    idempotency_key = %route.idempotency_key,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "No outcome before timeout"
                );
                Err(BridgeError::Timeout {
                    idempotency_key: route.idempotency_key.to_string(),
                    after: timeout,
                })
            },
        }
    }
}
