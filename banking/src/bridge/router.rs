//! Notification router: the back half of the bridge.
//!
//! Consumes one domain's success and failure topics. For every outcome it:
//!
//! 1. Records it in the [`IdempotencyGuard`] (success) or clears an in-flight key (failure)
//! 2. Resolves the pending slot, waking the HTTP caller
//! 3. Pushes a flattened copy to the domain's WebSocket topic
//!
//! An outcome nobody is waiting for (the caller timed out, or this process restarted)
//! still lands in the guard, so a retry with the same key gets it. The miss is logged
//! and counted.

use super::correlation::{CorrelationTable, Resolution};
use super::{BridgeError, IdempotencyGuard};
use crate::messages::{COMMAND_REJECTED, ErrorNotification};
use crate::runtime::EventHandler;
use async_trait::async_trait;
use ledger_bridge_core::event::SerializedEvent;
use ledger_bridge_web::TopicBroadcaster;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-domain knowledge the router needs.
pub trait OutcomeHandler: Send + Sync + 'static {
    /// Short domain name for logs (`accounts`, `transactions`).
    fn domain(&self) -> &'static str;

    /// Request-type tag of the commands whose outcomes this domain receives.
    fn request_type(&self) -> &'static str;

    /// Event type of the success outcome.
    fn success_event_type(&self) -> &'static str;

    /// WebSocket topic outcomes are pushed to.
    fn topic(&self) -> &'static str;

    /// Turn a success outcome into the payload returned to the HTTP caller.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MalformedPayload`] if the body does not decode.
    fn shape(&self, event: &SerializedEvent) -> Result<Value, BridgeError>;
}

/// Routes one domain's outcomes back to waiting callers.
pub struct NotificationRouter<H> {
    handler: H,
    table: CorrelationTable,
    guard: Arc<IdempotencyGuard>,
    broadcaster: TopicBroadcaster<Value>,
}

impl<H: OutcomeHandler> NotificationRouter<H> {
    /// Create a router resolving slots in `table`.
    #[must_use]
    pub const fn new(
        handler: H,
        table: CorrelationTable,
        guard: Arc<IdempotencyGuard>,
        broadcaster: TopicBroadcaster<Value>,
    ) -> Self {
        Self {
            handler,
            table,
            guard,
            broadcaster,
        }
    }

    /// Apply one outcome message.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::MalformedPayload`] for a message without a correlation key,
    /// of an unknown type, or whose body does not decode.
    pub async fn route(&self, event: &SerializedEvent) -> Result<(), BridgeError> {
        let Some(key) = event.metadata.correlation_key() else {
            crate::metrics::record_uncorrelated(self.handler.domain());
            return Err(BridgeError::MalformedPayload(format!(
                "{} carries no idempotency key or request id",
                event.event_type
            )));
        };

        let (resolution, pushed) = if event.event_type == self.handler.success_event_type() {
            let payload = self.handler.shape(event)?;
            self.guard
                .mark_processed(key, self.handler.request_type(), payload.clone());
            (Resolution::Completed(payload.clone()), payload)
        } else if event.event_type == COMMAND_REJECTED {
            let notification: ErrorNotification = event
                .decode()
                .map_err(|e| BridgeError::MalformedPayload(e.to_string()))?;
            self.guard.clear(key);
            let pushed = rejection_payload(key, &notification);
            (Resolution::Rejected(notification), pushed)
        } else {
            return Err(BridgeError::MalformedPayload(format!(
                "unexpected event type {} on {} outcomes",
                event.event_type,
                self.handler.domain()
            )));
        };

        if self.table.resolve(key, resolution) {
            debug!(domain = self.handler.domain(), idempotency_key = %key, "Pending request resolved");
        } else {
            crate::metrics::record_uncorrelated(self.handler.domain());
            info!(
                domain = self.handler.domain(),
                idempotency_key = %key,
                event_type = %event.event_type,
                "Outcome has no waiting request"
            );
        }

        let delivered = self.broadcaster.publish(self.handler.topic(), pushed).await;
        debug!(topic = self.handler.topic(), delivered, "Outcome pushed to subscribers");
        Ok(())
    }
}

/// Flat map pushed to subscribers for a rejected command.
fn rejection_payload(key: &str, notification: &ErrorNotification) -> Value {
    json!({
        "status": "FAILED",
        "idempotencyKey": key,
        "errorCode": notification.error_code,
        "errorMessage": notification.error_message,
        "requestId": notification.request_id,
        "timestamp": notification.timestamp,
    })
}

#[async_trait]
impl<H: OutcomeHandler> EventHandler for NotificationRouter<H> {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.route(event).await.map_err(|e| {
            warn!(domain = self.handler.domain(), error = %e, "Dropping outcome");
            Box::new(e) as Box<dyn std::error::Error + Send + Sync>
        })
    }
}
