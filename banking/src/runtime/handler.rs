//! Event handler trait.
//!
//! The [`EventConsumer`](super::EventConsumer) hands every message it receives to an
//! `EventHandler`. Handlers get the whole envelope, not just the body, because both
//! sides of the bridge need the correlation metadata.
//!
//! # Example
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//!
//! struct AuditLog;
//!
//! #[async_trait]
//! impl EventHandler for AuditLog {
//!     async fn handle(&self, event: &SerializedEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!         tracing::info!(event_type = %event.event_type, "Seen");
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;
use ledger_bridge_core::event::SerializedEvent;

/// Processes one message from the event bus.
///
/// Errors are logged by the consumer, which then moves on to the next message; a
/// handler never stops the loop.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message is malformed or could not be processed.
    async fn handle(&self, event: &SerializedEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
