//! Broker abstraction for the command and outcome channels.
//!
//! The API process publishes commands and subscribes to outcome topics; the ledger
//! process does the reverse. Both talk to the broker only through [`EventBus`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  command   ┌──────────────┐
//! │  API process │──────────▶│    Broker    │
//! │  (publisher) │            └──────┬───────┘
//! └──────▲───────┘                   │
//!        │ outcome                   ▼
//!        │                   ┌──────────────┐
//!        └───────────────────│ Ledger proc. │
//!                            └──────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: messages may be delivered multiple times
//! - **Idempotency**: consumers dedupe on the idempotency key in the metadata
//! - **Ordered per key**: messages sharing an idempotency key keep their order
//!
//! # Topic Naming Convention
//!
//! Topics are routing keys of the form `{domain}.events.{stage}`:
//! - `transactions.events.created` - transaction commands
//! - `transactions.events.completed` - successful outcomes
//! - `transactions.events.failed` - error notifications

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// A received message could not be turned into an event
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Stream of events from subscriptions.
///
/// Each item is a `Result`: a malformed message surfaces as an `Err` item and the
/// stream keeps going.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Publish/subscribe access to the broker.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so that services can hold an `Arc<dyn EventBus>` and swap the broker for an
/// in-memory one in tests.
///
/// # Examples
///
/// ```rust,ignore
/// use futures::StreamExt;
///
/// event_bus.publish("transactions.events.created", &command).await?;
///
/// let mut stream = event_bus.subscribe(&["transactions.events.completed"]).await?;
/// while let Some(result) = stream.next().await {
///     match result {
///         Ok(event) => router.handle(&event).await?,
///         Err(e) => tracing::error!("Stream error: {}", e),
///     }
/// }
/// ```
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker did not accept the message.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of events.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
