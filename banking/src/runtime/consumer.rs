//! Event bus consumer with automatic reconnection.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     try_subscribe:
//!         loop {
//!             process_events:
//!                 - Handle event
//!                 - Log errors and handler panics (don't crash)
//!                 - Check shutdown signal
//!         }
//!         if connection_lost:
//!             wait_and_retry
//! }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = EventConsumer::builder()
//!     .name("transaction-outcomes")
//!     .topics(routing.transaction_outcome_topics())
//!     .event_bus(event_bus)
//!     .handler(router)
//!     .shutdown(shutdown_tx.subscribe())
//!     .build()?;
//!
//! let handle = consumer.spawn();
//! ```

use super::EventHandler;
use futures::{FutureExt, StreamExt};
use ledger_bridge_core::event_bus::{EventBus, EventStream};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// A required builder field was not set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("EventConsumer is missing required field '{0}'")]
pub struct MissingField(pub &'static str);

/// Consumes topics from the event bus and feeds each message to a handler.
///
/// Runs until the shutdown broadcast fires. A failed subscription or a stream that ends
/// is retried after `retry_delay` (default 5 seconds).
pub struct EventConsumer {
    name: String,
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
}

enum StreamEnd {
    Shutdown,
    Ended,
}

impl EventConsumer {
    /// Create a consumer with the default retry delay.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topics: Vec<String>,
        event_bus: Arc<dyn EventBus>,
        handler: Arc<dyn EventHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topics,
            event_bus,
            handler,
            shutdown,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Create a builder.
    #[must_use]
    pub fn builder() -> EventConsumerBuilder {
        EventConsumerBuilder::default()
    }

    /// Consumer name used in logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the consumer loop as a background task.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(consumer = %self.name, "Event consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    break;
                }
                result = self.event_bus.subscribe(&topics) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(consumer = %self.name, topics = ?self.topics, "Subscribed to event bus");
                    if matches!(self.process_stream(&mut stream).await, StreamEnd::Shutdown) {
                        break;
                    }
                    warn!(
                        consumer = %self.name,
                        "Event stream ended, reconnecting in {:?}",
                        self.retry_delay
                    );
                },
                Err(e) => {
                    error!(
                        consumer = %self.name,
                        error = %e,
                        "Failed to subscribe to event bus, retrying in {:?}",
                        self.retry_delay
                    );
                },
            }

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(self.retry_delay) => {}
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    async fn process_stream(&mut self, stream: &mut EventStream) -> StreamEnd {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal during processing");
                    return StreamEnd::Shutdown;
                }
                next = stream.next() => match next {
                    Some(Ok(event)) => {
                        let handled = AssertUnwindSafe(self.handler.handle(&event)).catch_unwind().await;
                        match handled {
                            Ok(Ok(())) => {},
                            Ok(Err(e)) => error!(
                                consumer = %self.name,
                                event_type = %event.event_type,
                                idempotency_key = event.metadata.idempotency_key.as_deref().unwrap_or("-"),
                                error = %e,
                                "Failed to handle event"
                            ),
                            Err(_) => error!(
                                consumer = %self.name,
                                event_type = %event.event_type,
                                idempotency_key = event.metadata.idempotency_key.as_deref().unwrap_or("-"),
                                "Event handler panicked, skipping event"
                            ),
                        }
                    },
                    Some(Err(e)) => {
                        error!(consumer = %self.name, error = %e, "Error receiving event from stream");
                    },
                    None => return StreamEnd::Ended,
                },
            }
        }
    }
}

/// Builder for [`EventConsumer`].
#[derive(Default)]
pub struct EventConsumerBuilder {
    name: Option<String>,
    topics: Option<Vec<String>>,
    event_bus: Option<Arc<dyn EventBus>>,
    handler: Option<Arc<dyn EventHandler>>,
    shutdown: Option<broadcast::Receiver<()>>,
    retry_delay: Option<Duration>,
}

impl EventConsumerBuilder {
    /// Set consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set topics to subscribe to.
    #[must_use]
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Set event bus instance.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Set event handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set custom retry delay (default: 5 seconds).
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Build the `EventConsumer`.
    ///
    /// # Errors
    ///
    /// Returns [`MissingField`] if name, topics, event bus, handler or shutdown is unset.
    pub fn build(self) -> Result<EventConsumer, MissingField> {
        Ok(EventConsumer {
            name: self.name.ok_or(MissingField("name"))?,
            topics: self.topics.ok_or(MissingField("topics"))?,
            event_bus: self.event_bus.ok_or(MissingField("event_bus"))?,
            handler: self.handler.ok_or(MissingField("handler"))?,
            shutdown: self.shutdown.ok_or(MissingField("shutdown"))?,
            retry_delay: self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY),
        })
    }
}
