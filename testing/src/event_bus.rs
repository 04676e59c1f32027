//! In-memory broker stand-ins.
//!
//! - [`InMemoryEventBus`]: per-topic broadcast channels that also record every
//!   publication, so tests can count how many times a command went out
//! - [`UnavailableEventBus`]: rejects every publish, for broker-down scenarios

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use futures::stream::{self, StreamExt};
use ledger_bridge_core::event::SerializedEvent;
use ledger_bridge_core::event_bus::{EventBus, EventBusError, EventStream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// In-memory event bus for fast, deterministic tests.
///
/// Every subscriber of a topic receives every event published to it after it
/// subscribed. Publications with no subscriber are recorded but not delivered.
///
/// # Example
///
/// ```
/// use ledger_bridge_testing::InMemoryEventBus;
/// use ledger_bridge_core::event::{EventMetadata, SerializedEvent};
/// use ledger_bridge_core::event_bus::EventBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// let event = SerializedEvent::new("Ping.v1".to_string(), b"{}".to_vec(), EventMetadata::default());
/// bus.publish("pings", &event).await?;
/// assert_eq!(bus.publish_count("pings"), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryEventBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<SerializedEvent>>>>,
    published: Arc<Mutex<Vec<(String, SerializedEvent)>>>,
    capacity: usize,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty bus whose per-topic channels buffer `capacity` events.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            published: Arc::new(Mutex::new(Vec::new())),
            capacity,
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<SerializedEvent> {
        if let Some(sender) = self.topics.read().unwrap().get(topic) {
            return sender.clone();
        }
        self.topics
            .write()
            .unwrap()
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Every event published to `topic`, in publication order.
    #[must_use]
    pub fn published_to(&self, topic: &str) -> Vec<SerializedEvent> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Number of events published to `topic`.
    #[must_use]
    pub fn publish_count(&self, topic: &str) -> usize {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .count()
    }

    /// Number of live subscriptions on `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap()
            .get(topic)
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Wait until `topic` has at least `count` subscriptions.
    ///
    /// Consumers subscribe from a spawned task; tests call this before publishing so
    /// that nothing is lost to the race.
    pub async fn wait_for_subscribers(&self, topic: &str, count: usize) {
        while self.subscriber_count(topic) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Forget every recorded publication.
    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();

        Box::pin(async move {
            self.published
                .lock()
                .unwrap()
                .push((topic.clone(), event.clone()));
            // No subscribers is not an error; the event is simply not delivered.
            let _ = self.sender(&topic).send(event);
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let receivers: Vec<(String, broadcast::Receiver<SerializedEvent>)> = topics
            .iter()
            .map(|t| ((*t).to_string(), self.sender(t).subscribe()))
            .collect();

        Box::pin(async move {
            let streams = receivers.into_iter().map(|(topic, rx)| {
                let per_topic = async_stream::stream! {
                    let mut rx = rx;
                    loop {
                        match rx.recv().await {
                            Ok(event) => yield Ok(event),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                yield Err(EventBusError::TransportError(format!(
                                    "subscriber on '{topic}' lagged by {skipped} events"
                                )));
                            },
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                };
                per_topic.boxed()
            });

            Ok(Box::pin(stream::select_all(streams)) as EventStream)
        })
    }
}

/// Event bus that is never reachable.
///
/// Publishing always fails with [`EventBusError::PublishFailed`]; subscribing yields
/// a stream that never produces anything.
#[derive(Clone, Debug, Default)]
pub struct UnavailableEventBus;

impl EventBus for UnavailableEventBus {
    fn publish(
        &self,
        topic: &str,
        _event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            Err(EventBusError::PublishFailed {
                topic,
                reason: "broker unavailable".to_string(),
            })
        })
    }

    fn subscribe(
        &self,
        _topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        Box::pin(async move { Ok(Box::pin(stream::pending()) as EventStream) })
    }
}
