//! Topic-based WebSocket fan-out.
//!
//! Outcomes are pushed to real-time subscribers per topic (`/topic/accounts`,
//! `/topic/transactions`). Delivery is best-effort: a slow client drops messages
//! rather than holding anything up.
//!
//! # Message Protocol
//!
//! **Client → Server:**
//! ```json
//! { "type": "subscribe", "topics": ["/topic/transactions"] }
//! { "type": "unsubscribe", "topics": ["/topic/transactions"] }
//! { "type": "ping" }
//! ```
//!
//! **Server → Client:**
//! ```json
//! { "type": "subscribed", "topics": ["/topic/transactions"] }
//! { "type": "event", "topic": "/topic/transactions", "payload": { ... } }
//! { "type": "pong" }
//! ```

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const TOPIC_CAPACITY: usize = 1000;
const CLIENT_QUEUE: usize = 256;

/// Type alias for the channels map to reduce complexity.
type ChannelsMap<A> = Arc<RwLock<HashMap<String, broadcast::Sender<(String, A)>>>>;

/// Per-topic broadcast channels.
///
/// # Example
///
/// ```
/// # async fn example() {
/// use ledger_bridge_web::handlers::websocket_topics::TopicBroadcaster;
///
/// let broadcaster = TopicBroadcaster::<String>::new();
/// let mut rx = broadcaster.subscribe("/topic/accounts").await;
///
/// let delivered = broadcaster.publish("/topic/accounts", "opened".to_string()).await;
/// assert_eq!(delivered, 1);
/// assert_eq!(rx.recv().await.ok().map(|(_, m)| m), Some("opened".to_string()));
/// # }
/// ```
pub struct TopicBroadcaster<A>
where
    A: Clone + Send + 'static,
{
    channels: ChannelsMap<A>,
}

impl<A> TopicBroadcaster<A>
where
    A: Clone + Send + Sync + 'static,
{
    /// Create a new topic broadcaster.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn sender(&self, topic: &str) -> broadcast::Sender<(String, A)> {
        if let Some(sender) = self.channels.read().await.get(topic) {
            return sender.clone();
        }
        self.channels
            .write()
            .await
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Publish to a topic; returns how many subscribers it reached.
    pub async fn publish(&self, topic: impl Into<String>, message: A) -> usize {
        let topic = topic.into();
        let sender = self.sender(&topic).await;
        sender.send((topic, message)).unwrap_or(0)
    }

    /// Subscribe to a topic.
    pub async fn subscribe(&self, topic: impl Into<String>) -> broadcast::Receiver<(String, A)> {
        self.sender(&topic.into()).await.subscribe()
    }

    /// Number of topics that have been published or subscribed to.
    pub async fn topic_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl<A> Default for TopicBroadcaster<A>
where
    A: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for TopicBroadcaster<A>
where
    A: Clone + Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            channels: Arc::clone(&self.channels),
        }
    }
}

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Start receiving the listed topics.
    Subscribe {
        /// Topic names.
        topics: Vec<String>,
    },
    /// Stop receiving the listed topics.
    Unsubscribe {
        /// Topic names.
        topics: Vec<String>,
    },
    /// Keep-alive ping.
    Ping,
}

/// Messages the server sends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage<A> {
    /// Acknowledges a subscribe request.
    Subscribed {
        /// Topic names now active.
        topics: Vec<String>,
    },
    /// A message published on a subscribed topic.
    Event {
        /// Topic it was published on.
        topic: String,
        /// The message.
        payload: A,
    },
    /// Answer to [`ClientMessage::Ping`].
    Pong,
}

/// WebSocket upgrade handler.
///
/// Works with any router state from which a `TopicBroadcaster<A>` can be extracted.
///
/// ```ignore
/// let app = Router::new()
///     .route("/ws", get(handle::<serde_json::Value>))
///     .with_state(app_state); // AppState: FromRef -> TopicBroadcaster<Value>
/// ```
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn handle<A>(
    ws: WebSocketUpgrade,
    State(broadcaster): State<TopicBroadcaster<A>>,
) -> Response
where
    A: Serialize + Clone + Send + Sync + 'static,
{
    ws.on_upgrade(move |socket| handle_socket(socket, broadcaster))
}

/// Forward one topic's messages into the client's outbound queue.
fn spawn_forwarder<A>(
    mut rx: broadcast::Receiver<(String, A)>,
    out: mpsc::Sender<ServerMessage<A>>,
) -> JoinHandle<()>
where
    A: Clone + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok((topic, payload)) => {
                    if out.send(ServerMessage::Event { topic, payload }).await.is_err() {
                        break;
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "WebSocket client lagging, events dropped");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn handle_socket<A>(socket: WebSocket, broadcaster: TopicBroadcaster<A>)
where
    A: Serialize + Clone + Send + Sync + 'static,
{
    info!("WebSocket connection established");

    let (mut sink, mut source) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage<A>>(CLIENT_QUEUE);

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        let mut forwarders: HashMap<String, JoinHandle<()>> = HashMap::new();

        while let Some(Ok(msg)) = source.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Subscribe { topics }) => {
                    for topic in &topics {
                        if !forwarders.contains_key(topic) {
                            let rx = broadcaster.subscribe(topic.as_str()).await;
                            forwarders.insert(topic.clone(), spawn_forwarder(rx, out_tx.clone()));
                        }
                    }
                    debug!(?topics, "Client subscribed");
                    if out_tx.send(ServerMessage::Subscribed { topics }).await.is_err() {
                        break;
                    }
                },
                Ok(ClientMessage::Unsubscribe { topics }) => {
                    for topic in &topics {
                        if let Some(handle) = forwarders.remove(topic) {
                            handle.abort();
                        }
                    }
                    debug!(?topics, "Client unsubscribed");
                },
                Ok(ClientMessage::Ping) => {
                    if out_tx.send(ServerMessage::Pong).await.is_err() {
                        break;
                    }
                },
                Err(e) => warn!(error = %e, "Ignoring malformed WebSocket message"),
            }
        }

        for handle in forwarders.into_values() {
            handle.abort();
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    info!("WebSocket connection closed");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_topic_broadcaster_creation() {
        let broadcaster = TopicBroadcaster::<String>::new();
        assert_eq!(broadcaster.topic_count().await, 0);
    }

    #[tokio::test]
    async fn publish_without_subscribers_reaches_nobody() {
        let broadcaster = TopicBroadcaster::<String>::new();
        assert_eq!(broadcaster.publish("empty", "x".to_string()).await, 0);
    }

    #[tokio::test]
    async fn test_topic_isolation() {
        let broadcaster = TopicBroadcaster::<String>::new();

        let mut rx_a = broadcaster.subscribe("topic_a").await;
        let mut rx_b = broadcaster.subscribe("topic_b").await;

        broadcaster.publish("topic_a", "MessageA".to_string()).await;

        let (topic, msg) = rx_a.recv().await.expect("rx_a should receive");
        assert_eq!(topic, "topic_a");
        assert_eq!(msg, "MessageA");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn forwarder_wraps_events_for_the_client() {
        let broadcaster = TopicBroadcaster::<String>::new();
        let rx = broadcaster.subscribe("t").await;
        let (tx, mut out) = mpsc::channel(4);
        let handle = spawn_forwarder(rx, tx);

        broadcaster.publish("t", "hello".to_string()).await;

        match out.recv().await.expect("forwarded") {
            ServerMessage::Event { topic, payload } => {
                assert_eq!(topic, "t");
                assert_eq!(payload, "hello");
            },
            other => panic!("unexpected message {other:?}"),
        }
        handle.abort();
    }

    #[test]
    fn client_messages_parse() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","topics":["/topic/accounts"]}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Subscribe {
                topics: vec!["/topic/accounts".to_string()]
            }
        );
        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
    }

    #[test]
    fn server_event_serializes_with_type_tag() {
        let msg = ServerMessage::Event {
            topic: "/topic/transactions".to_string(),
            payload: serde_json::json!({"status": "COMPLETED"}),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["payload"]["status"], "COMPLETED");
    }
}
