//! HTTP request handlers shared by every service.

pub mod health;
pub mod websocket_topics;

// Re-export common handler utilities
pub use health::health_check;
pub use websocket_topics::TopicBroadcaster;
