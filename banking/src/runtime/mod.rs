//! Runtime components shared by the two binaries.
//!
//! - **`handler`**: the [`EventHandler`] trait consumers dispatch to
//! - **`consumer`**: subscribe-process-reconnect loop over the event bus
//! - **`lifecycle`**: shutdown signal handling and draining background tasks

pub mod consumer;
pub mod handler;
pub mod lifecycle;

pub use consumer::EventConsumer;
pub use handler::EventHandler;
pub use lifecycle::{drain, shutdown_signal};
