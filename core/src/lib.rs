//! # Ledger Bridge Core
//!
//! Shared contracts for the two processes of the ledger bridge: the API process that
//! publishes commands and waits for their outcome, and the ledger process that applies
//! them.
//!
//! ## Modules
//!
//! - [`event`]: the wire envelope ([`event::SerializedEvent`]) and correlation metadata
//! - [`event_bus`]: the broker contract ([`event_bus::EventBus`])
//! - [`environment`]: injected dependencies such as the clock

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod event;
pub mod event_bus;

/// Environment module - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use ledger_bridge_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
