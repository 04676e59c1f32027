//! # Ledger Bridge Testing
//!
//! Testing utilities for the ledger bridge.
//!
//! This crate provides:
//! - A controllable [`FixedClock`]
//! - An [`InMemoryEventBus`] that stands in for the broker and records publications
//! - An [`UnavailableEventBus`] for broker-down scenarios
//!
//! ## Example
//!
//! ```ignore
//! use ledger_bridge_testing::{InMemoryEventBus, test_clock};
//!
//! #[tokio::test]
//! async fn command_is_published_once() {
//!     let bus = Arc::new(InMemoryEventBus::new());
//!     let services = wire_services(bus.clone(), Arc::new(test_clock()));
//!
//!     services.transactions.create_transaction(request, key).await?;
//!     assert_eq!(bus.publish_count("transactions.events.created"), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use ledger_bridge_core::environment::Clock;

pub mod event_bus;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, PoisonError, RwLock};

    pub use crate::event_bus::{InMemoryEventBus, UnavailableEventBus};

    /// Fixed clock for deterministic tests
    ///
    /// Returns the same time until it is explicitly moved with [`FixedClock::advance`]
    /// or [`FixedClock::set`]. Clones share the same time.
    ///
    /// # Example
    ///
    /// ```
    /// use ledger_bridge_testing::mocks::FixedClock;
    /// use ledger_bridge_core::environment::Clock;
    /// use chrono::{Duration, Utc};
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// assert_eq!(time1, clock.now());
    ///
    /// clock.advance(Duration::hours(1));
    /// assert_eq!(clock.now() - time1, Duration::hours(1));
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.write().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

// Re-export commonly used items
pub use event_bus::{InMemoryEventBus, UnavailableEventBus};
pub use mocks::{FixedClock, test_clock};
