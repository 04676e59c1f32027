//! API-side idempotency guard.
//!
//! A process-local cache of idempotency keys the API has seen. Completed entries hold
//! the shaped response so a sequential replay answers without a broker round trip.
//!
//! The guard is only a cache. A key that is in flight, or that this process never saw
//! complete, is published again: the ledger's processed-message record is the
//! authority and replays the stored outcome.
//!
//! Completed entries remember the request type that produced them, so a key reused
//! across request types is caught before anything is published.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use ledger_bridge_core::environment::Clock;
use serde_json::Value;
use std::sync::Arc;

/// A completed request remembered by the guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRequest {
    /// Request-type tag of the command that completed (`ACCOUNT_CREATE`, ...).
    pub request_type: String,
    /// Shaped response returned to the caller.
    pub payload: Value,
}

#[derive(Debug, Clone)]
enum GuardEntry {
    InFlight { since: DateTime<Utc> },
    Completed { request: CompletedRequest, at: DateTime<Utc> },
}

impl GuardEntry {
    const fn touched_at(&self) -> DateTime<Utc> {
        match self {
            Self::InFlight { since } => *since,
            Self::Completed { at, .. } => *at,
        }
    }
}

/// Idempotency keys seen by this API process.
///
/// # Example
///
/// ```
/// use banking::bridge::IdempotencyGuard;
/// use chrono::Duration;
/// use ledger_bridge_core::environment::SystemClock;
/// use std::sync::Arc;
///
/// let guard = IdempotencyGuard::new(Arc::new(SystemClock), Duration::hours(24));
/// assert!(!guard.is_processed("k-1"));
///
/// guard.mark_processed("k-1", "TRANSACTION_CREATE", serde_json::json!({"status": "COMPLETED"}));
/// assert!(guard.is_processed("k-1"));
/// assert_eq!(guard.completed("k-1").unwrap().request_type, "TRANSACTION_CREATE");
/// ```
pub struct IdempotencyGuard {
    entries: DashMap<String, GuardEntry>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl IdempotencyGuard {
    /// Create a guard whose entries expire `ttl` after their last update.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            ttl,
        }
    }

    fn is_live(&self, entry: &GuardEntry) -> bool {
        self.clock.now() - entry.touched_at() < self.ttl
    }

    /// Whether the key is in flight or completed (and not expired).
    #[must_use]
    pub fn is_processed(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| self.is_live(&entry))
    }

    /// Record that a command for `key` is about to be published.
    ///
    /// Leaves a completed entry untouched.
    pub fn mark_in_flight(&self, key: &str) {
        let since = self.clock.now();
        self.entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if matches!(entry, GuardEntry::InFlight { .. }) {
                    *entry = GuardEntry::InFlight { since };
                }
            })
            .or_insert(GuardEntry::InFlight { since });
    }

    /// Record the shaped outcome of a `request_type` command for `key`.
    pub fn mark_processed(&self, key: &str, request_type: impl Into<String>, payload: Value) {
        let at = self.clock.now();
        let request = CompletedRequest {
            request_type: request_type.into(),
            payload,
        };
        self.entries
            .insert(key.to_string(), GuardEntry::Completed { request, at });
    }

    /// Forget an in-flight `key`, so the next request with it is published again.
    ///
    /// A completed entry stays until it expires.
    pub fn clear(&self, key: &str) {
        self.entries
            .remove_if(key, |_, entry| matches!(entry, GuardEntry::InFlight { .. }));
    }

    /// The stored outcome for `key`, if it completed and has not expired.
    #[must_use]
    pub fn completed(&self, key: &str) -> Option<CompletedRequest> {
        let entry = self.entries.get(key)?;
        match entry.value() {
            GuardEntry::Completed { request, .. } if self.is_live(&entry) => Some(request.clone()),
            _ => None,
        }
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let now = self.clock.now();
        self.entries
            .retain(|_, entry| now - entry.touched_at() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
