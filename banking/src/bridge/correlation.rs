//! Pending-request correlation table.
//!
//! One slot per idempotency key in flight. A slot is a single-resolution `watch`
//! channel: the notification router writes the outcome once, and every caller waiting
//! on that key sees it. Concurrent callers with the same key attach to the existing slot
//! instead of publishing again.
//!
//! Each waiter holds a [`PendingGuard`]; the slot is removed when the last guard drops,
//! whether the caller got an answer, an error or a timeout.

use crate::messages::ErrorNotification;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// How a pending request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Success outcome, already shaped for the caller.
    Completed(Value),
    /// Business error reported by the ledger.
    Rejected(ErrorNotification),
    /// The request was abandoned before reaching the ledger (e.g. publish failed).
    Aborted(String),
}

struct PendingSlot {
    outcome: watch::Sender<Option<Resolution>>,
    waiters: AtomicUsize,
}

/// Outcome of [`CorrelationTable::register`].
pub enum Registration {
    /// First caller for the key: it must publish the command.
    Publisher(PendingGuard),
    /// A command for the key is already in flight: just wait.
    Attached(PendingGuard),
}

/// Shared map from idempotency key to pending slot.
///
/// Cloning is cheap and clones share the same slots; the publisher and the router of one
/// process hold clones of one table.
#[derive(Clone, Default)]
pub struct CorrelationTable {
    slots: Arc<DashMap<String, PendingSlot>>,
}

impl CorrelationTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `key`, creating the slot when none exists.
    #[must_use]
    pub fn register(&self, key: &str) -> Registration {
        let registration = match self.slots.entry(key.to_string()) {
            Entry::Occupied(slot) => {
                slot.get().waiters.fetch_add(1, Ordering::AcqRel);
                Registration::Attached(self.guard(key, slot.get().outcome.subscribe()))
            },
            Entry::Vacant(vacant) => {
                let (outcome, receiver) = watch::channel(None);
                vacant.insert(PendingSlot {
                    outcome,
                    waiters: AtomicUsize::new(1),
                });
                Registration::Publisher(self.guard(key, receiver))
            },
        };
        crate::metrics::record_pending_requests(self.slots.len());
        registration
    }

    fn guard(&self, key: &str, outcome: watch::Receiver<Option<Resolution>>) -> PendingGuard {
        PendingGuard {
            slots: Arc::clone(&self.slots),
            key: key.to_string(),
            outcome,
        }
    }

    /// Resolve the slot for `key`.
    ///
    /// Returns `false` when nobody is waiting on `key` or the slot was already resolved.
    pub fn resolve(&self, key: &str, resolution: Resolution) -> bool {
        self.slots.get(key).is_some_and(|slot| {
            slot.outcome.send_if_modified(|current| {
                if current.is_some() {
                    return false;
                }
                *current = Some(resolution);
                true
            })
        })
    }

    /// Whether a slot exists for `key`.
    #[must_use]
    pub fn is_pending(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    /// Number of keys with at least one waiter.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.slots.len()
    }
}

/// One waiter's hold on a pending slot. Dropping it releases the hold.
pub struct PendingGuard {
    slots: Arc<DashMap<String, PendingSlot>>,
    key: String,
    outcome: watch::Receiver<Option<Resolution>>,
}

impl PendingGuard {
    /// Key this guard waits on.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the slot to be resolved.
    ///
    /// Returns `None` if `timeout` elapses first.
    pub async fn wait(&mut self, timeout: Duration) -> Option<Resolution> {
        match tokio::time::timeout(timeout, self.outcome.wait_for(Option::is_some)).await {
            Ok(Ok(current)) => (*current).clone(),
            Ok(Err(_)) => Some(Resolution::Aborted("pending slot closed".to_string())),
            Err(_) => None,
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.slots.remove_if(&self.key, |_, slot| {
            slot.waiters.fetch_sub(1, Ordering::AcqRel) == 1
        });
        crate::metrics::record_pending_requests(self.slots.len());
    }
}
