//! Ledger side: the engine that applies commands and the stores it writes to.
//!
//! - [`engine`]: [`LedgerEngine`], exactly-once application per idempotency key
//! - [`store`]: the [`LedgerStore`] / [`LedgerUnitOfWork`] contract
//! - [`memory`]: in-process store for tests and local runs
//! - [`postgres`]: PostgreSQL store with row locks and version compare-and-swap

pub mod engine;
pub mod memory;
pub mod postgres;
pub mod store;

pub use engine::{AppliedTransaction, LedgerEngine, LedgerError, LedgerOutcome};
pub use memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use store::{LedgerStore, LedgerUnitOfWork, StoreError};
