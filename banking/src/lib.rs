//! Banking ledger behind a synchronous HTTP API, bridged over a message broker.
//!
//! Two processes cooperate:
//!
//! - **`banking-api`** accepts HTTP commands, publishes them to the broker and holds the
//!   HTTP request open until the matching outcome comes back on another topic
//! - **`banking-ledger`** consumes the commands, applies them to the ledger exactly once
//!   per idempotency key, and publishes a success or failure outcome
//!
//! # Architecture
//!
//! ```text
//!   HTTP                                   ┌──────────────────────┐
//!    │                                     │    banking-ledger    │
//!    ▼                                     │                      │
//! ┌───────────────┐  *.events.created      │  CommandProcessor    │
//! │ Account/Trans │ ─────────────────────▶ │        │             │
//! │   Services    │                        │        ▼             │
//! │      │        │                        │  LedgerEngine ─▶ DB  │
//! │ IdempotencyGuard                       │                      │
//! │ CommandPublisher                       └──────────┬───────────┘
//! │      ▲ wait   │  *.events.completed/failed        │
//! │ CorrelationTable ◀── NotificationRouter ◀─────────┘
//! └───────────────┘            │
//!                              └──▶ /topic/* WebSocket subscribers
//! ```
//!
//! # Modules
//!
//! - [`domain`]: accounts, balances, transactions, money
//! - [`messages`]: commands, outcome events, error notifications, routing keys
//! - [`bridge`]: idempotency guard, correlation table, publisher, router
//! - [`ledger`]: engine and stores
//! - [`services`]: API-side services and the ledger-side command processor
//! - [`runtime`]: event consumer loop and process lifecycle
//! - [`api`]: axum routes and handlers

pub mod api;
pub mod bridge;
pub mod config;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod messages;
pub mod metrics;
pub mod runtime;
pub mod services;

pub use config::Config;
pub use error::BankingError;
