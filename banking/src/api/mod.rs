//! HTTP API.
//!
//! - `POST /api/accounts` - open an account (201)
//! - `GET /api/accounts/:id` - account with balances
//! - `POST /api/transactions` - move money (201)
//! - `GET /api/accounts/:id/transactions` - transaction history
//! - `GET /health` - liveness
//! - `GET /ws` - WebSocket push of `/topic/accounts` and `/topic/transactions`
//!
//! Command endpoints accept an optional `Idempotency-Key` header; one is generated when
//! absent.

pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
