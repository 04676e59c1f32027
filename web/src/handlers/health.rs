//! Health check endpoint.
//!
//! Used by load balancers and container orchestration to verify the process is up.

use axum::{Json, http::StatusCode};
use serde::Serialize;

/// Liveness report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    /// Always `"ok"` when the process answers.
    pub status: &'static str,
    /// Crate version of the running binary.
    pub version: &'static str,
}

/// Liveness endpoint.
///
/// Does NOT check dependencies (database, broker); a process that answers is alive.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// { "status": "ok", "version": "0.1.0" }
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<HealthReport>) {
    (
        StatusCode::OK,
        Json(HealthReport {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}
