//! Process lifecycle helpers: waiting for a termination signal and draining tasks.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Resolve when the process receives Ctrl+C or SIGTERM.
///
/// If a signal handler cannot be installed the error is logged and that signal is
/// ignored.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}

/// Wait for background tasks to finish, giving each at most `timeout`.
pub async fn drain(handles: Vec<(String, JoinHandle<()>)>, timeout: Duration) {
    for (name, handle) in handles {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!(task = %name, "Task stopped gracefully"),
            Ok(Err(e)) => warn!(task = %name, error = %e, "Task failed"),
            Err(_) => warn!(task = %name, "Task shutdown timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_returns_even_when_a_task_hangs() {
        let finished = tokio::spawn(async {});
        let hanging = tokio::spawn(std::future::pending::<()>());

        tokio::time::timeout(
            Duration::from_secs(1),
            drain(
                vec![("done".to_string(), finished), ("stuck".to_string(), hanging)],
                Duration::from_millis(20),
            ),
        )
        .await
        .unwrap_or_else(|_| unreachable!("drain is bounded by the per-task timeout"));
    }
}
