//! Signal handling for graceful shutdown.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for SIGINT, SIGTERM or SIGQUIT.
///
/// If a handler cannot be installed the function falls back to Ctrl-C only.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let handlers = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    );

    let (mut sigint, mut sigterm, mut sigquit) = match handlers {
        (Ok(int), Ok(term), Ok(quit)) => (int, term, quit),
        _ => {
            warn!("Failed to install unix signal handlers, falling back to ctrl-c");
            ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => info!(message = "Signal received.", signal = "SIGINT"),
        _ = sigterm.recv() => info!(message = "Signal received.", signal = "SIGTERM"),
        _ = sigquit.recv() => info!(message = "Signal received.", signal = "SIGQUIT"),
    }
}

#[cfg(not(unix))]
pub async fn shutdown_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(message = "Signal received.", signal = "ctrl-c"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for ctrl-c, shutdown must come from the token");
            std::future::pending::<()>().await;
        }
    }
}

/// Cancel `shutdown` when a termination signal arrives.
pub fn spawn_shutdown_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_child_tokens_follow_parent() {
        let shutdown = CancellationToken::new();
        let run = shutdown.child_token();
        let asset = run.child_token();

        shutdown.cancel();

        assert!(run.is_cancelled());
        assert!(asset.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_cancel_does_not_reach_parent() {
        let shutdown = CancellationToken::new();
        let run = shutdown.child_token();

        run.cancel();

        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_shutdown_cancellation_is_immediate() {
        let shutdown = CancellationToken::new();
        let waiter = shutdown.clone();

        let handle = tokio::spawn(async move {
            waiter
                .run_until_cancelled(tokio::time::sleep(Duration::from_secs(10)))
                .await
                .is_none()
        });

        shutdown.cancel();

        let cancelled = tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("task should complete quickly")
            .expect("task should not panic");

        assert!(cancelled);
    }
}
