//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGTERM (unix) or Ctrl+C
//! - Merge them with the in-process shutdown trigger
//!
//! # Design Decisions
//! - A signal handler that fails to install is logged and ignored; the
//!   other sources still work

use tokio::sync::broadcast;

/// What ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    CtrlC,
    Terminate,
    /// [`Shutdown::trigger`](super::Shutdown::trigger) fired, or every
    /// coordinator was dropped.
    Triggered,
}

/// Resolve on the first of Ctrl+C, SIGTERM, or a message (or close) on
/// `trigger`.
pub async fn wait_for_shutdown(mut trigger: broadcast::Receiver<()>) -> ShutdownReason {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let triggered = async {
        let _ = trigger.recv().await;
    };

    let reason = tokio::select! {
        _ = ctrl_c => ShutdownReason::CtrlC,
        _ = terminate => ShutdownReason::Terminate,
        _ = triggered => ShutdownReason::Triggered,
    };
    tracing::info!(reason = ?reason, "Shutdown signal received");
    reason
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_resolves_wait() {
        let shutdown = Shutdown::new();
        let waiter = tokio::spawn(wait_for_shutdown(shutdown.subscribe()));
        shutdown.trigger();
        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::Triggered);
    }

    #[tokio::test]
    async fn test_dropped_coordinator_resolves_wait() {
        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();
        drop(shutdown);
        let reason = tokio::time::timeout(Duration::from_secs(1), wait_for_shutdown(rx))
            .await
            .unwrap();
        assert_eq!(reason, ShutdownReason::Triggered);
    }
}
