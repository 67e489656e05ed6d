//! Graceful Shutdown Module
//!
//! Background loops are cancelled and joined before the stores and the event
//! bus connection they use are closed.

use std::fmt;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time to wait for each background task
    pub timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Reason for shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    SigTerm,
    SigInt,
    /// The HTTP server stopped on its own
    ServerExited,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::SigTerm => write!(f, "SIGTERM"),
            ShutdownReason::SigInt => write!(f, "SIGINT"),
            ShutdownReason::ServerExited => write!(f, "server exited"),
        }
    }
}

/// Named background tasks, joined in registration order
#[derive(Default)]
pub struct BackgroundTasks {
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.tasks.push((name, handle));
    }

    /// Cancel and wait for every task. Returns true if all stopped in time.
    pub async fn shutdown(self, cancel: &CancellationToken, config: &ShutdownConfig) -> bool {
        info!(
            "Starting graceful shutdown sequence with {} components",
            self.tasks.len()
        );
        cancel.cancel();

        let mut clean = true;
        for (name, handle) in self.tasks {
            let abort = handle.abort_handle();
            match timeout(config.timeout, handle).await {
                Ok(Ok(())) => info!(component = name, "Component stopped"),
                Ok(Err(e)) => {
                    error!(component = name, error = %e, "Component task failed");
                    clean = false;
                }
                Err(_) => {
                    warn!(
                        component = name,
                        "Component did not stop within {:?}, aborting", config.timeout
                    );
                    abort.abort();
                    clean = false;
                }
            }
        }
        clean
    }
}

/// Wait for SIGINT or SIGTERM
pub async fn wait_for_signal() -> ShutdownReason {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => ShutdownReason::SigInt,
            Err(e) => {
                error!("Failed to register ctrl-c handler: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let term = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                ShutdownReason::SigTerm
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let term = std::future::pending::<ShutdownReason>();

    tokio::select! {
        reason = ctrl_c => reason,
        reason = term => reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tasks_observe_cancellation() {
        let cancel = CancellationToken::new();
        let mut tasks = BackgroundTasks::new();
        for name in ["reconciler", "registry"] {
            let token = cancel.clone();
            tasks.push(name, tokio::spawn(async move { token.cancelled().await }));
        }

        assert!(tasks.shutdown(&cancel, &ShutdownConfig::default()).await);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_task_is_aborted_after_timeout() {
        let cancel = CancellationToken::new();
        let mut tasks = BackgroundTasks::new();
        tasks.push("stuck", tokio::spawn(std::future::pending::<()>()));

        let config = ShutdownConfig {
            timeout: Duration::from_secs(1),
        };
        assert!(!tasks.shutdown(&cancel, &config).await);
    }
}
