//! Process-wide shutdown coordination.
//!
//! One token reaches every task that talks to the kernel (classifier
//! manager, map tracer, ring reader); the downstream stages drain out
//! behind them when their input channels close, so final eviction
//! batches still reach the exporter boundary before the process exits.

use infrastructure::constants::GRACEFUL_SHUTDOWN_TIMEOUT;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Arm the process-wide token: the first SIGINT or SIGTERM cancels
    /// it.
    pub fn install() -> Self {
        let token = CancellationToken::new();
        let armed = token.clone();
        tokio::spawn(async move {
            signal_received().await;
            armed.cancel();
        });
        Self { token }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Block until the token fires, then give the pipeline a bounded
    /// window to drain. Tasks are awaited in pipeline order; whatever
    /// is still running when the window closes is abandoned.
    pub async fn wait_and_drain(self, tasks: Vec<JoinHandle<()>>) {
        self.token.cancelled().await;
        info!("shutdown signal received, stopping");

        let drain = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, drain)
            .await
            .is_err()
        {
            warn!("graceful shutdown timed out, exiting anyway");
        }
    }
}

/// Resolves on the first of SIGINT or SIGTERM. When the SIGTERM
/// listener cannot be installed the agent still honors Ctrl+C.
async fn signal_received() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM, handling SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_completes_when_tasks_finish() {
        let shutdown = Shutdown {
            token: CancellationToken::new(),
        };
        let token = shutdown.token();
        let task = tokio::spawn(async {});
        token.cancel();
        // returns promptly: the token is already cancelled and the task
        // is trivially done
        shutdown.wait_and_drain(vec![task]).await;
    }

    #[tokio::test]
    async fn drain_gives_up_on_stuck_tasks() {
        let shutdown = Shutdown {
            token: CancellationToken::new(),
        };
        let token = shutdown.token();
        let stuck = tokio::spawn(std::future::pending::<()>());
        token.cancel();

        tokio::time::pause();
        shutdown.wait_and_drain(vec![stuck]).await;
        // reaching this point means the timeout fired instead of
        // blocking on the pending task forever
    }
}
