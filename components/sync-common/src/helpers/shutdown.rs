//! ======================================================================
//!                                 GOALS
//! ======================================================================
//!
//! 1. No batch that is already being written is abruptly interrupted
//! 2. Work that has not started yet never starts once shutdown is requested
//! 3. Every long wait (sync interval, window re-check, child grace period)
//!    wakes up as soon as shutdown is requested
//!
//! ======================================================================
//!                             BUILDING BLOCKS
//! ======================================================================
//!
//! 1. Shutdown coordinator
//! - A cheap-to-clone handle over a `CancellationToken`. Every component
//! holds a clone and either polls `is_triggered()` between units of work or
//! awaits `wait_for_shutdown()` inside a `tokio::select!`.
//!
//! 2. A signal listener
//! - A background task that listens for CTRL+C / SIGINT and SIGTERM
//! (systemd stop, NSSM stop) and triggers the coordinator on the first one.
//! Later signals are only logged.
// External crates
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Process-wide shutdown coordinator.
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Creates a new, untriggered coordinator.
    #[instrument(name = "sync_shutdown_channel", target = "helpers::shutdown", level = "trace")]
    pub fn new() -> Self {
        tracing::trace!("Creating new shutdown coordinator");
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Request shutdown, waking every waiter.
    #[instrument(
        name = "sync_shutdown_trigger",
        target = "helpers::shutdown",
        level = "trace",
        skip_all
    )]
    pub fn trigger(&self) {
        tracing::trace!("Shutdown triggered, notifying all waiters");
        self.token.cancel();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// Sleep for `duration` unless shutdown arrives first.
    ///
    /// Returns `true` when the full duration elapsed and `false` when the
    /// sleep was cut short by shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Spawn the OS signal listener for this coordinator.
    ///
    /// The first SIGINT/SIGTERM triggers shutdown; any later signal is logged
    /// as "already in progress". The task runs for the lifetime of the process.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let shutdown = self.clone();

        tokio::spawn(async move {
            loop {
                let name = match next_signal().await {
                    Ok(name) => name,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to listen for termination signals");
                        return;
                    }
                };

                if shutdown.is_triggered() {
                    tracing::warn!(
                        signal = name,
                        "Shutdown already in progress, signal received again"
                    );
                } else {
                    tracing::warn!(
                        signal = name,
                        "Signal received, gracefully shutting down after current tasks"
                    );
                    shutdown.trigger();
                }
            }
        })
    }
}

#[cfg(unix)]
async fn next_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn next_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "CTRL_C")
}
