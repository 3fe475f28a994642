// Local crates
use crate::launcher::{
    errors::LaunchError,
    tee::{OutputTee, StreamKind, spawn_pump},
};

// External crates
use std::process::ExitStatus;
use std::time::Duration;
use sync_common::helpers::shutdown::Shutdown;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::instrument;

/// How long to wait for the output pumps after the child has exited. Only
/// matters when a grandchild inherited the pipes and keeps them open.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Map a child exit status to the wrapper's own exit code.
///
/// On unix a child terminated by signal N maps to `128 + N`, the shell
/// convention service managers understand.
#[must_use]
pub fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

/// Start `command`, tee its merged output into `capture`, and wait for it.
///
/// If the child cannot be started, the error text is written into
/// `capture` before the error is returned, so the capture file always
/// explains a failed start.
///
/// When `shutdown` fires, the child gets `grace` to exit on its own (it
/// normally receives the same termination signal from its process group or
/// service manager) and is killed afterwards.
#[instrument(
    name = "wrapper_supervise",
    target = "launcher::supervisor",
    level = "info",
    skip_all,
    fields(program = %program)
)]
pub async fn supervise(
    mut command: Command,
    program: &str,
    mut capture: File,
    echo: bool,
    grace: Duration,
    shutdown: &Shutdown,
) -> Result<ExitStatus, LaunchError> {
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(source) => {
            let err = LaunchError::Spawn {
                program: program.to_string(),
                source,
            };
            tracing::error!(error = %err, "Child process failed to start");

            let line = format!("[multi-sync-wrapper] {err}\n");
            if let Err(e) = write_and_sync(&mut capture, line.as_bytes()).await {
                tracing::error!(error = %e, "Failed to record launch failure in capture file");
            }
            if echo {
                let _ = tokio::io::stdout().write_all(line.as_bytes()).await;
            }
            return Err(err);
        }
    };

    tracing::info!(pid = child.id(), "Child process started");

    let (tx, rx) = mpsc::channel(256);
    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(spawn_pump(stdout, StreamKind::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(spawn_pump(stderr, StreamKind::Stderr, tx.clone()));
    }
    // The tee ends once every pump has dropped its sender.
    drop(tx);

    let tee = tokio::spawn(OutputTee::new(capture, echo).run(rx));

    let status = tokio::select! {
        res = child.wait() => res.map_err(LaunchError::Wait)?,
        _ = shutdown.wait_for_shutdown() => {
            tracing::warn!(
                grace_secs = grace.as_secs(),
                "Shutdown requested, waiting for child to exit"
            );
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(res) => res.map_err(LaunchError::Wait)?,
                Err(_) => {
                    tracing::warn!("Grace period elapsed, killing child process");
                    if let Err(e) = child.kill().await {
                        tracing::error!(error = %e, "Failed to kill child process");
                    }
                    child.wait().await.map_err(LaunchError::Wait)?
                }
            }
        }
    };

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, join_pumps(&mut pumps)).await;
    if drained.is_err() {
        tracing::warn!("Child output pipes still open after exit, stopping capture");
        // Dropping the pumps drops their senders, which lets the tee finish.
        for pump in &pumps {
            pump.abort();
        }
    }

    match tee.await {
        Ok(Ok(bytes)) => tracing::debug!(bytes, "Captured child output"),
        Ok(Err(e)) => tracing::error!(error = %e, "Capturing child output failed"),
        Err(e) => tracing::error!(error = %e, "Output tee task failed"),
    }

    tracing::info!(
        exit_code = exit_code(&status),
        success = status.success(),
        "Child process exited"
    );
    Ok(status)
}

async fn join_pumps(pumps: &mut [tokio::task::JoinHandle<std::io::Result<u64>>]) {
    for pump in pumps.iter_mut() {
        match pump.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Reading child output failed"),
            Err(e) => tracing::warn!(error = %e, "Output pump task failed"),
        }
    }
}

async fn write_and_sync(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}
