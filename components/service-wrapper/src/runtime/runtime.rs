// Local crates
use crate::{
    helpers::{
        load_config::WrapperConfig,
        log_dir::{ensure_log_dir, open_capture_file},
    },
    launcher::{
        errors::LaunchError,
        strategy::LaunchStrategy,
        supervisor::{exit_code, supervise},
    },
};

// External crates
use sync_common::helpers::shutdown::Shutdown;
use tracing::instrument;

/// One wrapper run: prepare the log directory, choose the launch strategy,
/// run the sync program from the installation root with its output
/// captured, and return the exit code to terminate with.
///
/// `config` must already be resolved (see [`WrapperConfig::resolve`]).
/// Errors are returned before anything is launched when the installation
/// root or the log directory is unusable.
#[instrument(
    name = "wrapper_runtime",
    target = "runtime::runtime",
    level = "info",
    skip_all,
    fields(install_root = %config.install_root.display())
)]
pub async fn run_wrapper(config: &WrapperConfig, shutdown: &Shutdown) -> Result<i32, LaunchError> {
    if !config.install_root.is_dir() {
        tracing::error!("Installation root is missing");
        return Err(LaunchError::InstallRoot(config.install_root.clone()));
    }

    ensure_log_dir(&config.log_dir).await?;

    let strategy = LaunchStrategy::select(config);
    let program = strategy.program().to_string_lossy().into_owned();
    tracing::info!(
        strategy = strategy.name(),
        program = %program,
        entry_point = %config.entry_point,
        "Launch strategy selected"
    );

    let capture_path = config.capture_path();
    let capture = open_capture_file(&capture_path, config.log_mode, config.max_log_bytes).await?;
    tracing::info!(capture_file = %capture_path.display(), "Capturing child output");

    let command = strategy.command(config);
    let status = supervise(
        command,
        &program,
        capture,
        config.echo_to_console,
        config.grace_period(),
        shutdown,
    )
    .await?;

    Ok(exit_code(&status))
}
