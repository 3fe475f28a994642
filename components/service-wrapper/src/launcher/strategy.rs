// Local crates
use crate::helpers::load_config::WrapperConfig;

// External crates
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::instrument;

/// How the launch strategy is chosen at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategySelection {
    /// Use the isolated environment when its activation artifact exists,
    /// otherwise the host runtime.
    #[default]
    Auto,
    /// Always use the host runtime.
    Direct,
    /// Always use the isolated environment.
    IsolatedEnv,
}

/// The way the sync program gets started, decided once per wrapper run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchStrategy {
    /// Start the entry point with the runtime found on the host `PATH`.
    Direct {
        /// Interpreter or program name/path.
        interpreter: String,
    },
    /// Start the entry point with the environment's own interpreter and the
    /// environment applied, the way its activation script would.
    IsolatedEnv {
        /// Environment root, exported as `VIRTUAL_ENV`.
        env_dir: PathBuf,
        /// Environment binary directory, prepended to `PATH`.
        bin_dir: PathBuf,
        /// Interpreter inside `bin_dir`.
        interpreter: PathBuf,
    },
}

/// Directory holding the environment's executables.
#[must_use]
pub fn env_bin_dir(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts")
    } else {
        env_dir.join("bin")
    }
}

/// The file whose presence marks a usable isolated environment.
#[must_use]
pub fn activation_artifact(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_bin_dir(env_dir).join("Activate.ps1")
    } else {
        env_bin_dir(env_dir).join("activate")
    }
}

fn env_interpreter(bin_dir: &Path, interpreter: &str) -> PathBuf {
    let name = Path::new(interpreter)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from(interpreter));
    let path = bin_dir.join(name);

    if cfg!(windows) && path.extension().is_none() {
        path.with_extension("exe")
    } else {
        path
    }
}

impl LaunchStrategy {
    /// Pick the strategy for this run.
    #[instrument(
        name = "wrapper_strategy_select",
        target = "launcher::strategy",
        level = "debug",
        skip_all
    )]
    pub fn select(config: &WrapperConfig) -> Self {
        let env_dir = config.isolated_env.clone();
        let artifact = activation_artifact(&env_dir);

        let isolated = match config.strategy {
            StrategySelection::Direct => false,
            StrategySelection::IsolatedEnv => true,
            StrategySelection::Auto => {
                let present = artifact.is_file();
                if !present {
                    tracing::info!(
                        activation_artifact = %artifact.display(),
                        "No isolated environment found, falling back to the host runtime"
                    );
                }
                present
            }
        };

        if isolated {
            let bin_dir = env_bin_dir(&env_dir);
            let interpreter = env_interpreter(&bin_dir, &config.interpreter);
            LaunchStrategy::IsolatedEnv {
                env_dir,
                bin_dir,
                interpreter,
            }
        } else {
            LaunchStrategy::Direct {
                interpreter: config.interpreter.clone(),
            }
        }
    }

    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            LaunchStrategy::Direct { .. } => "direct",
            LaunchStrategy::IsolatedEnv { .. } => "isolated-env",
        }
    }

    /// Program that will be executed.
    #[must_use]
    pub fn program(&self) -> OsString {
        match self {
            LaunchStrategy::Direct { interpreter } => OsString::from(interpreter),
            LaunchStrategy::IsolatedEnv { interpreter, .. } => interpreter.as_os_str().to_owned(),
        }
    }

    /// Build the child command: program, entry point and arguments, working
    /// directory at the installation root, stdout and stderr piped for the
    /// tee, stdin detached.
    #[must_use]
    pub fn command(&self, config: &WrapperConfig) -> Command {
        let mut command = Command::new(self.program());

        if !config.entry_point.is_empty() {
            command.arg(&config.entry_point);
        }
        command
            .args(&config.args)
            .current_dir(&config.install_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let LaunchStrategy::IsolatedEnv {
            env_dir, bin_dir, ..
        } = self
        {
            command
                .env("VIRTUAL_ENV", env_dir)
                .env("PATH", prepend_to_path(bin_dir))
                .env_remove("PYTHONHOME");
        }

        command
    }
}

fn prepend_to_path(dir: &Path) -> OsString {
    let mut entries = vec![dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        entries.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(entries).unwrap_or_else(|_| dir.as_os_str().to_owned())
}
