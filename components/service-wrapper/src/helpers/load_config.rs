// Local crates
use crate::launcher::strategy::StrategySelection;

// External crates
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Prefix for environment overrides, e.g. `MULTI_SYNC_WRAPPER_INSTALL_ROOT`.
pub const ENV_PREFIX: &str = "MULTI_SYNC_WRAPPER";

/// What to do with an existing capture file when the wrapper starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// Keep previous output and append to it.
    #[default]
    Append,
    /// Start every run with an empty file.
    Truncate,
}

/// Deployment layout and launch settings of the wrapper.
///
/// Relative paths are interpreted against `install_root` once
/// [`WrapperConfig::resolve`] has run.
#[derive(Debug, Clone, Deserialize)]
pub struct WrapperConfig {
    /// Installation root; the child runs with this as its working directory.
    #[serde(default = "default_install_root")]
    pub install_root: PathBuf,
    /// Log directory, created on startup if missing.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Capture file name inside `log_dir`.
    #[serde(default = "default_log_file")]
    pub log_file: String,
    /// Append to or truncate the capture file on startup.
    #[serde(default)]
    pub log_mode: LogMode,
    /// Roll the capture file over to `<log_file>.1` at startup once it is
    /// larger than this many bytes.
    #[serde(default)]
    pub max_log_bytes: Option<u64>,
    /// Also echo child output to the wrapper's stdout.
    #[serde(default = "default_true")]
    pub echo_to_console: bool,
    /// Runtime used to start the entry point. For `isolated-env` only its
    /// file name is used, looked up inside the environment.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Entry point handed to the interpreter. Empty means the interpreter is
    /// the sync program itself.
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    /// Extra arguments appended after the entry point.
    #[serde(default)]
    pub args: Vec<String>,
    /// Isolated runtime environment directory.
    #[serde(default = "default_isolated_env")]
    pub isolated_env: PathBuf,
    /// How the launch strategy is chosen.
    #[serde(default)]
    pub strategy: StrategySelection,
    /// How long a shutdown request waits for the child before killing it.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

fn default_install_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("log")
}

fn default_log_file() -> String {
    "service_stdout.log".to_string()
}

fn default_true() -> bool {
    true
}

fn default_interpreter() -> String {
    "python".to_string()
}

fn default_entry_point() -> String {
    "main.py".to_string()
}

fn default_isolated_env() -> PathBuf {
    PathBuf::from(".venv")
}

fn default_grace_period_secs() -> u64 {
    30
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            install_root: default_install_root(),
            log_dir: default_log_dir(),
            log_file: default_log_file(),
            log_mode: LogMode::default(),
            max_log_bytes: None,
            echo_to_console: true,
            interpreter: default_interpreter(),
            entry_point: default_entry_point(),
            args: Vec::new(),
            isolated_env: default_isolated_env(),
            strategy: StrategySelection::default(),
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

/// Values given on the command line. They win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// `--install-root`
    pub install_root: Option<PathBuf>,
    /// `--log-dir`
    pub log_dir: Option<PathBuf>,
    /// `--log-file`
    pub log_file: Option<String>,
    /// `--log-mode`
    pub log_mode: Option<LogMode>,
    /// `--max-log-bytes`
    pub max_log_bytes: Option<u64>,
    /// `--no-echo`
    pub no_echo: bool,
    /// `--interpreter`
    pub interpreter: Option<String>,
    /// `--entry-point`
    pub entry_point: Option<String>,
    /// `--arg`, repeatable; replaces configured args when non-empty
    pub args: Vec<String>,
    /// `--isolated-env`
    pub isolated_env: Option<PathBuf>,
    /// `--strategy`
    pub strategy: Option<StrategySelection>,
    /// `--grace-period-secs`
    pub grace_period_secs: Option<u64>,
}

/// Invalid wrapper configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `interpreter` is empty.
    #[error("interpreter must not be empty")]
    EmptyInterpreter,
    /// `log_file` is empty or contains a path separator.
    #[error("log_file must be a plain file name, got {0:?}")]
    InvalidLogFile(String),
    /// `max_log_bytes` is zero.
    #[error("max_log_bytes must be greater than zero")]
    ZeroMaxLogBytes,
}

impl WrapperConfig {
    /// Load configuration from an optional TOML file plus environment
    /// overrides. A missing file at the default location is not an error.
    #[instrument(
        name = "wrapper_config_loader",
        target = "helpers::load_config",
        level = "trace",
        skip_all
    )]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            tracing::trace!(
                configuration_file_path = %path.display(),
                "Loading wrapper configuration file"
            );
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );

        let settings = builder
            .build()
            .with_context(|| format!("Failed to read wrapper configuration {:?}", path))?;

        let cfg: WrapperConfig = settings
            .try_deserialize()
            .context("Failed to deserialize wrapper configuration")?;

        tracing::trace!("Wrapper configuration loaded successfully");
        Ok(cfg)
    }

    /// Apply command line overrides.
    #[must_use]
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(v) = overrides.install_root {
            self.install_root = v;
        }
        if let Some(v) = overrides.log_dir {
            self.log_dir = v;
        }
        if let Some(v) = overrides.log_file {
            self.log_file = v;
        }
        if let Some(v) = overrides.log_mode {
            self.log_mode = v;
        }
        if let Some(v) = overrides.max_log_bytes {
            self.max_log_bytes = Some(v);
        }
        if overrides.no_echo {
            self.echo_to_console = false;
        }
        if let Some(v) = overrides.interpreter {
            self.interpreter = v;
        }
        if let Some(v) = overrides.entry_point {
            self.entry_point = v;
        }
        if !overrides.args.is_empty() {
            self.args = overrides.args;
        }
        if let Some(v) = overrides.isolated_env {
            self.isolated_env = v;
        }
        if let Some(v) = overrides.strategy {
            self.strategy = v;
        }
        if let Some(v) = overrides.grace_period_secs {
            self.grace_period_secs = v;
        }
        self
    }

    /// Validate and anchor every relative path at the installation root.
    pub fn resolve(mut self) -> Result<Self> {
        self.validate()?;

        self.install_root = std::path::absolute(&self.install_root).with_context(|| {
            format!(
                "Failed to resolve installation root {}",
                self.install_root.display()
            )
        })?;
        self.log_dir = anchor(&self.install_root, &self.log_dir);
        self.isolated_env = anchor(&self.install_root, &self.isolated_env);

        // A relative interpreter path such as `bin/multi-sync` is meant
        // relative to the installation root, not to the caller's directory.
        let interpreter = Path::new(&self.interpreter);
        if interpreter.is_relative() && interpreter.components().count() > 1 {
            self.interpreter = self
                .install_root
                .join(interpreter)
                .to_string_lossy()
                .into_owned();
        }

        Ok(self)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interpreter.trim().is_empty() {
            return Err(ConfigError::EmptyInterpreter);
        }
        if self.log_file.is_empty()
            || self.log_file.contains('/')
            || self.log_file.contains('\\')
        {
            return Err(ConfigError::InvalidLogFile(self.log_file.clone()));
        }
        if self.max_log_bytes == Some(0) {
            return Err(ConfigError::ZeroMaxLogBytes);
        }
        Ok(())
    }

    /// Full path of the capture file.
    #[must_use]
    pub fn capture_path(&self) -> PathBuf {
        self.log_dir.join(&self.log_file)
    }

    /// Grace period as a `Duration`.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

fn anchor(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
