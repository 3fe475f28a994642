// Local crates
use crate::{
    helpers::load_config::{ConfigOverrides, LogMode, WrapperConfig},
    launcher::{
        errors::EXIT_WRAPPER_FAILURE,
        strategy::{LaunchStrategy, StrategySelection, activation_artifact},
    },
    runtime,
};

// External crates
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use sync_common::helpers::shutdown::Shutdown;
use sync_common::instrumentation::tracing::{
    ConsoleStream, TracingOptions, init_panic_handler, init_tracing,
};

#[derive(Parser)]
#[command(
    name = "multi-sync-wrapper",
    long_about = "Starts the multi-sync program from its installation root, inside its isolated runtime environment when one is present, and captures everything it prints into the service log. The wrapper exits with the program's exit code.",
    about = "Service wrapper for the multi-sync agent",
    version,
    term_width = 100,
    after_help = "\
    EXAMPLES:
        multi-sync-wrapper --install-root /opt/multi-sync
        multi-sync-wrapper run --config /etc/multi-sync/wrapper.toml
        multi-sync-wrapper --interpreter bin/multi-sync --entry-point '' --arg run
        multi-sync-wrapper validate --install-root /opt/multi-sync"
)]
struct Cli {
    #[command(flatten)]
    args: WrapperArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct WrapperArgs {
    /// Wrapper configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Installation root; the program runs from here
    #[arg(long, global = true)]
    install_root: Option<PathBuf>,

    /// Log directory, relative to the installation root unless absolute
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Capture file name inside the log directory
    #[arg(long, global = true)]
    log_file: Option<String>,

    /// Append to or truncate the capture file on startup
    #[arg(long, global = true, value_enum)]
    log_mode: Option<LogMode>,

    /// Roll the capture file over once it exceeds this size
    #[arg(long, global = true)]
    max_log_bytes: Option<u64>,

    /// Do not echo program output to the console
    #[arg(long, global = true)]
    no_echo: bool,

    /// Runtime used to start the entry point
    #[arg(long, global = true)]
    interpreter: Option<String>,

    /// Entry point handed to the interpreter (empty for none)
    #[arg(long, global = true)]
    entry_point: Option<String>,

    /// Extra argument for the program, repeatable
    #[arg(long = "arg", global = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Isolated runtime environment directory
    #[arg(long, global = true)]
    isolated_env: Option<PathBuf>,

    /// How to choose between the isolated environment and the host runtime
    #[arg(long, global = true, value_enum)]
    strategy: Option<StrategySelection>,

    /// Seconds to wait for the program after a shutdown request
    #[arg(long, global = true)]
    grace_period_secs: Option<u64>,
}

impl From<WrapperArgs> for ConfigOverrides {
    fn from(args: WrapperArgs) -> Self {
        Self {
            install_root: args.install_root,
            log_dir: args.log_dir,
            log_file: args.log_file,
            log_mode: args.log_mode,
            max_log_bytes: args.max_log_bytes,
            no_echo: args.no_echo,
            interpreter: args.interpreter,
            entry_point: args.entry_point,
            args: args.args,
            isolated_env: args.isolated_env,
            strategy: args.strategy,
            grace_period_secs: args.grace_period_secs,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the sync program and capture its output (default)
    Run,

    /// Resolve the configuration and show what would be launched
    Validate,

    /// Display version information
    Version,
}

/// Entry function for CLI. Returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();

    // Wrapper diagnostics go to stderr only; the capture file is reserved for
    // the program's own output.
    let _guards = match init_tracing(&TracingOptions::console_only("info", ConsoleStream::Stderr)) {
        Ok(guards) => Some(guards),
        Err(e) => {
            eprintln!("multi-sync-wrapper: failed to initialise logging: {e:#}");
            None
        }
    };
    init_panic_handler();

    let command = cli.command.unwrap_or(Commands::Run);
    if matches!(command, Commands::Version) {
        show_version();
        return 0;
    }

    let config = match load_config(cli.args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Invalid wrapper configuration");
            return EXIT_WRAPPER_FAILURE;
        }
    };

    match command {
        Commands::Run => launch(&config).await,
        Commands::Validate => {
            validate_config(&config);
            0
        }
        Commands::Version => 0,
    }
}

//
// ------------------------ Command Implementations ------------------------------
//

fn load_config(args: WrapperArgs) -> Result<WrapperConfig> {
    let path = args.config.clone();
    WrapperConfig::load(path.as_deref())?
        .with_overrides(args.into())
        .resolve()
}

async fn launch(config: &WrapperConfig) -> i32 {
    let shutdown = Shutdown::new();
    let signals = shutdown.listen_for_signals();

    let code = match runtime::runtime::run_wrapper(config, &shutdown).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %err, "Wrapper failed");
            err.exit_code()
        }
    };

    signals.abort();
    code
}

/// Print the resolved configuration and the launch that would follow.
fn validate_config(config: &WrapperConfig) {
    let strategy = LaunchStrategy::select(config);
    let artifact = activation_artifact(&config.isolated_env);

    println!("Configuration valid:\n{config:#?}");
    println!("Launch strategy:      {}", strategy.name());
    println!("Program:              {}", strategy.program().to_string_lossy());
    println!(
        "Activation artifact:  {} ({})",
        artifact.display(),
        if artifact.is_file() { "present" } else { "missing" }
    );
    println!("Capture file:         {}", config.capture_path().display());
}

fn show_version() {
    println!("multi-sync-wrapper {}", env!("CARGO_PKG_VERSION"));
}
