// Local crates
use crate::{
    engine::context::SyncContext,
    helpers::{
        connections::parse_connections,
        load_config::AgentConfig,
    },
    mssql::connector::MssqlConnector,
    runtime::runtime::{RunMode, run_agent},
    schedule::window::SyncWindow,
};

// External crates
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use sync_common::helpers::shutdown::Shutdown;
use sync_common::instrumentation::tracing::{
    ConsoleStream, FileSink, SUCCESS_TARGET, TracingGuards, TracingOptions, init_panic_handler,
    init_tracing,
};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(
    name = "multi-sync",
    long_about = "Consolidates the configured tables of every branch database into one SQL Server database. Each row is tagged with its branch, tables are merged batch by batch, and per-table progress is kept in [sync].[SyncMeta].",
    about = "Multi-branch SQL Server consolidation agent",
    version,
    term_width = 100,
    after_help = "\
    EXAMPLES:
        multi-sync
        multi-sync --config /etc/multi-sync/agent.toml run
        multi-sync once
        multi-sync validate --config agent.toml"
)]
struct Cli {
    /// Agent configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync in a loop inside the allowed window until stopped (default)
    Run,

    /// Run a single cycle now, ignoring the window
    Once,

    /// Load the configuration and connection list and print them
    Validate,

    /// Display version information
    Version,
}

/// Entry function for CLI. Returns the process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Run);
    if matches!(command, Commands::Version) {
        show_version();
        return 0;
    }

    let config = match AgentConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("multi-sync: invalid configuration: {e:#}");
            return 1;
        }
    };

    match command {
        Commands::Validate => match validate_config(&config).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("multi-sync: {e:#}");
                1
            }
        },
        Commands::Run => start(config, RunMode::Loop).await,
        Commands::Once => start(config, RunMode::Once).await,
        Commands::Version => 0,
    }
}

//
// ------------------------ Command Implementations ------------------------------
//

/// Console plus `sync.log`, `success.log` and `errors.log` in the log
/// directory.
fn init_logging(config: &AgentConfig) -> Result<TracingGuards> {
    let general = &config.general;
    std::fs::create_dir_all(&general.log_dir)
        .with_context(|| format!("Failed to create log directory {}", general.log_dir.display()))?;

    let level = general
        .log_level
        .parse::<LevelFilter>()
        .with_context(|| format!("Invalid log level {:?}", general.log_level))?;

    init_tracing(&TracingOptions {
        default_directive: general.log_level.clone(),
        console: ConsoleStream::Stdout,
        log_dir: Some(general.log_dir.clone()),
        rotation: general.log_rotation,
        sinks: vec![
            FileSink::at_level("sync.log", level),
            FileSink::for_target("success.log", SUCCESS_TARGET),
            FileSink::at_level("errors.log", LevelFilter::ERROR),
        ],
        json: general.log_json,
    })
}

async fn start(config: AgentConfig, mode: RunMode) -> i32 {
    let _guards = match init_logging(&config) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("multi-sync: failed to initialise logging: {e:#}");
            return 1;
        }
    };
    init_panic_handler();

    let shutdown = Shutdown::new();
    let signals = shutdown.listen_for_signals();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        consolidated_database = %config.general.consolidated_database,
        tables = config.sync.tables.len(),
        "Starting multi-sync"
    );

    let connector = MssqlConnector::new(config.connect_timeout());
    let ctx = Arc::new(SyncContext::new(connector, config, shutdown));
    run_agent(ctx, mode).await;

    signals.abort();
    tracing::info!("Multi-sync shut down");
    0
}

/// Print the resolved configuration and the parsed connections with their
/// passwords left out.
async fn validate_config(config: &AgentConfig) -> Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render configuration")?;
    println!("Configuration valid:\n{rendered}");

    let window = SyncWindow::parse(
        &config.schedule.allowed_start_time,
        &config.schedule.allowed_end_time,
    );
    println!("Sync window:        {window}");

    let path = &config.general.connections_file;
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read connection file {}", path.display()))?;

    println!("Connections ({}):", path.display());
    for connection in parse_connections(&content) {
        println!(
            "  {:<40} user={:<16} role={}",
            connection.label(),
            connection.username,
            if connection.is_target { "target" } else { "source" }
        );
    }
    Ok(())
}

fn show_version() {
    println!("multi-sync {}", env!("CARGO_PKG_VERSION"));
}
