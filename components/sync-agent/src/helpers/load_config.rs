// Local crates
use crate::sql::query::SyncMethod;

// External crates
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sync_common::instrumentation::tracing::LogRotation;
use thiserror::Error;
use tracing::instrument;

/// Prefix for environment overrides, e.g. `MULTI_SYNC_SCHEDULE__RUN_INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "MULTI_SYNC";

/// Branch label lookup run against every source database.
pub const DEFAULT_BRANCH_LABEL_QUERY: &str = "SELECT TOP 1 BOTMESS1 FROM Logo WITH (NOLOCK)";

/// Agent configuration. Every field has a default, so running without a
/// configuration file reproduces the stock deployment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Files, target database and logging.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Allowed window and loop intervals.
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Concurrency limits.
    #[serde(default)]
    pub workers: WorkerConfig,
    /// Tables and how each one is synced.
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Connection list, one connection per line.
    pub connections_file: PathBuf,
    /// Database on the target server that receives every branch.
    pub consolidated_database: String,
    /// Directory for `sync.log`, `success.log` and `errors.log`.
    pub log_dir: PathBuf,
    /// Rotation for the log files.
    pub log_rotation: LogRotation,
    /// Level used for the console and `sync.log` when `RUST_LOG` is unset.
    pub log_level: String,
    /// Write the log files as JSON lines instead of plain text.
    pub log_json: bool,
    /// Query whose first column names the branch of a source database.
    pub branch_label_query: String,
    /// TCP and login timeout for every database connection.
    pub connect_timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            connections_file: PathBuf::from("connection_strings.txt"),
            consolidated_database: "ConsolidatedDB".to_string(),
            log_dir: PathBuf::from("log"),
            log_rotation: LogRotation::Never,
            log_level: "info".to_string(),
            log_json: false,
            branch_label_query: DEFAULT_BRANCH_LABEL_QUERY.to_string(),
            connect_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Window start, `HH:MM` local time.
    pub allowed_start_time: String,
    /// Window end, `HH:MM` local time. Equal to the start means always.
    pub allowed_end_time: String,
    /// Pause between two cycles.
    pub run_interval_secs: u64,
    /// Pause between two window checks while outside the window.
    pub window_check_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            allowed_start_time: "00:00".to_string(),
            allowed_end_time: "00:00".to_string(),
            run_interval_secs: 2000,
            window_check_interval_secs: 60,
        }
    }
}

impl ScheduleConfig {
    /// Pause between cycles.
    #[must_use]
    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_secs)
    }

    /// Pause between window checks.
    #[must_use]
    pub fn window_check_interval(&self) -> Duration {
        Duration::from_secs(self.window_check_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Source branches synced at the same time.
    pub max_branch_workers: usize,
    /// Tables of one branch synced at the same time.
    pub max_tables_per_branch: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_branch_workers: 4,
            max_tables_per_branch: 2,
        }
    }
}

/// Per-table sync settings. Map keys are table names and are matched
/// case-insensitively.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Days subtracted from now for the timestamp cutoff.
    pub lookback_days: i64,
    /// Rows per batch when a table has no entry in `batch_sizes`.
    pub default_batch_size: u32,
    /// Tables synced from every branch, in this order.
    pub tables: Vec<String>,
    /// `autono`, `timestamp`, `hybrid`, `full`, or a watermark column name.
    /// Tables without an entry use `autono`.
    pub methods: BTreeMap<String, String>,
    /// Rows per batch for individual tables.
    pub batch_sizes: BTreeMap<String, u32>,
    /// Timestamp column for `timestamp` and `hybrid` tables.
    pub timestamp_columns: BTreeMap<String, String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let tables = [
            "SALEDETAIL",
            "SALEHEADER",
            "Item",
            "debitdetail",
            "debitheader",
            "whdebitdetail",
            "whdebitheader",
            "BallotingSys",
            "ITEMOTHERS",
            "SubCategory",
            "Tbl_V_C",
            "Tbl_V_P",
            "Tbl_ChartOfAccount",
        ];
        let methods = [
            ("saledetail", "autono"),
            ("saleheader", "autono"),
            ("supplier", "full"),
            ("debitdetail", "autono"),
            ("debitheader", "VoucherNo"),
            ("logo", "full"),
            ("tbl_chartofaccount", "full"),
            ("ballotingsys", "CouponNo"),
            ("item", "full"),
            ("brand", "timestamp"),
            ("itemothers", "full"),
            ("category", "timestamp"),
            ("subcategory", "autono"),
        ];
        let batch_sizes = [
            ("saledetail", 100),
            ("debitdetail", 100),
            ("saleheader", 100),
            ("item", 100),
            ("supplier", 100),
            ("logo", 100),
            ("tbl_chartofaccount", 110),
            ("subcategory", 110),
        ];
        let timestamp_columns = [
            ("saledetail", "TrnDate"),
            ("saleheader", "TrnDate"),
            ("debitheader", "VoucherDate"),
        ];

        Self {
            lookback_days: 0,
            default_batch_size: 100,
            tables: tables.iter().map(|t| t.to_string()).collect(),
            methods: methods
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            batch_sizes: batch_sizes
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            timestamp_columns: timestamp_columns
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl SyncConfig {
    /// Sync method for `table`.
    #[must_use]
    pub fn method_for(&self, table: &str) -> SyncMethod {
        self.methods
            .get(&table.to_lowercase())
            .map(|m| SyncMethod::parse(m))
            .unwrap_or(SyncMethod::AutoNo)
    }

    /// Rows per batch for `table`.
    #[must_use]
    pub fn batch_size_for(&self, table: &str) -> u32 {
        self.batch_sizes
            .get(&table.to_lowercase())
            .copied()
            .unwrap_or(self.default_batch_size)
    }

    /// Configured timestamp column for `table`, if any.
    #[must_use]
    pub fn timestamp_column_for(&self, table: &str) -> Option<&str> {
        self.timestamp_columns
            .get(&table.to_lowercase())
            .map(String::as_str)
    }

    fn normalise(&mut self) {
        self.methods = lowercase_keys(std::mem::take(&mut self.methods));
        self.batch_sizes = lowercase_keys(std::mem::take(&mut self.batch_sizes));
        self.timestamp_columns = lowercase_keys(std::mem::take(&mut self.timestamp_columns));
    }
}

fn lowercase_keys<V>(map: BTreeMap<String, V>) -> BTreeMap<String, V> {
    map.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect()
}

/// Invalid agent configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required text setting is blank.
    #[error("{0} must not be empty")]
    Empty(&'static str),
    /// A worker limit is zero.
    #[error("{0} must be at least 1")]
    ZeroWorkers(&'static str),
    /// A batch size is zero.
    #[error("batch size for {0} must be at least 1")]
    ZeroBatchSize(String),
}

impl AgentConfig {
    /// Load the configuration file, if any, and apply `MULTI_SYNC_*`
    /// environment overrides on top of it.
    #[instrument(
        name = "agent_config_loader",
        target = "helpers::load_config",
        level = "trace",
        skip_all
    )]
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            tracing::trace!(
                configuration_file_path = %path.display(),
                "Loading multi-sync configuration file"
            );

            let config_str = match fs::read_to_string(path) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to read configuration file");
                    return Err(e)
                        .with_context(|| format!("Failed to read config file at {:?}", path));
                }
            };
            builder = builder.add_source(config::File::from_str(
                &config_str,
                config::FileFormat::Toml,
            ));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("sync.tables"),
        );

        let mut cfg: AgentConfig = match builder.build().and_then(|c| c.try_deserialize()) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!(error = %e, "Failed to parse configuration");
                return Err(e).with_context(|| format!("Failed to parse configuration {:?}", path));
            }
        };

        cfg.sync.normalise();
        cfg.validate()?;

        tracing::trace!("multi-sync configuration loaded successfully");
        Ok(cfg)
    }

    /// Reject settings the agent cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.consolidated_database.trim().is_empty() {
            return Err(ConfigError::Empty("general.consolidated_database"));
        }
        if self.general.branch_label_query.trim().is_empty() {
            return Err(ConfigError::Empty("general.branch_label_query"));
        }
        if self.workers.max_branch_workers == 0 {
            return Err(ConfigError::ZeroWorkers("workers.max_branch_workers"));
        }
        if self.workers.max_tables_per_branch == 0 {
            return Err(ConfigError::ZeroWorkers("workers.max_tables_per_branch"));
        }
        if self.sync.default_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize("default_batch_size".to_string()));
        }
        if let Some((table, _)) = self.sync.batch_sizes.iter().find(|(_, size)| **size == 0) {
            return Err(ConfigError::ZeroBatchSize(table.clone()));
        }
        Ok(())
    }

    /// Connection timeout as a `Duration`.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.general.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_follow_stock_deployment() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.general.consolidated_database, "ConsolidatedDB");
        assert_eq!(cfg.general.connections_file, PathBuf::from("connection_strings.txt"));
        assert_eq!(cfg.general.connect_timeout_secs, 5);
        assert!(!cfg.general.log_json);
        assert_eq!(cfg.schedule.allowed_start_time, "00:00");
        assert_eq!(cfg.schedule.run_interval_secs, 2000);
        assert_eq!(cfg.schedule.window_check_interval_secs, 60);
        assert_eq!(cfg.workers.max_branch_workers, 4);
        assert_eq!(cfg.workers.max_tables_per_branch, 2);
        assert_eq!(cfg.sync.lookback_days, 0);
        assert_eq!(cfg.sync.default_batch_size, 100);
        assert!(cfg.sync.tables.iter().any(|t| t == "Tbl_ChartOfAccount"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn per_table_lookups_ignore_case() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.method_for("SALEHEADER"), SyncMethod::AutoNo);
        assert_eq!(cfg.method_for("Item"), SyncMethod::Full);
        assert_eq!(cfg.method_for("Brand"), SyncMethod::Timestamp);
        assert_eq!(
            cfg.method_for("DebitHeader"),
            SyncMethod::Column("VoucherNo".to_string())
        );
        assert_eq!(cfg.method_for("unknown_table"), SyncMethod::AutoNo);

        assert_eq!(cfg.batch_size_for("Tbl_ChartOfAccount"), 110);
        assert_eq!(cfg.batch_size_for("whdebitdetail"), 100);
        assert_eq!(cfg.timestamp_column_for("SaleDetail"), Some("TrnDate"));
        assert_eq!(cfg.timestamp_column_for("item"), None);
    }

    #[test]
    fn file_values_override_defaults_and_keys_are_normalised() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[general]
consolidated_database = "Central"
log_json = true

[schedule]
allowed_start_time = "22:00"
allowed_end_time = "06:00"

[workers]
max_branch_workers = 8

[sync]
tables = ["Orders"]

[sync.methods]
Orders = "Hybrid"

[sync.batch_sizes]
ORDERS = 500

[sync.timestamp_columns]
Orders = "UpdatedAt"
"#
        )
        .unwrap();

        let cfg = AgentConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.general.consolidated_database, "Central");
        assert_eq!(cfg.general.log_dir, PathBuf::from("log"));
        assert!(cfg.general.log_json);
        assert_eq!(cfg.schedule.allowed_start_time, "22:00");
        assert_eq!(cfg.workers.max_branch_workers, 8);
        assert_eq!(cfg.workers.max_tables_per_branch, 2);
        assert_eq!(cfg.sync.tables, vec!["Orders".to_string()]);
        assert_eq!(cfg.sync.method_for("orders"), SyncMethod::Hybrid);
        assert_eq!(cfg.sync.batch_size_for("Orders"), 500);
        assert_eq!(cfg.sync.timestamp_column_for("orders"), Some("UpdatedAt"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        assert!(AgentConfig::load(Some(&root.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn zero_limits_are_rejected() {
        let mut cfg = AgentConfig::default();
        cfg.workers.max_tables_per_branch = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroWorkers("workers.max_tables_per_branch"))
        );

        let mut cfg = AgentConfig::default();
        cfg.sync.batch_sizes.insert("item".into(), 0);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroBatchSize("item".into())));
    }
}
