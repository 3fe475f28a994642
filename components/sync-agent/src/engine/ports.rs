//! Seams between the sync engine and the database driver. The engine only
//! talks to these traits; `crate::mssql` implements them over `tiberius` and
//! the integration tests implement them in memory.

// Local crates
use crate::helpers::connections::ConnectionConfig;
use crate::meta::models::{SyncMetaEntry, SyncStatus};
use crate::schema::models::TableSchema;
use crate::sql::{query::BatchQuery, upsert::UpsertPlan, values::SqlValue};

// External crates
use async_trait::async_trait;
use std::io;
use thiserror::Error;

/// Errors raised while syncing a table.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The server rejected a statement or the connection broke.
    #[error("database error: {0}")]
    Database(String),

    /// Login or TCP connect failed.
    #[error("failed to connect to {endpoint}: {message}")]
    Connect { endpoint: String, message: String },

    /// Connecting took longer than the configured timeout.
    #[error("timed out after {secs}s connecting to {endpoint}")]
    Timeout { endpoint: String, secs: u64 },

    /// The source table has no columns.
    #[error("table {0} not found in source")]
    TableNotFound(String),

    /// Merge keys and watermark need a primary key.
    #[error("no primary key found for table {0}; merge keys cannot be determined")]
    MissingPrimaryKey(String),

    /// A column the statement needs is not part of the table.
    #[error("column {column} not found in table {table}")]
    UnknownColumn { table: String, column: String },

    /// A cursor column is missing from a fetched batch.
    #[error("watermark column {column} missing from batch of {table}")]
    MissingWatermark { table: String, column: String },

    /// The last row of a batch has a NULL cursor value. Batches sort NULLs
    /// first, so every watermark of the batch is NULL.
    #[error("watermark column {column} of {table} is NULL for the whole batch")]
    NullWatermark { table: String, column: String },

    /// The `SyncMeta` row could not be read or created.
    #[error("no SyncMeta row for branch {branch}, table {table}")]
    MetaMissing { branch: String, table: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Rows fetched from a source table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    /// Column names in select order.
    pub columns: Vec<String>,
    /// One entry per row, aligned with `columns`.
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowBatch {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of `column`, ignoring case.
    #[must_use]
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Opens sessions against the servers named in the connections file.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Source: SourceSession;
    type Target: TargetSession;

    /// Create `database` on the target server unless it exists.
    async fn ensure_database(&self, server: &ConnectionConfig, database: &str) -> Result<(), SyncError>;

    /// Session on a branch database.
    async fn open_source(&self, connection: &ConnectionConfig) -> Result<Self::Source, SyncError>;

    /// Session on `database` of the target server.
    async fn open_target(&self, server: &ConnectionConfig, database: &str) -> Result<Self::Target, SyncError>;
}

/// Read-only access to a branch database.
#[async_trait]
pub trait SourceSession: Send {
    /// First column of the first row of `sql`, if any and not NULL.
    async fn first_text(&mut self, sql: &str) -> Result<Option<String>, SyncError>;

    /// Columns and primary key of `dbo.<table>`; `None` when it has no columns.
    async fn table_schema(&mut self, table: &str) -> Result<Option<TableSchema>, SyncError>;

    /// Fetch the rows selected by one batch query, in cursor order.
    async fn fetch(&mut self, query: &BatchQuery<'_>) -> Result<RowBatch, SyncError>;
}

/// Read-write access to the consolidated database.
///
/// Transactions are explicit: the engine calls [`begin`](Self::begin) and
/// then [`commit`](Self::commit) or [`rollback`](Self::rollback).
#[async_trait]
pub trait TargetSession: Send {
    async fn table_schema(&mut self, table: &str) -> Result<Option<TableSchema>, SyncError>;

    async fn begin(&mut self) -> Result<(), SyncError>;

    async fn commit(&mut self) -> Result<(), SyncError>;

    /// Roll back the open transaction, if any.
    async fn rollback(&mut self) -> Result<(), SyncError>;

    async fn execute_ddl(&mut self, sql: &str) -> Result<(), SyncError>;

    /// Create the `sync` schema and `SyncMeta`, or upgrade an older table.
    async fn ensure_meta_table(&mut self) -> Result<(), SyncError>;

    /// Read the meta row; with `create` a missing row is inserted first with
    /// `LastValue '0'` and status `Pending`.
    async fn meta_entry(
        &mut self,
        branch: &str,
        table: &str,
        create: bool,
    ) -> Result<Option<SyncMetaEntry>, SyncError>;

    /// Store a new watermark. Returns the rows affected.
    async fn set_last_value(&mut self, branch: &str, table: &str, value: &str) -> Result<u64, SyncError>;

    /// Store a status; `Complete` also stamps the completion time. Returns the
    /// rows affected.
    async fn set_status(
        &mut self,
        branch: &str,
        table: &str,
        status: SyncStatus,
        remarks: Option<&str>,
    ) -> Result<u64, SyncError>;

    /// Stage `batch` under `branch` and merge it into the consolidated
    /// table. The staging table is dropped even when the merge fails.
    /// Returns the rows merged.
    async fn stage_and_merge(
        &mut self,
        plan: &UpsertPlan,
        branch: &str,
        batch: &RowBatch,
    ) -> Result<u64, SyncError>;
}
