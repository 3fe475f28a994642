// Local crates
use crate::engine::{
    context::SyncContext,
    ports::{Connector, SourceSession, SyncError, TargetSession},
    watermark::{WatermarkPlan, batch_cursor, encode_cursor, resolve_watermark, resume_start},
};
use crate::helpers::connections::ConnectionConfig;
use crate::meta::models::{SyncStatus, truncate_remarks};
use crate::schema::{align::align_target, models::TableSchema};
use crate::sql::{
    query::{BatchQuery, BatchStart, SyncMethod},
    upsert::UpsertPlan,
};

// External crates
use chrono::{Local, NaiveDateTime, TimeDelta};
use sync_common::instrumentation::tracing::SUCCESS_TARGET;
use tracing::instrument;

/// Outcome of one table of one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReport {
    pub table: String,
    /// Final `SyncStatus`; `None` when the table was skipped for shutdown.
    pub status: Option<SyncStatus>,
    /// Rows committed during this run.
    pub rows: u64,
    pub remarks: Option<String>,
}

impl TableReport {
    fn skipped(table: &str) -> Self {
        Self {
            table: table.to_string(),
            status: None,
            rows: 0,
            remarks: None,
        }
    }

    fn finished(table: &str, status: SyncStatus, rows: u64, remarks: String) -> Self {
        Self {
            table: table.to_string(),
            status: Some(status),
            rows,
            remarks: Some(remarks),
        }
    }
}

/// Sync one table of one branch into the consolidated database.
///
/// Never fails: every outcome ends up in the returned report and, as far as
/// the target is reachable, in `SyncMeta`.
#[instrument(
    name = "agent_table_sync",
    target = "engine::table",
    level = "info",
    skip_all,
    fields(branch = %branch, table = %table)
)]
pub async fn sync_table<C: Connector>(
    ctx: &SyncContext<C>,
    branch: &str,
    source: &ConnectionConfig,
    target: &ConnectionConfig,
    table: &str,
) -> TableReport {
    if ctx.shutdown.is_triggered() {
        tracing::info!("Shutdown requested, table not started");
        return TableReport::skipped(table);
    }
    tracing::info!("Starting table sync");

    let mut target_slot: Option<C::Target> = None;
    match run_table(ctx, branch, source, target, table, &mut target_slot).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "Critical failure while syncing table");
            let remarks = truncate_remarks(&format!("Unexpected error: {e}"));
            if let Some(session) = target_slot.as_mut() {
                if let Err(rb) = session.rollback().await {
                    tracing::debug!(error = %rb, "Rollback before failure status did not succeed");
                }
                record_status(session, branch, table, SyncStatus::Failed, &remarks).await;
            }
            TableReport::finished(table, SyncStatus::Failed, 0, remarks)
        }
    }
}

async fn run_table<C: Connector>(
    ctx: &SyncContext<C>,
    branch: &str,
    source_conn: &ConnectionConfig,
    target_conn: &ConnectionConfig,
    table: &str,
    target_slot: &mut Option<C::Target>,
) -> Result<TableReport, SyncError> {
    let database = ctx.config.general.consolidated_database.as_str();
    ctx.connector.ensure_database(target_conn, database).await?;

    let mut source = ctx.connector.open_source(source_conn).await?;
    let target = target_slot.insert(ctx.connector.open_target(target_conn, database).await?);

    target.ensure_meta_table().await?;
    target.begin().await?;
    let entry = target
        .meta_entry(branch, table, true)
        .await?
        .ok_or_else(|| SyncError::MetaMissing {
            branch: branch.to_string(),
            table: table.to_string(),
        })?;
    let affected = target
        .set_status(branch, table, SyncStatus::InProgress, Some("Starting sync cycle."))
        .await?;
    warn_if_missing(affected, branch, table);
    target.commit().await?;

    if ctx.shutdown.is_triggered() {
        tracing::warn!("Shutdown requested before data sync, leaving table Pending");
        let remarks = "Sync interrupted: shutdown requested before data sync".to_string();
        record_status(target, branch, table, SyncStatus::Pending, &remarks).await;
        return Ok(TableReport::finished(table, SyncStatus::Pending, 0, remarks));
    }

    let source_schema = source.table_schema(table).await?;
    if !align_target(target, table, source_schema.as_ref()).await {
        tracing::warn!("Skipping data sync because of schema alignment issues");
        let remarks = "Schema alignment failed.".to_string();
        record_status(target, branch, table, SyncStatus::SchemaError, &remarks).await;
        return Ok(TableReport::finished(table, SyncStatus::SchemaError, 0, remarks));
    }
    let schema = source_schema.ok_or_else(|| SyncError::TableNotFound(table.to_string()))?;

    let sync = &ctx.config.sync;
    let method = sync.method_for(table);
    let timestamp_column = sync.timestamp_column_for(table);
    let watermark = resolve_watermark(table, &schema, &method, timestamp_column)?;
    tracing::debug!(
        method = %method,
        watermark = %watermark.column,
        cursor = ?watermark.cursor_columns,
        "Resolved watermark"
    );

    let run = TableRun {
        table,
        branch,
        schema: &schema,
        columns: schema.column_names(),
        watermark: &watermark,
        method: &method,
        timestamp_column,
        batch_size: sync.batch_size_for(table),
        cutoff: cutoff(sync.lookback_days),
    };

    let start = if method.pages_within_cycle() {
        BatchStart::Beginning
    } else {
        resume_start(&entry.last_value, &watermark.cursor_columns)
    };
    let outcome = run.batches(ctx, &mut source, target, start).await;

    let (status, remarks) = match outcome.interruption() {
        None => (
            SyncStatus::Complete,
            format!("Sync cycle completed. {} rows processed.", outcome.rows),
        ),
        Some(reason) => {
            let status = if outcome.rows > 0 {
                SyncStatus::Pending
            } else {
                SyncStatus::Failed
            };
            (status, truncate_remarks(&format!("Sync interrupted: {reason}")))
        }
    };

    record_status(target, branch, table, status, &remarks).await;
    if status == SyncStatus::Complete {
        tracing::info!(target: SUCCESS_TARGET, branch = %branch, table = %table, rows = outcome.rows, "Table sync complete");
    } else {
        tracing::warn!(status = %status, rows = outcome.rows, "Table sync ended early");
    }

    Ok(TableReport::finished(table, status, outcome.rows, remarks))
}

/// How the batch loop ended.
struct LoopOutcome {
    rows: u64,
    error: Option<SyncError>,
    shutdown: bool,
}

impl LoopOutcome {
    fn interruption(&self) -> Option<String> {
        match (&self.error, self.shutdown) {
            (Some(e), _) => Some(e.to_string()),
            (None, true) => Some("shutdown signaled".to_string()),
            (None, false) => None,
        }
    }
}

/// Fixed inputs of one table's batch loop.
struct TableRun<'a> {
    table: &'a str,
    branch: &'a str,
    schema: &'a TableSchema,
    columns: Vec<String>,
    watermark: &'a WatermarkPlan,
    method: &'a SyncMethod,
    timestamp_column: Option<&'a str>,
    batch_size: u32,
    cutoff: NaiveDateTime,
}

impl TableRun<'_> {
    async fn batches<C: Connector>(
        &self,
        ctx: &SyncContext<C>,
        source: &mut C::Source,
        target: &mut C::Target,
        start: BatchStart,
    ) -> LoopOutcome {
        let mut start = start;
        let mut outcome = LoopOutcome {
            rows: 0,
            error: None,
            shutdown: false,
        };

        loop {
            if ctx.shutdown.is_triggered() {
                tracing::warn!(rows = outcome.rows, "Shutdown requested, stopping after the last committed batch");
                outcome.shutdown = true;
                break;
            }

            match self.batch(source, target, &start).await {
                Ok(None) => {
                    tracing::info!("No more new rows");
                    break;
                }
                Ok(Some((rows, cursor))) => {
                    outcome.rows += rows;
                    tracing::info!(rows, cursor = ?cursor, "Committed batch");
                    start = BatchStart::AfterRow(cursor);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error in data sync loop, rolling back the batch");
                    if let Err(rb) = target.rollback().await {
                        tracing::error!(error = %rb, "Rollback failed after loop error");
                    }
                    outcome.error = Some(e);
                    break;
                }
            }
        }

        outcome
    }

    /// Fetch, stage, merge and commit one batch. Returns the rows committed
    /// and the cursor of the last one, or `None` when the source has nothing
    /// left after `start`.
    async fn batch<S, T>(
        &self,
        source: &mut S,
        target: &mut T,
        start: &BatchStart,
    ) -> Result<Option<(u64, Vec<String>)>, SyncError>
    where
        S: SourceSession,
        T: TargetSession,
    {
        let query = BatchQuery {
            table: self.table,
            columns: &self.columns,
            cursor_columns: &self.watermark.cursor_columns,
            start,
            method: self.method,
            timestamp_column: self.timestamp_column,
            batch_size: self.batch_size,
            cutoff: self.cutoff,
        };

        let batch = source.fetch(&query).await?;
        if batch.is_empty() {
            return Ok(None);
        }
        let cursor = batch_cursor(self.table, &self.watermark.cursor_columns, &batch)?;
        let plan = UpsertPlan::new(self.table, &batch.columns, self.schema, &self.watermark.merge_keys)?;

        target.begin().await?;
        target.stage_and_merge(&plan, self.branch, &batch).await?;
        let affected = target
            .set_last_value(self.branch, self.table, &encode_cursor(&cursor))
            .await?;
        warn_if_missing(affected, self.branch, self.table);
        target.commit().await?;

        Ok(Some((batch.len() as u64, cursor)))
    }
}

/// `now - lookback_days`, local time.
fn cutoff(lookback_days: i64) -> NaiveDateTime {
    let now = Local::now().naive_local();
    TimeDelta::try_days(lookback_days)
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(now)
}

fn warn_if_missing(affected: u64, branch: &str, table: &str) {
    if affected == 0 {
        tracing::error!(branch = %branch, table = %table, "SyncMeta row missing, update affected no rows");
    }
}

/// Write a status in its own transaction. Failures are logged only.
async fn record_status<T>(target: &mut T, branch: &str, table: &str, status: SyncStatus, remarks: &str)
where
    T: TargetSession + ?Sized,
{
    let result = async {
        target.begin().await?;
        let affected = target.set_status(branch, table, status, Some(remarks)).await?;
        warn_if_missing(affected, branch, table);
        target.commit().await
    }
    .await;

    match result {
        Ok(()) => tracing::info!(status = %status, "Recorded table status"),
        Err(e) => {
            tracing::error!(status = %status, error = %e, "Failed to record table status");
            if let Err(rb) = target.rollback().await {
                tracing::debug!(error = %rb, "Rollback after status failure did not succeed");
            }
        }
    }
}
