// Local crates
use crate::engine::ports::{RowBatch, SourceSession, SyncError, TargetSession};
use crate::meta::{
    models::{SyncMetaEntry, SyncStatus},
    statements::{
        ENSURE_META_TABLE_SQL, ENSURE_SCHEMA_SQL, INSERT_ENTRY_SQL, SELECT_ENTRY_SQL, UPDATE_LAST_VALUE_SQL,
        UPDATE_STATUS_COMPLETE_SQL, UPDATE_STATUS_SQL,
    },
};
use crate::mssql::values::{OptionalText, SqlParam, from_column_data};
use crate::schema::{
    catalog::{COLUMNS_SQL, PRIMARY_KEY_SQL},
    models::{ColumnDetails, DEFAULT_SCHEMA, TableSchema},
};
use crate::sql::{
    query::{BatchQuery, build_batch_query},
    upsert::UpsertPlan,
    values::SqlValue,
};

// External crates
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::fmt;
use tiberius::{Client, Row, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::Compat;

/// Driver client over a tokio socket.
pub type MssqlClient = Client<Compat<TcpStream>>;

/// One SQL Server connection, used as a source or as the target.
pub struct MssqlSession {
    client: MssqlClient,
    endpoint: String,
}

impl fmt::Debug for MssqlSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlSession").field("endpoint", &self.endpoint).finish_non_exhaustive()
    }
}

impl MssqlSession {
    pub(crate) fn new(client: MssqlClient, endpoint: String) -> Self {
        Self { client, endpoint }
    }

    /// `server:port/database` this session is connected to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run a parameterless batch and drain its results.
    pub(crate) async fn batch(&mut self, sql: &str) -> Result<(), SyncError> {
        self.client.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    async fn rows(&mut self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, SyncError> {
        Ok(self.client.query(sql, params).await?.into_first_result().await?)
    }

    async fn read_schema(&mut self, table: &str) -> Result<Option<TableSchema>, SyncError> {
        let rows = self.rows(COLUMNS_SQL, &[&DEFAULT_SCHEMA, &table]).await?;
        if rows.is_empty() {
            return Ok(None);
        }

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push(column_details(row)?);
        }

        let primary_key = self
            .rows(PRIMARY_KEY_SQL, &[&DEFAULT_SCHEMA, &table])
            .await?
            .iter()
            .map(|row| -> Result<String, SyncError> {
                Ok(row.try_get::<&str, _>(0)?.unwrap_or_default().to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(TableSchema::new(columns, primary_key)))
    }
}

fn column_details(row: &Row) -> Result<ColumnDetails, SyncError> {
    let name = row.try_get::<&str, _>("COLUMN_NAME")?.unwrap_or_default();
    let data_type = row.try_get::<&str, _>("DATA_TYPE")?.unwrap_or_default();
    let ordinal = row.try_get::<i32, _>("ORDINAL_POSITION")?.unwrap_or_default();

    let mut column = ColumnDetails::new(name, data_type, ordinal);
    column.max_length = row.try_get::<i32, _>("MAX_LENGTH")?;
    column.numeric_precision = row.try_get::<i32, _>("NUMERIC_PRECISION")?;
    column.numeric_scale = row.try_get::<i32, _>("NUMERIC_SCALE")?;
    column.datetime_precision = row.try_get::<i32, _>("DATETIME_PRECISION")?;
    column.is_nullable = row
        .try_get::<&str, _>("IS_NULLABLE")?
        .is_some_and(|v| v.eq_ignore_ascii_case("YES"));
    column.column_default = row.try_get::<&str, _>("COLUMN_DEFAULT")?.map(str::to_string);
    Ok(column)
}

#[async_trait]
impl SourceSession for MssqlSession {
    async fn first_text(&mut self, sql: &str) -> Result<Option<String>, SyncError> {
        let Some(row) = self.client.simple_query(sql).await?.into_row().await? else {
            return Ok(None);
        };
        let Some(data) = row.into_iter().next() else {
            return Ok(None);
        };
        Ok(match from_column_data(data)? {
            SqlValue::Null => None,
            value => Some(value.to_string()),
        })
    }

    async fn table_schema(&mut self, table: &str) -> Result<Option<TableSchema>, SyncError> {
        self.read_schema(table).await
    }

    async fn fetch(&mut self, query: &BatchQuery<'_>) -> Result<RowBatch, SyncError> {
        let sql = build_batch_query(query);
        tracing::debug!(endpoint = %self.endpoint, sql = %sql, "Fetching batch");
        let rows = self.client.simple_query(sql).await?.into_first_result().await?;

        let columns = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            values.push(row.into_iter().map(from_column_data).collect::<Result<Vec<_>, _>>()?);
        }

        Ok(RowBatch { columns, rows: values })
    }
}

#[async_trait]
impl TargetSession for MssqlSession {
    async fn table_schema(&mut self, table: &str) -> Result<Option<TableSchema>, SyncError> {
        self.read_schema(table).await
    }

    async fn begin(&mut self) -> Result<(), SyncError> {
        self.batch("BEGIN TRANSACTION").await
    }

    async fn commit(&mut self) -> Result<(), SyncError> {
        self.batch("COMMIT TRANSACTION").await
    }

    async fn rollback(&mut self) -> Result<(), SyncError> {
        self.batch("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }

    async fn execute_ddl(&mut self, sql: &str) -> Result<(), SyncError> {
        self.batch(sql).await
    }

    async fn ensure_meta_table(&mut self) -> Result<(), SyncError> {
        self.batch(ENSURE_SCHEMA_SQL).await?;
        self.batch(ENSURE_META_TABLE_SQL).await?;
        tracing::debug!(endpoint = %self.endpoint, "SyncMeta table ensured");
        Ok(())
    }

    async fn meta_entry(
        &mut self,
        branch: &str,
        table: &str,
        create: bool,
    ) -> Result<Option<SyncMetaEntry>, SyncError> {
        let rows = self.rows(SELECT_ENTRY_SQL, &[&branch, &table]).await?;
        if let Some(row) = rows.first() {
            let status = row.try_get::<&str, _>("SyncStatus")?.and_then(|s| s.parse().ok());
            return Ok(Some(SyncMetaEntry {
                branch: branch.to_string(),
                table: table.to_string(),
                last_value: row.try_get::<&str, _>("LastValue")?.unwrap_or_default().to_string(),
                last_synced: row.try_get::<NaiveDateTime, _>("LastSynced")?,
                status,
                last_completion: row.try_get::<NaiveDateTime, _>("LastCompletionTime")?,
                remarks: row.try_get::<&str, _>("SyncRemarks")?.map(str::to_string),
            }));
        }

        if !create {
            return Ok(None);
        }

        let entry = SyncMetaEntry::initial(branch, table);
        let status = SyncStatus::Pending.as_str();
        self.client
            .execute(INSERT_ENTRY_SQL, &[&branch, &table, &entry.last_value.as_str(), &status])
            .await?;
        tracing::info!(branch = %branch, table = %table, "Created SyncMeta entry");
        Ok(Some(entry))
    }

    async fn set_last_value(&mut self, branch: &str, table: &str, value: &str) -> Result<u64, SyncError> {
        let result = self
            .client
            .execute(UPDATE_LAST_VALUE_SQL, &[&value, &branch, &table])
            .await?;
        Ok(result.total())
    }

    async fn set_status(
        &mut self,
        branch: &str,
        table: &str,
        status: SyncStatus,
        remarks: Option<&str>,
    ) -> Result<u64, SyncError> {
        let sql = if status == SyncStatus::Complete {
            UPDATE_STATUS_COMPLETE_SQL
        } else {
            UPDATE_STATUS_SQL
        };
        let result = self
            .client
            .execute(sql, &[&status.as_str(), &OptionalText(remarks), &branch, &table])
            .await?;
        Ok(result.total())
    }

    async fn stage_and_merge(
        &mut self,
        plan: &UpsertPlan,
        branch: &str,
        batch: &RowBatch,
    ) -> Result<u64, SyncError> {
        self.batch(&plan.create_staging_sql()).await?;
        let merged = self.fill_and_merge(plan, branch, batch).await;
        if let Err(e) = self.batch(&plan.drop_staging_sql()).await {
            tracing::debug!(staging = plan.staging_table(), error = %e, "Ignoring staging table drop failure");
        }
        merged
    }
}

impl MssqlSession {
    async fn fill_and_merge(&mut self, plan: &UpsertPlan, branch: &str, batch: &RowBatch) -> Result<u64, SyncError> {
        let columns = plan.columns();
        let branch_value = SqlValue::Text(branch.to_string());

        for chunk in batch.rows.chunks(plan.rows_per_insert()) {
            let mut params = Vec::with_capacity(chunk.len() * columns.len());
            for row in chunk {
                params.push(SqlParam::new(&branch_value, &columns[0].data_type));
                for (value, column) in row.iter().zip(&columns[1..]) {
                    params.push(SqlParam::new(value, &column.data_type));
                }
            }
            let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
            self.client.execute(plan.insert_sql(chunk.len()), &refs).await?;
        }

        let merged = self.client.execute(plan.merge_sql(), &[]).await?.total();
        tracing::debug!(table_rows = batch.len(), merged, "Merged staging table");
        Ok(merged)
    }
}
