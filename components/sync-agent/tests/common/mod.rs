//! In-memory stand-in for the source and target servers.
//!
//! Sources are keyed by database name. The target buffers writes made inside
//! a transaction and applies them on commit, so rollbacks behave like the
//! real server for everything the engine observes.
#![allow(dead_code)]

use async_trait::async_trait;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use sync_agent::engine::context::SyncContext;
use sync_agent::engine::ports::{Connector, RowBatch, SourceSession, SyncError, TargetSession};
use sync_agent::helpers::connections::ConnectionConfig;
use sync_agent::helpers::load_config::AgentConfig;
use sync_agent::meta::models::{SyncMetaEntry, SyncStatus};
use sync_agent::schema::models::{BRANCH_ID_COLUMN, ColumnDetails, TableSchema};
use sync_agent::sql::{
    query::{BatchQuery, BatchStart},
    upsert::UpsertPlan,
    values::SqlValue,
};
use sync_common::helpers::shutdown::Shutdown;

/// One table of a branch database.
#[derive(Debug, Clone)]
pub struct FakeTable {
    pub schema: TableSchema,
    /// Rows aligned with `schema.columns`.
    pub rows: Vec<Vec<SqlValue>>,
}

/// One branch database.
#[derive(Debug, Clone, Default)]
pub struct FakeSource {
    pub label: Option<String>,
    pub label_query_fails: bool,
    pub unreachable: bool,
    pub tables: HashMap<String, FakeTable>,
}

/// Rows of one consolidated table, keyed by the merge key values.
pub type TargetRows = BTreeMap<Vec<String>, HashMap<String, SqlValue>>;

#[derive(Debug, Default)]
pub struct FakeState {
    pub sources: HashMap<String, FakeSource>,
    pub target_schemas: HashMap<String, TableSchema>,
    pub target_rows: HashMap<String, TargetRows>,
    pub meta: HashMap<(String, String), SyncMetaEntry>,
    /// Every committed status change, in order.
    pub status_history: Vec<(String, String, SyncStatus)>,
    pub ddl: Vec<String>,
    pub databases_ensured: Vec<String>,
    /// Number of `stage_and_merge` calls so far.
    pub merge_calls: usize,
    /// Fail the `stage_and_merge` call with this 1-based number.
    pub fail_merge_call: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    pub state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

pub fn int_column(name: &str, ordinal: i32) -> ColumnDetails {
    let mut column = ColumnDetails::new(name, "int", ordinal);
    column.is_nullable = false;
    column.numeric_precision = Some(10);
    column.numeric_scale = Some(0);
    column
}

pub fn text_column(name: &str, ordinal: i32) -> ColumnDetails {
    let mut column = ColumnDetails::new(name, "nvarchar", ordinal);
    column.max_length = Some(100);
    column
}

/// `Item(AutoNo INT PK, Name NVARCHAR(100))` with rows `1..=count`.
pub fn item_table(count: i64) -> FakeTable {
    let mut table = FakeTable {
        schema: TableSchema::new(
            vec![int_column("AutoNo", 1), text_column("Name", 2)],
            vec!["AutoNo".to_string()],
        ),
        rows: Vec::new(),
    };
    add_items(&mut table, 1..=count);
    table
}

/// `Sale(VoucherNo INT, LineNo INT, Qty INT)` keyed by
/// `(VoucherNo, LineNo)`, with `lines` lines on each voucher. Rows are
/// stored line by line so that storage order differs from key order.
pub fn sale_table(vouchers: i64, lines: i64) -> FakeTable {
    let mut table = FakeTable {
        schema: TableSchema::new(
            vec![int_column("VoucherNo", 1), int_column("LineNo", 2), int_column("Qty", 3)],
            vec!["VoucherNo".to_string(), "LineNo".to_string()],
        ),
        rows: Vec::new(),
    };
    for line in 1..=lines {
        for voucher in 1..=vouchers {
            add_sale_line(&mut table, voucher, line);
        }
    }
    table
}

pub fn add_sale_line(table: &mut FakeTable, voucher: i64, line: i64) {
    table
        .rows
        .push(vec![SqlValue::Int(voucher), SqlValue::Int(line), SqlValue::Int(voucher * 10 + line)]);
}

pub fn add_items(table: &mut FakeTable, ids: impl IntoIterator<Item = i64>) {
    for id in ids {
        table
            .rows
            .push(vec![SqlValue::Int(id), SqlValue::Text(format!("item-{id}"))]);
    }
}

pub fn source_with(label: Option<&str>, tables: Vec<(&str, FakeTable)>) -> FakeSource {
    FakeSource {
        label: label.map(str::to_string),
        tables: tables
            .into_iter()
            .map(|(name, table)| (name.to_lowercase(), table))
            .collect(),
        ..FakeSource::default()
    }
}

pub fn connection(database: &str, is_target: bool) -> ConnectionConfig {
    ConnectionConfig::new("127.0.0.1", 1433, database, "sa", "secret", is_target)
}

/// Agent config syncing `tables` with `batch_size` rows per batch. The stock
/// per-table methods and sizes are cleared, so every table is `autono`.
pub fn config_for(tables: &[&str], batch_size: u32) -> AgentConfig {
    let mut config = AgentConfig::default();
    config.sync.tables = tables.iter().map(|t| t.to_string()).collect();
    config.sync.default_batch_size = batch_size;
    config.sync.methods.clear();
    config.sync.batch_sizes.clear();
    config.sync.timestamp_columns.clear();
    config.workers.max_tables_per_branch = 2;
    config
}

pub fn context(connector: FakeConnector, config: AgentConfig) -> SyncContext<FakeConnector> {
    SyncContext::new(connector, config, Shutdown::new())
}

fn lower(s: &str) -> String {
    s.to_lowercase()
}

#[async_trait]
impl Connector for FakeConnector {
    type Source = FakeSourceSession;
    type Target = FakeTargetSession;

    async fn ensure_database(&self, _server: &ConnectionConfig, database: &str) -> Result<(), SyncError> {
        self.state().databases_ensured.push(database.to_string());
        Ok(())
    }

    async fn open_source(&self, connection: &ConnectionConfig) -> Result<FakeSourceSession, SyncError> {
        let state = self.state();
        match state.sources.get(&connection.database) {
            Some(source) if !source.unreachable => Ok(FakeSourceSession {
                state: self.state.clone(),
                database: connection.database.clone(),
            }),
            _ => Err(SyncError::Connect {
                endpoint: connection.label(),
                message: "host unreachable".to_string(),
            }),
        }
    }

    async fn open_target(&self, _server: &ConnectionConfig, _database: &str) -> Result<FakeTargetSession, SyncError> {
        Ok(FakeTargetSession {
            state: self.state.clone(),
            pending: None,
        })
    }
}

#[derive(Debug)]
pub struct FakeSourceSession {
    state: Arc<Mutex<FakeState>>,
    database: String,
}

impl FakeSourceSession {
    fn source(&self) -> FakeSource {
        self.state.lock().unwrap().sources[&self.database].clone()
    }
}

/// Order a stored value against a literal rendered by the engine. `None`
/// for NULL, which no comparison matches.
fn compare_literal(value: &SqlValue, literal: &str) -> Option<Ordering> {
    match value {
        SqlValue::Null => None,
        SqlValue::Int(i) => literal.parse::<i64>().ok().map(|b| i.cmp(&b)),
        other => Some(other.to_string().as_str().cmp(literal)),
    }
}

fn after_row(values: &[&SqlValue], bound: &[String]) -> bool {
    for (value, literal) in values.iter().zip(bound) {
        match compare_literal(value, literal) {
            Some(Ordering::Equal) => continue,
            ordering => return ordering == Some(Ordering::Greater),
        }
    }
    false
}

/// NULLs first, like the server.
fn order(a: &SqlValue, b: &SqlValue) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.compare(b).unwrap(),
    }
}

#[async_trait]
impl SourceSession for FakeSourceSession {
    async fn first_text(&mut self, _sql: &str) -> Result<Option<String>, SyncError> {
        let source = self.source();
        if source.label_query_fails {
            return Err(SyncError::Database("Invalid object name 'Logo'".to_string()));
        }
        Ok(source.label)
    }

    async fn table_schema(&mut self, table: &str) -> Result<Option<TableSchema>, SyncError> {
        Ok(self.source().tables.get(&lower(table)).map(|t| t.schema.clone()))
    }

    async fn fetch(&mut self, query: &BatchQuery<'_>) -> Result<RowBatch, SyncError> {
        let source = self.source();
        let table = &source.tables[&lower(query.table)];
        let index = |column: &str| {
            table
                .schema
                .columns
                .iter()
                .position(|c| c.name.eq_ignore_ascii_case(column))
                .unwrap_or_else(|| panic!("unknown column {column}"))
        };
        let cursor: Vec<usize> = query.cursor_columns.iter().map(|c| index(c)).collect();
        let cutoff = query.cutoff_column().map(|c| index(c));

        let mut rows: Vec<&Vec<SqlValue>> = table
            .rows
            .iter()
            .filter(|row| match query.start {
                BatchStart::Beginning => true,
                BatchStart::After(v) => compare_literal(&row[cursor[0]], v) == Some(Ordering::Greater),
                BatchStart::AtOrAfter(v) => {
                    matches!(compare_literal(&row[cursor[0]], v), Some(Ordering::Greater | Ordering::Equal))
                }
                BatchStart::AfterRow(values) => {
                    let tuple: Vec<&SqlValue> = cursor.iter().map(|&i| &row[i]).collect();
                    after_row(&tuple, values)
                }
            })
            .filter(|row| {
                cutoff.is_none_or(|i| matches!(&row[i], SqlValue::DateTime(ts) if *ts >= query.cutoff))
            })
            .collect();

        rows.sort_by(|a, b| {
            cursor
                .iter()
                .map(|&i| order(&a[i], &b[i]))
                .find(|o| o.is_ne())
                .unwrap_or(Ordering::Equal)
        });
        rows.truncate(query.batch_size as usize);

        let selected: Vec<usize> = query.columns.iter().map(|c| index(c)).collect();
        Ok(RowBatch {
            columns: query.columns.to_vec(),
            rows: rows
                .into_iter()
                .map(|row| selected.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }
}

/// Writes made inside a transaction.
#[derive(Debug, Clone)]
enum Op {
    InsertMeta(SyncMetaEntry),
    SetLastValue(String, String, String),
    SetStatus(String, String, SyncStatus, Option<String>),
    Ddl(String),
    Merge(String, Vec<(Vec<String>, HashMap<String, SqlValue>)>),
}

#[derive(Debug)]
pub struct FakeTargetSession {
    state: Arc<Mutex<FakeState>>,
    pending: Option<Vec<Op>>,
}

impl FakeTargetSession {
    fn apply(&mut self, op: Op) {
        match self.pending.as_mut() {
            Some(pending) => pending.push(op),
            None => apply(&mut self.state.lock().unwrap(), op),
        }
    }

    fn meta_exists(&self, branch: &str, table: &str) -> bool {
        let key = (branch.to_string(), table.to_string());
        self.state.lock().unwrap().meta.contains_key(&key)
            || self.pending.iter().flatten().any(|op| {
                matches!(op, Op::InsertMeta(entry) if entry.branch == branch && entry.table == table)
            })
    }
}

fn apply(state: &mut FakeState, op: Op) {
    match op {
        Op::InsertMeta(entry) => {
            state.meta.insert((entry.branch.clone(), entry.table.clone()), entry);
        }
        Op::SetLastValue(branch, table, value) => {
            if let Some(entry) = state.meta.get_mut(&(branch, table)) {
                entry.last_value = value;
            }
        }
        Op::SetStatus(branch, table, status, remarks) => {
            if let Some(entry) = state.meta.get_mut(&(branch.clone(), table.clone())) {
                entry.status = Some(status);
                entry.remarks = remarks;
                state.status_history.push((branch, table, status));
            }
        }
        Op::Ddl(sql) => {
            let create = Regex::new(r"^CREATE TABLE \[dbo\]\.\[([^\]]+)\]").unwrap();
            if let Some(caps) = create.captures(&sql) {
                let table = caps[1].to_string();
                let source_schema = state
                    .sources
                    .values()
                    .find_map(|s| s.tables.get(&lower(&table)))
                    .map(|t| t.schema.clone())
                    .unwrap_or_default();
                let mut branch = ColumnDetails::new(BRANCH_ID_COLUMN, "nvarchar", 0);
                branch.max_length = Some(255);
                branch.is_nullable = false;
                let mut columns = vec![branch];
                columns.extend(source_schema.columns.clone());
                let primary_key = if source_schema.primary_key.is_empty() {
                    Vec::new()
                } else {
                    std::iter::once(BRANCH_ID_COLUMN.to_string())
                        .chain(source_schema.primary_key.iter().cloned())
                        .collect()
                };
                state
                    .target_schemas
                    .insert(lower(&table), TableSchema::new(columns, primary_key));
            }
            state.ddl.push(sql);
        }
        Op::Merge(table, rows) => {
            let target = state.target_rows.entry(lower(&table)).or_default();
            for (key, row) in rows {
                target.insert(key, row);
            }
        }
    }
}

#[async_trait]
impl TargetSession for FakeTargetSession {
    async fn table_schema(&mut self, table: &str) -> Result<Option<TableSchema>, SyncError> {
        Ok(self.state.lock().unwrap().target_schemas.get(&lower(table)).cloned())
    }

    async fn begin(&mut self) -> Result<(), SyncError> {
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SyncError> {
        let ops = self.pending.take().unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        for op in ops {
            apply(&mut state, op);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SyncError> {
        self.pending = None;
        Ok(())
    }

    async fn execute_ddl(&mut self, sql: &str) -> Result<(), SyncError> {
        self.apply(Op::Ddl(sql.to_string()));
        Ok(())
    }

    async fn ensure_meta_table(&mut self) -> Result<(), SyncError> {
        Ok(())
    }

    async fn meta_entry(
        &mut self,
        branch: &str,
        table: &str,
        create: bool,
    ) -> Result<Option<SyncMetaEntry>, SyncError> {
        let key = (branch.to_string(), table.to_string());
        if let Some(entry) = self.state.lock().unwrap().meta.get(&key) {
            return Ok(Some(entry.clone()));
        }
        if !create {
            return Ok(None);
        }
        let entry = SyncMetaEntry::initial(branch, table);
        self.apply(Op::InsertMeta(entry.clone()));
        Ok(Some(entry))
    }

    async fn set_last_value(&mut self, branch: &str, table: &str, value: &str) -> Result<u64, SyncError> {
        let exists = self.meta_exists(branch, table);
        self.apply(Op::SetLastValue(branch.to_string(), table.to_string(), value.to_string()));
        Ok(u64::from(exists))
    }

    async fn set_status(
        &mut self,
        branch: &str,
        table: &str,
        status: SyncStatus,
        remarks: Option<&str>,
    ) -> Result<u64, SyncError> {
        let exists = self.meta_exists(branch, table);
        self.apply(Op::SetStatus(
            branch.to_string(),
            table.to_string(),
            status,
            remarks.map(str::to_string),
        ));
        Ok(u64::from(exists))
    }

    async fn stage_and_merge(
        &mut self,
        plan: &UpsertPlan,
        branch: &str,
        batch: &RowBatch,
    ) -> Result<u64, SyncError> {
        {
            let mut state = self.state.lock().unwrap();
            state.merge_calls += 1;
            if state.fail_merge_call == Some(state.merge_calls) {
                return Err(SyncError::Database("injected merge failure".to_string()));
            }
        }

        let mut merged = Vec::with_capacity(batch.len());
        for values in &batch.rows {
            let mut row: HashMap<String, SqlValue> = batch
                .columns
                .iter()
                .map(|c| lower(c))
                .zip(values.iter().cloned())
                .collect();
            row.insert(lower(BRANCH_ID_COLUMN), SqlValue::Text(branch.to_string()));
            let key = plan
                .merge_keys()
                .iter()
                .map(|k| row[&lower(k)].to_string())
                .collect();
            merged.push((key, row));
        }

        let count = merged.len() as u64;
        self.apply(Op::Merge(plan.table().to_string(), merged));
        Ok(count)
    }
}
