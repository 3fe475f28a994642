// Local crates
use crate::engine::ports::SyncError;
use crate::schema::{
    models::{BRANCH_ID_COLUMN, BRANCH_ID_TYPE, DEFAULT_SCHEMA, TableSchema},
    types::sql_type_definition,
};
use crate::sql::identifiers::{quote_ident, quote_list, sanitize_name};

// External crates
use std::sync::atomic::{AtomicU64, Ordering};

/// SQL Server accepts 2100 parameters per statement; stay below it.
pub const MAX_PARAMS_PER_STATEMENT: usize = 2000;

/// A table value constructor takes at most 1000 rows.
pub const MAX_ROWS_PER_INSERT: usize = 1000;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// One column of the staging table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingColumn {
    pub name: String,
    /// Rendered type, e.g. `NVARCHAR(50)`.
    pub definition: String,
    /// Lowercase type name, used to type NULL parameters.
    pub data_type: String,
}

/// Statements that move one batch into the consolidated table: stage the
/// rows in a global temp table, `MERGE` them on the merge keys, drop the
/// temp table.
#[derive(Debug, Clone)]
pub struct UpsertPlan {
    table: String,
    staging: String,
    columns: Vec<StagingColumn>,
    merge_keys: Vec<String>,
}

/// A unique staging table name for `table`: `##<table>_sync_<pid>_<seq>`.
#[must_use]
pub fn staging_table_name(table: &str) -> String {
    let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("##{}_sync_{}_{seq}", sanitize_name(table), std::process::id())
}

impl UpsertPlan {
    /// Plan the upsert of a batch with `batch_columns` into `table`.
    ///
    /// Every batch column must exist in `schema`, and every merge key must be
    /// the branch column or a batch column.
    pub fn new(
        table: &str,
        batch_columns: &[String],
        schema: &TableSchema,
        merge_keys: &[String],
    ) -> Result<Self, SyncError> {
        let mut columns = vec![StagingColumn {
            name: BRANCH_ID_COLUMN.to_string(),
            definition: format!("{BRANCH_ID_TYPE} NOT NULL"),
            data_type: "nvarchar".to_string(),
        }];

        for name in batch_columns {
            let details = schema.column(name).ok_or_else(|| SyncError::UnknownColumn {
                table: table.to_string(),
                column: name.clone(),
            })?;
            columns.push(StagingColumn {
                name: name.clone(),
                definition: sql_type_definition(details),
                data_type: details.data_type.clone(),
            });
        }

        for key in merge_keys {
            if !columns.iter().any(|c| c.name.eq_ignore_ascii_case(key)) {
                return Err(SyncError::UnknownColumn {
                    table: table.to_string(),
                    column: key.clone(),
                });
            }
        }

        Ok(Self {
            table: table.to_string(),
            staging: staging_table_name(table),
            columns,
            merge_keys: merge_keys.to_vec(),
        })
    }

    /// Consolidated table the batch is merged into.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Columns the `MERGE` matches rows on.
    #[must_use]
    pub fn merge_keys(&self) -> &[String] {
        &self.merge_keys
    }

    /// Staging table name.
    #[must_use]
    pub fn staging_table(&self) -> &str {
        &self.staging
    }

    /// Staging columns: branch column first, then the batch columns.
    #[must_use]
    pub fn columns(&self) -> &[StagingColumn] {
        &self.columns
    }

    fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    fn is_key(&self, column: &str) -> bool {
        self.merge_keys.iter().any(|k| k.eq_ignore_ascii_case(column))
    }

    /// `CREATE TABLE` for the staging table.
    #[must_use]
    pub fn create_staging_sql(&self) -> String {
        let definitions: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.definition))
            .collect();
        format!("CREATE TABLE {} ({})", self.staging, definitions.join(", "))
    }

    /// Rows that fit into one parameterised `INSERT`.
    #[must_use]
    pub fn rows_per_insert(&self) -> usize {
        (MAX_PARAMS_PER_STATEMENT / self.columns.len()).clamp(1, MAX_ROWS_PER_INSERT)
    }

    /// Multi-row `INSERT` into the staging table for `rows` rows, with
    /// parameters `@P1..` in row-major order.
    #[must_use]
    pub fn insert_sql(&self, rows: usize) -> String {
        let width = self.columns.len();
        let tuples: Vec<String> = (0..rows)
            .map(|row| {
                let params: Vec<String> = (1..=width).map(|i| format!("@P{}", row * width + i)).collect();
                format!("({})", params.join(", "))
            })
            .collect();

        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.staging,
            quote_list(&self.column_names()),
            tuples.join(", ")
        )
    }

    /// `MERGE` from the staging table into the consolidated table.
    #[must_use]
    pub fn merge_sql(&self) -> String {
        let on_clause = self
            .merge_keys
            .iter()
            .map(|k| format!("target.{0} = source.{0}", quote_ident(k)))
            .collect::<Vec<_>>()
            .join(" AND ");

        let mut updates: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !self.is_key(&c.name))
            .map(|c| format!("target.{0} = source.{0}", quote_ident(&c.name)))
            .collect();
        if updates.is_empty() {
            // Only key columns: a self-assignment keeps the clause valid.
            let key = quote_ident(&self.merge_keys[self.merge_keys.len() - 1]);
            updates.push(format!("target.{key} = source.{key}"));
        }

        let names = self.column_names();
        let source_list = names
            .iter()
            .map(|n| format!("source.{}", quote_ident(n)))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "MERGE INTO {}.{} AS target USING {} AS source ON ({on_clause}) \
             WHEN MATCHED THEN UPDATE SET {} \
             WHEN NOT MATCHED BY TARGET THEN INSERT ({}) VALUES ({source_list});",
            quote_ident(DEFAULT_SCHEMA),
            quote_ident(&self.table),
            self.staging,
            updates.join(", "),
            quote_list(&names)
        )
    }

    /// `DROP TABLE` for the staging table.
    #[must_use]
    pub fn drop_staging_sql(&self) -> String {
        format!("DROP TABLE {}", self.staging)
    }
}
