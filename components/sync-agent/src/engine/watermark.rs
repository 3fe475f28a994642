// Local crates
use crate::engine::ports::{RowBatch, SyncError};
use crate::schema::models::{BRANCH_ID_COLUMN, TableSchema};
use crate::sql::query::{BatchStart, SyncMethod};

/// Columns that drive one table's sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkPlan {
    /// Column whose value is stored as the table's watermark.
    pub column: String,
    /// `column` followed by the primary key columns not already in it. Rows
    /// are ordered and paged by this tuple, which is unique per row.
    pub cursor_columns: Vec<String>,
    /// `BranchIdentifier` plus the source primary key.
    pub merge_keys: Vec<String>,
}

/// Pick the watermark column, cursor and merge keys for `table`.
pub fn resolve_watermark(
    table: &str,
    schema: &TableSchema,
    method: &SyncMethod,
    timestamp_column: Option<&str>,
) -> Result<WatermarkPlan, SyncError> {
    let Some(first_key) = schema.primary_key.first() else {
        return Err(SyncError::MissingPrimaryKey(table.to_string()));
    };

    let requested = match (method, timestamp_column) {
        (SyncMethod::Column(column), _) => column.as_str(),
        (SyncMethod::Timestamp, Some(ts)) => ts,
        _ => first_key.as_str(),
    };

    let Some(column) = schema.column(requested).map(|c| c.name.clone()) else {
        return Err(SyncError::UnknownColumn {
            table: table.to_string(),
            column: requested.to_string(),
        });
    };

    let cursor_columns = std::iter::once(column.clone())
        .chain(
            schema
                .primary_key
                .iter()
                .filter(|key| !key.eq_ignore_ascii_case(&column))
                .cloned(),
        )
        .collect();

    let merge_keys = std::iter::once(BRANCH_ID_COLUMN.to_string())
        .chain(schema.primary_key.iter().cloned())
        .collect();

    Ok(WatermarkPlan {
        column,
        cursor_columns,
        merge_keys,
    })
}

/// Cursor tuple of the last row of `batch`. Batches are ordered by the
/// cursor columns, so this is the highest tuple of the batch.
pub fn batch_cursor(table: &str, cursor_columns: &[String], batch: &RowBatch) -> Result<Vec<String>, SyncError> {
    let missing = |column: &str| SyncError::MissingWatermark {
        table: table.to_string(),
        column: column.to_string(),
    };

    let Some(last) = batch.rows.last() else {
        return Ok(Vec::new());
    };

    cursor_columns
        .iter()
        .map(|column| {
            let index = batch.column_index(column).ok_or_else(|| missing(column))?;
            match last.get(index) {
                None => Err(missing(column)),
                Some(value) if value.is_null() => Err(SyncError::NullWatermark {
                    table: table.to_string(),
                    column: column.clone(),
                }),
                Some(value) => Ok(value.to_string()),
            }
        })
        .collect()
}

/// Text stored in `LastValue` for a cursor tuple: the bare value for a
/// single column, a JSON array of values otherwise.
#[must_use]
pub fn encode_cursor(values: &[String]) -> String {
    match values {
        [single] => single.clone(),
        _ => serde_json::Value::from(values.to_vec()).to_string(),
    }
}

/// Where an incremental table resumes from its stored `LastValue`.
///
/// A bare value stored for a multi-column cursor (the initial `'0'`, or a
/// row written by an older release) only bounds the watermark column, so
/// the rows sharing it are read again.
#[must_use]
pub fn resume_start(stored: &str, cursor_columns: &[String]) -> BatchStart {
    if cursor_columns.len() <= 1 {
        return BatchStart::After(stored.to_string());
    }
    match serde_json::from_str::<Vec<String>>(stored) {
        Ok(values) if values.len() == cursor_columns.len() => BatchStart::AfterRow(values),
        Ok(values) => values
            .into_iter()
            .next()
            .map_or(BatchStart::Beginning, BatchStart::AtOrAfter),
        Err(_) => BatchStart::AtOrAfter(stored.to_string()),
    }
}
