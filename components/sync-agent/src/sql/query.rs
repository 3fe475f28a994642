// Local crates
use crate::sql::identifiers::{quote_ident, quote_list, quote_literal};

// External crates
use chrono::NaiveDateTime;
use std::fmt;

/// How rows of a table are selected batch after batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMethod {
    /// Ascending key: only rows above the stored watermark.
    AutoNo,
    /// Rows newer than the lookback cutoff on the timestamp column.
    Timestamp,
    /// Above the stored watermark and newer than the cutoff.
    Hybrid,
    /// The whole table every cycle.
    Full,
    /// Ascending custom column: only rows above the stored watermark.
    Column(String),
}

impl SyncMethod {
    /// `autono`, `timestamp`, `hybrid` and `full` are keywords (any case);
    /// everything else names a watermark column.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        match trimmed.to_lowercase().as_str() {
            "autono" => SyncMethod::AutoNo,
            "timestamp" => SyncMethod::Timestamp,
            "hybrid" => SyncMethod::Hybrid,
            "full" => SyncMethod::Full,
            _ => SyncMethod::Column(trimmed.to_string()),
        }
    }

    /// Whether each cycle starts from the top of the table and pages with a
    /// cursor kept for the cycle only, instead of resuming from the stored
    /// watermark.
    #[must_use]
    pub fn pages_within_cycle(&self) -> bool {
        matches!(self, SyncMethod::Full | SyncMethod::Timestamp)
    }

    /// Whether batches are limited to rows newer than the lookback cutoff.
    #[must_use]
    pub fn uses_cutoff(&self) -> bool {
        matches!(self, SyncMethod::Timestamp | SyncMethod::Hybrid)
    }
}

impl fmt::Display for SyncMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMethod::AutoNo => f.write_str("autono"),
            SyncMethod::Timestamp => f.write_str("timestamp"),
            SyncMethod::Hybrid => f.write_str("hybrid"),
            SyncMethod::Full => f.write_str("full"),
            SyncMethod::Column(c) => write!(f, "column({c})"),
        }
    }
}

/// Where a batch starts, relative to the cursor columns of the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStart {
    /// From the first row.
    Beginning,
    /// Rows whose watermark is above a stored watermark that identifies a
    /// single row.
    After(String),
    /// Rows whose watermark is at or above a stored watermark that rows may
    /// share. The rows at the boundary are merged again.
    AtOrAfter(String),
    /// Rows ordered after this cursor tuple, one value per cursor column.
    AfterRow(Vec<String>),
}

/// Inputs for one batch `SELECT`.
#[derive(Debug, Clone)]
pub struct BatchQuery<'a> {
    /// Source table.
    pub table: &'a str,
    /// Selected columns, in source ordinal order. Empty selects `*`.
    pub columns: &'a [String],
    /// Columns the batch is ordered and paged by: the watermark column, then
    /// the primary key columns that make the order unique.
    pub cursor_columns: &'a [String],
    /// Lower bound of the batch.
    pub start: &'a BatchStart,
    /// Sync method of the table.
    pub method: &'a SyncMethod,
    /// Configured timestamp column of the table.
    pub timestamp_column: Option<&'a str>,
    /// `TOP` row count.
    pub batch_size: u32,
    /// `now - lookback_days`, for the timestamp condition.
    pub cutoff: NaiveDateTime,
}

impl BatchQuery<'_> {
    fn selects(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    /// First cursor column.
    #[must_use]
    pub fn watermark_column(&self) -> Option<&str> {
        self.cursor_columns.first().map(String::as_str)
    }

    /// Column the lookback cutoff applies to. `None` for methods without a
    /// cutoff and when no selected column qualifies.
    #[must_use]
    pub fn cutoff_column(&self) -> Option<&str> {
        if !self.method.uses_cutoff() {
            return None;
        }
        if let Some(ts) = self.timestamp_column.filter(|ts| self.selects(ts)) {
            return Some(ts);
        }
        match self.watermark_column() {
            Some(wm) if *self.method == SyncMethod::Timestamp && self.selects(wm) => Some(wm),
            _ => None,
        }
    }

    fn start_condition(&self) -> Option<String> {
        let watermark = quote_ident(self.watermark_column()?);
        match self.start {
            BatchStart::Beginning => None,
            BatchStart::After(value) => Some(format!("{watermark} > {}", quote_literal(value))),
            BatchStart::AtOrAfter(value) => Some(format!("{watermark} >= {}", quote_literal(value))),
            BatchStart::AfterRow(values) => keyset_condition(self.cursor_columns, values),
        }
    }
}

/// `(a > x OR (a = x AND b > y) ...)` over the columns and values of a
/// cursor tuple.
fn keyset_condition(columns: &[String], values: &[String]) -> Option<String> {
    let pairs: Vec<(String, String)> = columns
        .iter()
        .zip(values)
        .map(|(c, v)| (quote_ident(c), quote_literal(v)))
        .collect();

    let branches: Vec<String> = (0..pairs.len())
        .map(|i| {
            let mut terms: Vec<String> = pairs[..i].iter().map(|(c, v)| format!("{c} = {v}")).collect();
            terms.push(format!("{} > {}", pairs[i].0, pairs[i].1));
            terms.join(" AND ")
        })
        .collect();

    match branches.len() {
        0 => None,
        1 => branches.into_iter().next(),
        _ => {
            let alternatives: Vec<String> = branches
                .iter()
                .enumerate()
                .map(|(i, b)| if i == 0 { b.clone() } else { format!("({b})") })
                .collect();
            Some(format!("({})", alternatives.join(" OR ")))
        }
    }
}

/// Build the `SELECT TOP n ... ORDER BY <cursor>` statement for one batch.
#[must_use]
pub fn build_batch_query(query: &BatchQuery<'_>) -> String {
    let select_list = if query.columns.is_empty() {
        tracing::warn!(table = query.table, "No columns to select, defaulting to SELECT *");
        "*".to_string()
    } else {
        quote_list(query.columns)
    };

    let mut conditions = Vec::new();
    if let Some(start) = query.start_condition() {
        conditions.push(start);
    }

    if query.method.uses_cutoff() {
        match query.cutoff_column() {
            Some(column) => conditions.push(format!(
                "{} >= {}",
                quote_ident(column),
                quote_literal(&query.cutoff.format("%Y-%m-%d %H:%M:%S").to_string())
            )),
            None => tracing::warn!(
                table = query.table,
                method = %query.method,
                "No timestamp column identified for the timestamp condition"
            ),
        }
    }

    let mut sql = format!(
        "SELECT TOP {} {select_list} FROM {}",
        query.batch_size,
        quote_ident(query.table)
    );

    if conditions.is_empty() {
        if *query.method != SyncMethod::Full && *query.start == BatchStart::Beginning {
            tracing::warn!(
                table = query.table,
                "No conditions for incremental sync, fetching from the beginning"
            );
        }
    } else {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    if !query.cursor_columns.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&quote_list(query.cursor_columns));
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cutoff() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2024-05-01 00:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn build(
        table: &str,
        columns: &[String],
        cursor: &[String],
        start: &BatchStart,
        method: &SyncMethod,
        timestamp_column: Option<&str>,
        batch_size: u32,
    ) -> String {
        build_batch_query(&BatchQuery {
            table,
            columns,
            cursor_columns: cursor,
            start,
            method,
            timestamp_column,
            batch_size,
            cutoff: cutoff(),
        })
    }

    #[test]
    fn methods_parse_case_insensitively() {
        assert_eq!(SyncMethod::parse("Autono"), SyncMethod::AutoNo);
        assert_eq!(SyncMethod::parse("FULL"), SyncMethod::Full);
        assert_eq!(SyncMethod::parse(" hybrid "), SyncMethod::Hybrid);
        assert_eq!(SyncMethod::parse("Timestamp"), SyncMethod::Timestamp);
        assert_eq!(
            SyncMethod::parse("VoucherNo"),
            SyncMethod::Column("VoucherNo".into())
        );
    }

    #[test]
    fn autono_bounds_on_stored_watermark() {
        let sql = build(
            "SaleDetail",
            &names(&["AutoNo", "Amount"]),
            &names(&["AutoNo"]),
            &BatchStart::After("1500".into()),
            &SyncMethod::AutoNo,
            Some("TrnDate"),
            100,
        );
        assert_eq!(
            sql,
            "SELECT TOP 100 [AutoNo], [Amount] FROM [SaleDetail] WHERE [AutoNo] > '1500' ORDER BY [AutoNo]"
        );
    }

    #[test]
    fn hybrid_adds_cutoff_on_timestamp_column() {
        let sql = build(
            "SaleHeader",
            &names(&["AutoNo", "TrnDate"]),
            &names(&["AutoNo"]),
            &BatchStart::After("7".into()),
            &SyncMethod::Hybrid,
            Some("TrnDate"),
            50,
        );
        assert_eq!(
            sql,
            "SELECT TOP 50 [AutoNo], [TrnDate] FROM [SaleHeader] \
             WHERE [AutoNo] > '7' AND [TrnDate] >= '2024-05-01 00:00:00' ORDER BY [AutoNo]"
        );
    }

    #[test]
    fn timestamp_orders_by_timestamp_then_key() {
        let cols = names(&["Id", "ModifiedAt"]);
        let cursor = names(&["ModifiedAt", "Id"]);
        let first = build("Brand", &cols, &cursor, &BatchStart::Beginning, &SyncMethod::Timestamp, None, 100);
        assert_eq!(
            first,
            "SELECT TOP 100 [Id], [ModifiedAt] FROM [Brand] \
             WHERE [ModifiedAt] >= '2024-05-01 00:00:00' ORDER BY [ModifiedAt], [Id]"
        );

        let next = build(
            "Brand",
            &cols,
            &cursor,
            &BatchStart::AfterRow(names(&["2024-05-02 08:00:00.000", "41"])),
            &SyncMethod::Timestamp,
            None,
            100,
        );
        assert_eq!(
            next,
            "SELECT TOP 100 [Id], [ModifiedAt] FROM [Brand] \
             WHERE ([ModifiedAt] > '2024-05-02 08:00:00.000' OR ([ModifiedAt] = '2024-05-02 08:00:00.000' AND [Id] > '41')) \
             AND [ModifiedAt] >= '2024-05-01 00:00:00' ORDER BY [ModifiedAt], [Id]"
        );
    }

    #[test]
    fn full_pages_from_the_top() {
        let cols = names(&["Code", "Name"]);
        let cursor = names(&["Code"]);
        let first = build("Item", &cols, &cursor, &BatchStart::Beginning, &SyncMethod::Full, None, 100);
        assert_eq!(first, "SELECT TOP 100 [Code], [Name] FROM [Item] ORDER BY [Code]");

        let next = build(
            "Item",
            &cols,
            &cursor,
            &BatchStart::AfterRow(names(&["A-100"])),
            &SyncMethod::Full,
            None,
            100,
        );
        assert_eq!(
            next,
            "SELECT TOP 100 [Code], [Name] FROM [Item] WHERE [Code] > 'A-100' ORDER BY [Code]"
        );
    }

    #[test]
    fn composite_keys_page_on_the_whole_tuple() {
        let cols = names(&["VoucherNo", "LineNo", "Qty"]);
        let cursor = names(&["VoucherNo", "LineNo"]);
        let sql = build(
            "Sale",
            &cols,
            &cursor,
            &BatchStart::AfterRow(names(&["12", "3"])),
            &SyncMethod::AutoNo,
            None,
            2,
        );
        assert_eq!(
            sql,
            "SELECT TOP 2 [VoucherNo], [LineNo], [Qty] FROM [Sale] \
             WHERE ([VoucherNo] > '12' OR ([VoucherNo] = '12' AND [LineNo] > '3')) \
             ORDER BY [VoucherNo], [LineNo]"
        );

        let resumed = build(
            "Sale",
            &cols,
            &cursor,
            &BatchStart::AtOrAfter("12".into()),
            &SyncMethod::AutoNo,
            None,
            2,
        );
        assert_eq!(
            resumed,
            "SELECT TOP 2 [VoucherNo], [LineNo], [Qty] FROM [Sale] \
             WHERE [VoucherNo] >= '12' ORDER BY [VoucherNo], [LineNo]"
        );
    }

    #[test]
    fn keyset_condition_grows_with_each_column() {
        assert_eq!(
            keyset_condition(&names(&["A", "B", "C"]), &names(&["1", "2", "3"])).unwrap(),
            "([A] > '1' OR ([A] = '1' AND [B] > '2') OR ([A] = '1' AND [B] = '2' AND [C] > '3'))"
        );
        assert_eq!(keyset_condition(&[], &[]), None);
    }

    #[test]
    fn literals_and_identifiers_are_escaped() {
        let sql = build(
            "we]ird",
            &names(&["Key]", "Val"]),
            &names(&["Key]"]),
            &BatchStart::After("O'Neil".into()),
            &SyncMethod::Column("Key]".into()),
            None,
            10,
        );
        assert_eq!(
            sql,
            "SELECT TOP 10 [Key]]], [Val] FROM [we]]ird] WHERE [Key]]] > 'O''Neil' ORDER BY [Key]]]"
        );
    }

    #[test]
    fn empty_column_list_selects_everything() {
        let sql = build(
            "Logo",
            &[],
            &names(&["Id"]),
            &BatchStart::After("0".into()),
            &SyncMethod::AutoNo,
            None,
            5,
        );
        assert_eq!(sql, "SELECT TOP 5 * FROM [Logo] WHERE [Id] > '0' ORDER BY [Id]");
    }
}
