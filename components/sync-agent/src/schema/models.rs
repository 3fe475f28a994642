/// Column added to every consolidated table to tell branches apart.
pub const BRANCH_ID_COLUMN: &str = "BranchIdentifier";

/// Type of [`BRANCH_ID_COLUMN`].
pub const BRANCH_ID_TYPE: &str = "NVARCHAR(255)";

/// Schema that source tables are read from and target tables are created in.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// One column as described by `INFORMATION_SCHEMA.COLUMNS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDetails {
    pub name: String,
    /// Lowercase type name, e.g. `nvarchar`.
    pub data_type: String,
    /// Character/byte length; `-1` for `MAX`.
    pub max_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    pub datetime_precision: Option<i32>,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub ordinal_position: i32,
}

impl ColumnDetails {
    /// A nullable column of `data_type` with no size information.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal_position: i32) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into().to_lowercase(),
            max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            datetime_precision: None,
            is_nullable: true,
            column_default: None,
            ordinal_position,
        }
    }

    /// `NULL` or `NOT NULL`.
    #[must_use]
    pub fn nullability(&self) -> &'static str {
        if self.is_nullable { "NULL" } else { "NOT NULL" }
    }
}

/// Columns and primary key of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    /// Columns in ordinal order.
    pub columns: Vec<ColumnDetails>,
    /// Primary key columns in key order. Empty when the table has none.
    pub primary_key: Vec<String>,
}

impl TableSchema {
    /// Build a schema, sorting columns by ordinal position.
    #[must_use]
    pub fn new(mut columns: Vec<ColumnDetails>, primary_key: Vec<String>) -> Self {
        columns.sort_by_key(|c| c.ordinal_position);
        Self { columns, primary_key }
    }

    /// Look a column up by name, ignoring case like SQL Server's default
    /// collation does.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDetails> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whether the table has `name`.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Column names in ordinal order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}
