// External crates
use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;

/// Longest remark stored in `SyncRemarks`.
pub const MAX_REMARKS_CHARS: usize = 1000;

/// Watermark of a table that has never been synced.
pub const INITIAL_LAST_VALUE: &str = "0";

/// `SyncStatus` column values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
    SchemaError,
}

impl SyncStatus {
    /// Value stored in the database.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "Pending",
            SyncStatus::InProgress => "InProgress",
            SyncStatus::Complete => "Complete",
            SyncStatus::Failed => "Failed",
            SyncStatus::SchemaError => "SchemaError",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Pending" => Ok(SyncStatus::Pending),
            "InProgress" => Ok(SyncStatus::InProgress),
            "Complete" => Ok(SyncStatus::Complete),
            "Failed" => Ok(SyncStatus::Failed),
            "SchemaError" => Ok(SyncStatus::SchemaError),
            other => Err(format!("unknown sync status {other:?}")),
        }
    }
}

/// One `[sync].[SyncMeta]` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMetaEntry {
    pub branch: String,
    pub table: String,
    pub last_value: String,
    pub last_synced: Option<NaiveDateTime>,
    /// `None` when the stored value is not a known status.
    pub status: Option<SyncStatus>,
    pub last_completion: Option<NaiveDateTime>,
    pub remarks: Option<String>,
}

impl SyncMetaEntry {
    /// The row inserted for a table seen for the first time.
    #[must_use]
    pub fn initial(branch: &str, table: &str) -> Self {
        Self {
            branch: branch.to_string(),
            table: table.to_string(),
            last_value: INITIAL_LAST_VALUE.to_string(),
            last_synced: None,
            status: Some(SyncStatus::Pending),
            last_completion: None,
            remarks: None,
        }
    }
}

/// Cap `remarks` at [`MAX_REMARKS_CHARS`] characters.
#[must_use]
pub fn truncate_remarks(remarks: &str) -> String {
    remarks.chars().take(MAX_REMARKS_CHARS).collect()
}
