//! SQL for `[sync].[SyncMeta]`, the per branch and table bookkeeping kept in
//! the consolidated database. Timestamps use `DATETIME` so older servers can
//! hold the table.

/// Create the `sync` schema if missing.
pub const ENSURE_SCHEMA_SQL: &str =
    "IF NOT EXISTS (SELECT 1 FROM sys.schemas WHERE name = 'sync') BEGIN EXEC('CREATE SCHEMA [sync]') END";

/// Create `SyncMeta` with its indexes, or bring a table created by an older
/// release up to date: add the status columns and widen `LastValue` so it can
/// hold a composite cursor.
pub const ENSURE_META_TABLE_SQL: &str = "\
IF NOT EXISTS (
    SELECT 1 FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_SCHEMA = 'sync' AND TABLE_NAME = 'SyncMeta'
)
BEGIN
    CREATE TABLE [sync].[SyncMeta] (
        BranchName NVARCHAR(255) NOT NULL,
        TableName NVARCHAR(255) NOT NULL,
        LastValue NVARCHAR(MAX) NOT NULL,
        LastSynced DATETIME DEFAULT GETDATE(),
        SyncStatus NVARCHAR(20) DEFAULT 'Pending' NOT NULL,
        LastCompletionTime DATETIME NULL,
        SyncRemarks NVARCHAR(MAX) NULL,
        CONSTRAINT PK_SyncMeta PRIMARY KEY (BranchName, TableName)
    );
    CREATE INDEX IX_SyncMeta_LastSynced ON [sync].[SyncMeta](LastSynced);
    CREATE INDEX IX_SyncMeta_SyncStatus ON [sync].[SyncMeta](SyncStatus);
END
ELSE
BEGIN
    IF NOT EXISTS (SELECT 1 FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = 'sync' AND TABLE_NAME = 'SyncMeta' AND COLUMN_NAME = 'SyncStatus')
        ALTER TABLE [sync].[SyncMeta] ADD SyncStatus NVARCHAR(20) DEFAULT 'Pending' NOT NULL;
    IF NOT EXISTS (SELECT 1 FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = 'sync' AND TABLE_NAME = 'SyncMeta' AND COLUMN_NAME = 'LastCompletionTime')
        ALTER TABLE [sync].[SyncMeta] ADD LastCompletionTime DATETIME NULL;
    IF NOT EXISTS (SELECT 1 FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = 'sync' AND TABLE_NAME = 'SyncMeta' AND COLUMN_NAME = 'SyncRemarks')
        ALTER TABLE [sync].[SyncMeta] ADD SyncRemarks NVARCHAR(MAX) NULL;
    IF EXISTS (SELECT 1 FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = 'sync' AND TABLE_NAME = 'SyncMeta' AND COLUMN_NAME = 'LastValue'
            AND CHARACTER_MAXIMUM_LENGTH <> -1)
        ALTER TABLE [sync].[SyncMeta] ALTER COLUMN LastValue NVARCHAR(MAX) NOT NULL;
END";

/// `@P1` branch, `@P2` table.
pub const SELECT_ENTRY_SQL: &str = "\
SELECT LastValue, LastSynced, SyncStatus, LastCompletionTime, SyncRemarks
FROM [sync].[SyncMeta] WHERE BranchName = @P1 AND TableName = @P2";

/// `@P1` branch, `@P2` table, `@P3` last value, `@P4` status.
pub const INSERT_ENTRY_SQL: &str = "\
INSERT INTO [sync].[SyncMeta] (BranchName, TableName, LastValue, SyncStatus, LastSynced)
VALUES (@P1, @P2, @P3, @P4, GETDATE())";

/// `@P1` last value, `@P2` branch, `@P3` table.
pub const UPDATE_LAST_VALUE_SQL: &str = "\
UPDATE [sync].[SyncMeta] SET LastValue = @P1, LastSynced = GETDATE()
WHERE BranchName = @P2 AND TableName = @P3";

/// `@P1` status, `@P2` remarks, `@P3` branch, `@P4` table. Also stamps
/// `LastCompletionTime`.
pub const UPDATE_STATUS_COMPLETE_SQL: &str = "\
UPDATE [sync].[SyncMeta]
SET SyncStatus = @P1, LastCompletionTime = GETDATE(), SyncRemarks = @P2, LastSynced = GETDATE()
WHERE BranchName = @P3 AND TableName = @P4";

/// `@P1` status, `@P2` remarks, `@P3` branch, `@P4` table.
pub const UPDATE_STATUS_SQL: &str = "\
UPDATE [sync].[SyncMeta]
SET SyncStatus = @P1, SyncRemarks = @P2, LastSynced = GETDATE()
WHERE BranchName = @P3 AND TableName = @P4";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_value_holds_composite_cursors_on_new_and_upgraded_tables() {
        assert!(ENSURE_META_TABLE_SQL.contains("LastValue NVARCHAR(MAX) NOT NULL,"));
        assert!(ENSURE_META_TABLE_SQL.contains("ALTER COLUMN LastValue NVARCHAR(MAX) NOT NULL"));
        assert!(!ENSURE_META_TABLE_SQL.contains("LastValue NVARCHAR(255)"));
    }
}
