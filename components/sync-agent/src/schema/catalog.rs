//! Catalog queries describing a table. Parameters: `@P1` table schema,
//! `@P2` table name.

/// Columns of a table in ordinal order. Numeric catalog columns are cast to
/// `INT` so every driver reads them the same way.
pub const COLUMNS_SQL: &str = "\
SELECT
    C.COLUMN_NAME,
    CAST(C.ORDINAL_POSITION AS INT) AS ORDINAL_POSITION,
    C.DATA_TYPE,
    CAST(C.CHARACTER_MAXIMUM_LENGTH AS INT) AS MAX_LENGTH,
    CAST(C.NUMERIC_PRECISION AS INT) AS NUMERIC_PRECISION,
    CAST(C.NUMERIC_SCALE AS INT) AS NUMERIC_SCALE,
    CAST(C.DATETIME_PRECISION AS INT) AS DATETIME_PRECISION,
    C.IS_NULLABLE,
    C.COLUMN_DEFAULT
FROM INFORMATION_SCHEMA.COLUMNS AS C
WHERE C.TABLE_SCHEMA = @P1 AND C.TABLE_NAME = @P2
ORDER BY C.ORDINAL_POSITION";

/// Primary key columns of a table in key order.
pub const PRIMARY_KEY_SQL: &str = "\
SELECT KU.COLUMN_NAME
FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS AS TC
INNER JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE AS KU
    ON TC.CONSTRAINT_NAME = KU.CONSTRAINT_NAME
    AND TC.TABLE_SCHEMA = KU.TABLE_SCHEMA
    AND TC.TABLE_NAME = KU.TABLE_NAME
WHERE TC.TABLE_SCHEMA = @P1 AND TC.TABLE_NAME = @P2 AND TC.CONSTRAINT_TYPE = 'PRIMARY KEY'
ORDER BY KU.ORDINAL_POSITION";
