// Local crates
use crate::schema::models::ColumnDetails;

/// Render the column's SQL Server type, e.g. `NVARCHAR(50)` or
/// `DECIMAL(18, 2)`.
#[must_use]
pub fn sql_type_definition(column: &ColumnDetails) -> String {
    let data_type = normalised_type(&column.data_type);
    let upper = data_type.to_uppercase();

    match data_type.as_str() {
        "nvarchar" | "varchar" | "nchar" | "char" | "binary" | "varbinary" => {
            match column.max_length {
                Some(len) if len > 0 => format!("{upper}({len})"),
                _ => format!("{upper}(MAX)"),
            }
        }
        "decimal" | "numeric" => format!(
            "{upper}({}, {})",
            column.numeric_precision.unwrap_or(18),
            column.numeric_scale.unwrap_or(0)
        ),
        "datetime2" | "datetimeoffset" | "time" => {
            format!("{upper}({})", column.datetime_precision.unwrap_or(7))
        }
        "float" => match column.numeric_precision {
            Some(p) if p > 0 && p <= 53 => format!("FLOAT({p})"),
            _ => "FLOAT".to_string(),
        },
        _ => upper,
    }
}

/// Lowercase type name with aliases folded (`sysname` is `nvarchar`).
#[must_use]
pub fn normalised_type(data_type: &str) -> String {
    let lower = data_type.trim().to_lowercase();
    if lower == "sysname" {
        "nvarchar".to_string()
    } else {
        lower
    }
}
