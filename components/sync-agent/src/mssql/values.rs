// Local crates
use crate::engine::ports::SyncError;
use crate::sql::values::SqlValue;

// External crates
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use std::borrow::Cow;
use tiberius::{ColumnData, FromSql, ToSql, numeric::Numeric};

impl From<tiberius::error::Error> for SyncError {
    fn from(e: tiberius::error::Error) -> Self {
        SyncError::Database(e.to_string())
    }
}

/// Convert one driver value into a [`SqlValue`].
pub fn from_column_data(data: ColumnData<'static>) -> Result<SqlValue, SyncError> {
    let value = match data {
        ColumnData::U8(v) => v.map_or(SqlValue::Null, |v| SqlValue::Int(v.into())),
        ColumnData::I16(v) => v.map_or(SqlValue::Null, |v| SqlValue::Int(v.into())),
        ColumnData::I32(v) => v.map_or(SqlValue::Null, |v| SqlValue::Int(v.into())),
        ColumnData::I64(v) => v.map_or(SqlValue::Null, SqlValue::Int),
        ColumnData::F32(v) => v.map_or(SqlValue::Null, |v| SqlValue::Float(v.into())),
        ColumnData::F64(v) => v.map_or(SqlValue::Null, SqlValue::Float),
        ColumnData::Bit(v) => v.map_or(SqlValue::Null, SqlValue::Bool),
        ColumnData::String(v) => v.map_or(SqlValue::Null, |s| SqlValue::Text(s.into_owned())),
        ColumnData::Guid(v) => v.map_or(SqlValue::Null, |g| SqlValue::Text(g.to_string())),
        ColumnData::Binary(v) => v.map_or(SqlValue::Null, |b| SqlValue::Bytes(b.into_owned())),
        ColumnData::Numeric(v) => v.map_or(SqlValue::Null, |n| SqlValue::Decimal {
            value: n.value(),
            scale: n.scale(),
        }),
        ColumnData::Xml(v) => v.map_or(SqlValue::Null, |x| SqlValue::Text(x.into_owned().into_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)?.map_or(SqlValue::Null, SqlValue::DateTime)
        }
        ColumnData::Date(_) => NaiveDate::from_sql(&data)?.map_or(SqlValue::Null, SqlValue::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)?.map_or(SqlValue::Null, SqlValue::Time),
        ColumnData::DateTimeOffset(_) => {
            DateTime::<FixedOffset>::from_sql(&data)?.map_or(SqlValue::Null, SqlValue::DateTimeOffset)
        }
    };
    Ok(value)
}

/// A [`SqlValue`] bound as a statement parameter. NULLs are typed after the
/// column they go into, so SQL Server never has to convert an `NVARCHAR`
/// NULL into, say, `VARBINARY`.
#[derive(Debug, Clone, Copy)]
pub struct SqlParam<'a> {
    value: &'a SqlValue,
    data_type: &'a str,
}

impl<'a> SqlParam<'a> {
    /// Bind `value` for a column of `data_type` (lowercase).
    #[must_use]
    pub fn new(value: &'a SqlValue, data_type: &'a str) -> Self {
        Self { value, data_type }
    }
}

/// Driver NULL matching `data_type`.
fn typed_null(data_type: &str) -> ColumnData<'static> {
    match data_type {
        "bit" => ColumnData::Bit(None),
        "tinyint" => ColumnData::U8(None),
        "smallint" => ColumnData::I16(None),
        "int" => ColumnData::I32(None),
        "bigint" => ColumnData::I64(None),
        "real" => ColumnData::F32(None),
        "float" => ColumnData::F64(None),
        "decimal" | "numeric" | "money" | "smallmoney" => ColumnData::Numeric(None),
        "uniqueidentifier" => ColumnData::Guid(None),
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => ColumnData::Binary(None),
        "date" => ColumnData::Date(None),
        "time" => ColumnData::Time(None),
        "datetime" | "smalldatetime" | "datetime2" => ColumnData::DateTime2(None),
        "datetimeoffset" => ColumnData::DateTimeOffset(None),
        _ => ColumnData::String(None),
    }
}

impl ToSql for SqlParam<'_> {
    fn to_sql(&self) -> ColumnData<'_> {
        match self.value {
            SqlValue::Null => typed_null(self.data_type),
            SqlValue::Bool(b) => ColumnData::Bit(Some(*b)),
            SqlValue::Int(i) => ColumnData::I64(Some(*i)),
            SqlValue::Float(f) => ColumnData::F64(Some(*f)),
            SqlValue::Decimal { value, scale } => ColumnData::Numeric(Some(Numeric::new_with_scale(*value, *scale))),
            SqlValue::Text(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            SqlValue::Bytes(b) => ColumnData::Binary(Some(Cow::Borrowed(b.as_slice()))),
            SqlValue::Date(d) => d.to_sql(),
            SqlValue::Time(t) => t.to_sql(),
            SqlValue::DateTime(dt) => dt.to_sql(),
            SqlValue::DateTimeOffset(dto) => dto.to_sql(),
        }
    }
}

/// Optional text parameter; `None` binds an `NVARCHAR` NULL.
#[derive(Debug, Clone, Copy)]
pub struct OptionalText<'a>(pub Option<&'a str>);

impl ToSql for OptionalText<'_> {
    fn to_sql(&self) -> ColumnData<'_> {
        ColumnData::String(self.0.map(Cow::Borrowed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn integers_widen_and_nulls_stay_null() {
        assert_eq!(from_column_data(ColumnData::U8(Some(7))).unwrap(), SqlValue::Int(7));
        assert_eq!(from_column_data(ColumnData::I32(Some(-3))).unwrap(), SqlValue::Int(-3));
        assert_eq!(from_column_data(ColumnData::I64(None)).unwrap(), SqlValue::Null);
        assert_eq!(from_column_data(ColumnData::Bit(Some(true))).unwrap(), SqlValue::Bool(true));
    }

    #[test]
    fn numerics_keep_their_scale() {
        let data = ColumnData::Numeric(Some(Numeric::new_with_scale(12345, 2)));
        assert_eq!(
            from_column_data(data).unwrap(),
            SqlValue::Decimal { value: 12345, scale: 2 }
        );
    }

    #[test]
    fn text_is_owned() {
        let data = ColumnData::String(Some(Cow::Owned("Kathmandu".to_string())));
        assert_eq!(from_column_data(data).unwrap(), SqlValue::Text("Kathmandu".into()));
    }

    #[test]
    fn nulls_are_typed_after_the_column() {
        let null = SqlValue::Null;
        assert!(matches!(SqlParam::new(&null, "varbinary").to_sql(), ColumnData::Binary(None)));
        assert!(matches!(SqlParam::new(&null, "int").to_sql(), ColumnData::I32(None)));
        assert!(matches!(SqlParam::new(&null, "datetime").to_sql(), ColumnData::DateTime2(None)));
        assert!(matches!(SqlParam::new(&null, "nvarchar").to_sql(), ColumnData::String(None)));
    }

    #[test]
    fn values_bind_to_matching_driver_types() {
        let text = SqlValue::Text("abc".into());
        assert!(matches!(
            SqlParam::new(&text, "nvarchar").to_sql(),
            ColumnData::String(Some(Cow::Borrowed("abc")))
        ));
        let int = SqlValue::Int(42);
        assert!(matches!(SqlParam::new(&int, "tinyint").to_sql(), ColumnData::I64(Some(42))));
        assert!(matches!(OptionalText(None).to_sql(), ColumnData::String(None)));
    }
}
