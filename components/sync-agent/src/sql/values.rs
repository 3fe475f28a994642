// External crates
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::cmp::Ordering;
use std::fmt;

/// A single value read from a source row, independent of the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// `bit`
    Bool(bool),
    /// Any integer type.
    Int(i64),
    /// `real` / `float` / money as returned by the driver.
    Float(f64),
    /// `decimal` / `numeric`: `value * 10^-scale`.
    Decimal {
        /// Unscaled value.
        value: i128,
        /// Digits after the decimal point.
        scale: u8,
    },
    /// Character data, GUIDs and XML.
    Text(String),
    /// Binary data.
    Bytes(Vec<u8>),
    /// `date`
    Date(NaiveDate),
    /// `time`
    Time(NaiveTime),
    /// `datetime`, `smalldatetime`, `datetime2`
    DateTime(NaiveDateTime),
    /// `datetimeoffset`
    DateTimeOffset(DateTime<FixedOffset>),
}

impl SqlValue {
    /// Whether this is SQL `NULL`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Order two values of compatible kinds. `None` for NULLs and for kinds
    /// that cannot be compared.
    #[must_use]
    pub fn compare(&self, other: &SqlValue) -> Option<Ordering> {
        match (self, other) {
            (SqlValue::Bool(a), SqlValue::Bool(b)) => Some(a.cmp(b)),
            (SqlValue::Int(a), SqlValue::Int(b)) => Some(a.cmp(b)),
            (SqlValue::Float(a), SqlValue::Float(b)) => a.partial_cmp(b),
            (SqlValue::Int(a), SqlValue::Float(b)) => (*a as f64).partial_cmp(b),
            (SqlValue::Float(a), SqlValue::Int(b)) => a.partial_cmp(&(*b as f64)),
            (SqlValue::Decimal { .. }, _) | (_, SqlValue::Decimal { .. }) => {
                self.as_f64()?.partial_cmp(&other.as_f64()?)
            }
            (SqlValue::Text(a), SqlValue::Text(b)) => Some(a.cmp(b)),
            (SqlValue::Bytes(a), SqlValue::Bytes(b)) => Some(a.cmp(b)),
            (SqlValue::Date(a), SqlValue::Date(b)) => Some(a.cmp(b)),
            (SqlValue::Time(a), SqlValue::Time(b)) => Some(a.cmp(b)),
            (SqlValue::DateTime(a), SqlValue::DateTime(b)) => Some(a.cmp(b)),
            (SqlValue::DateTimeOffset(a), SqlValue::DateTimeOffset(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Int(v) => Some(*v as f64),
            SqlValue::Float(v) => Some(*v),
            SqlValue::Decimal { value, scale } => {
                Some(*value as f64 / 10f64.powi(i32::from(*scale)))
            }
            _ => None,
        }
    }
}

/// Fractional seconds the way SQL Server parses them back: three digits for
/// millisecond values (all that `datetime` accepts), seven otherwise.
fn fraction(nanos: u32) -> String {
    let nanos = nanos % 1_000_000_000;
    if nanos == 0 {
        ".000".to_string()
    } else if nanos % 1_000_000 == 0 {
        format!(".{:03}", nanos / 1_000_000)
    } else {
        format!(".{:07}", nanos / 100)
    }
}

fn write_decimal(f: &mut fmt::Formatter<'_>, value: i128, scale: u8) -> fmt::Result {
    if scale == 0 {
        return write!(f, "{value}");
    }
    let sign = if value < 0 { "-" } else { "" };
    let digits = value.unsigned_abs().to_string();
    let scale = usize::from(scale);
    let padded = format!("{digits:0>width$}", width = scale + 1);
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    write!(f, "{sign}{int_part}.{frac_part}")
}

/// Text form used for watermarks and query literals.
impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bool(b) => f.write_str(if *b { "1" } else { "0" }),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Decimal { value, scale } => write_decimal(f, *value, *scale),
            SqlValue::Text(s) => f.write_str(s),
            SqlValue::Bytes(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
            SqlValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            SqlValue::Time(t) => {
                write!(f, "{}{}", t.format("%H:%M:%S"), fraction(t.nanosecond()))
            }
            SqlValue::DateTime(dt) => write!(
                f,
                "{}{}",
                dt.format("%Y-%m-%d %H:%M:%S"),
                fraction(dt.nanosecond())
            ),
            SqlValue::DateTimeOffset(dt) => write!(
                f,
                "{}{} {}",
                dt.format("%Y-%m-%d %H:%M:%S"),
                fraction(dt.nanosecond()),
                dt.format("%:z")
            ),
        }
    }
}
