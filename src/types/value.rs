//! Typed values.
//!
//! `Value` is the client-side representation of one decoded cell. Temporal
//! variants carry their declared precision so that re-encoding a value as a
//! SQL literal reproduces exactly the fractional digits the server sent.

use std::fmt;
use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::DataError;

/// A decoded cell value. Any variant may stand in for SQL NULL via
/// [`Value::Null`], independent of the column type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Integer(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Decimal(Decimal),
    Varchar(String),
    Char(String),
    Varbinary(Vec<u8>),
    Json(String),
    Date(NaiveDate),
    Time {
        value: NaiveTime,
        precision: u32,
    },
    TimeWithTimeZone {
        value: NaiveTime,
        offset: FixedOffset,
        precision: u32,
    },
    Timestamp {
        value: NaiveDateTime,
        precision: u32,
    },
    TimestampWithTimeZone {
        value: NaiveDateTime,
        zone: TimeZoneRef,
        precision: u32,
    },
    IntervalYearToMonth {
        months: i32,
    },
    IntervalDayToSecond {
        milliseconds: i64,
    },
    Uuid(Uuid),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Row(Row),
    /// Raw JSON passthrough for types without a dedicated mapping, and for
    /// all values in legacy decode mode
    Other(serde_json::Value),
}

/// Time zone attached to a `timestamp with time zone` value. Named zones keep
/// their IANA identifier so re-encoding preserves the zone the server sent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeZoneRef {
    Offset(FixedOffset),
    Named(Tz),
}

impl fmt::Display for TimeZoneRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeZoneRef::Offset(offset) => write!(f, "{}", format_offset(*offset)),
            TimeZoneRef::Named(tz) => write!(f, "{}", tz.name()),
        }
    }
}

/// An ordered sequence of values with optional field names.
///
/// Used both for top-level result rows (named by column) and for decoded
/// `row(..)` cells (named by field where the signature provides names).
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
    names: Arc<Vec<Option<String>>>,
}

impl Row {
    /// Build a row. `names` must be the same length as `values`.
    pub fn new(values: Vec<Value>, names: Arc<Vec<Option<String>>>) -> Self {
        debug_assert_eq!(values.len(), names.len());
        Self { values, names }
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no fields.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Positional access.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Access by field name. Returns `None` when the name is absent or
    /// ambiguous (two fields sharing one name cannot be addressed by it).
    pub fn field(&self, name: &str) -> Option<&Value> {
        let mut found = None;
        for (i, field_name) in self.names.iter().enumerate() {
            if field_name.as_deref() == Some(name) {
                if found.is_some() {
                    return None;
                }
                found = Some(i);
            }
        }
        found.and_then(|i| self.values.get(i))
    }

    /// Field names, index-aligned with the values.
    pub fn names(&self) -> &[Option<String>] {
        &self.names
    }

    /// Iterate over the values.
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }

    /// Consume the row, yielding its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Borrow all values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl Value {
    /// Render this value as a SQL literal, suitable for `EXECUTE .. USING`.
    ///
    /// The inverse of decoding: a decoded value re-encodes to a literal the
    /// engine parses back to the same value, with temporal fractions emitted
    /// at the declared precision.
    pub fn to_sql_literal(&self) -> Result<String, DataError> {
        match self {
            Value::Null => Ok("NULL".to_string()),
            Value::Boolean(b) => Ok(if *b { "true" } else { "false" }.to_string()),
            Value::TinyInt(v) => Ok(format!("TINYINT '{v}'")),
            Value::SmallInt(v) => Ok(format!("SMALLINT '{v}'")),
            Value::Integer(v) => Ok(format!("INTEGER '{v}'")),
            Value::BigInt(v) => Ok(v.to_string()),
            Value::Real(v) => {
                if v.is_infinite() {
                    Ok(format!(
                        "REAL '{}'",
                        if *v > 0.0 { "Infinity" } else { "-Infinity" }
                    ))
                } else if v.is_nan() {
                    Ok("REAL 'NaN'".to_string())
                } else {
                    Ok(format!("REAL '{v}'"))
                }
            }
            Value::Double(v) => {
                if *v == f64::INFINITY {
                    Ok("infinity()".to_string())
                } else if *v == f64::NEG_INFINITY {
                    Ok("-infinity()".to_string())
                } else if v.is_nan() {
                    Ok("nan()".to_string())
                } else {
                    Ok(format!("DOUBLE '{v}'"))
                }
            }
            Value::Decimal(d) => Ok(format!("DECIMAL '{d}'")),
            Value::Varchar(s) => Ok(quote(s)),
            Value::Char(s) => Ok(format!("CHAR {}", quote(s))),
            Value::Varbinary(bytes) => Ok(format!("X'{}'", hex(bytes))),
            Value::Json(s) => Ok(format!("JSON {}", quote(s))),
            Value::Date(d) => Ok(format!("DATE '{}'", d.format("%Y-%m-%d"))),
            Value::Time { value, precision } => Ok(format!(
                "TIME '{}{}'",
                value.format("%H:%M:%S"),
                format_fraction(value.nanosecond(), *precision)
            )),
            Value::TimeWithTimeZone {
                value,
                offset,
                precision,
            } => Ok(format!(
                "TIME '{}{} {}'",
                value.format("%H:%M:%S"),
                format_fraction(value.nanosecond(), *precision),
                format_offset(*offset)
            )),
            Value::Timestamp { value, precision } => Ok(format!(
                "TIMESTAMP '{}{}'",
                value.format("%Y-%m-%d %H:%M:%S"),
                format_fraction(value.nanosecond(), *precision)
            )),
            Value::TimestampWithTimeZone {
                value,
                zone,
                precision,
            } => Ok(format!(
                "TIMESTAMP '{}{} {}'",
                value.format("%Y-%m-%d %H:%M:%S"),
                format_fraction(value.nanosecond(), *precision),
                zone
            )),
            Value::IntervalYearToMonth { months } => {
                let sign = if *months < 0 { "-" } else { "" };
                let months = months.unsigned_abs();
                Ok(format!(
                    "INTERVAL '{sign}{}-{}' YEAR TO MONTH",
                    months / 12,
                    months % 12
                ))
            }
            Value::IntervalDayToSecond { milliseconds } => {
                let sign = if *milliseconds < 0 { "-" } else { "" };
                let ms = milliseconds.unsigned_abs();
                let (days, rest) = (ms / 86_400_000, ms % 86_400_000);
                let (hours, rest) = (rest / 3_600_000, rest % 3_600_000);
                let (minutes, rest) = (rest / 60_000, rest % 60_000);
                let (seconds, millis) = (rest / 1_000, rest % 1_000);
                Ok(format!(
                    "INTERVAL '{sign}{days} {hours:02}:{minutes:02}:{seconds:02}.{millis:03}' DAY TO SECOND"
                ))
            }
            Value::Uuid(u) => Ok(format!("UUID '{u}'")),
            Value::Array(items) => {
                let rendered: Result<Vec<_>, _> =
                    items.iter().map(Value::to_sql_literal).collect();
                Ok(format!("ARRAY[{}]", rendered?.join(",")))
            }
            Value::Map(entries) => {
                let keys: Result<Vec<_>, _> =
                    entries.iter().map(|(k, _)| k.to_sql_literal()).collect();
                let values: Result<Vec<_>, _> =
                    entries.iter().map(|(_, v)| v.to_sql_literal()).collect();
                Ok(format!(
                    "MAP(ARRAY[{}], ARRAY[{}])",
                    keys?.join(","),
                    values?.join(",")
                ))
            }
            Value::Row(row) => {
                let rendered: Result<Vec<_>, _> =
                    row.iter().map(Value::to_sql_literal).collect();
                Ok(format!("ROW({})", rendered?.join(",")))
            }
            Value::Other(_) => Err(DataError::UnsupportedParameter("raw JSON")),
        }
    }

    /// Whether this value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// Format sub-second nanoseconds at exactly `precision` digits.
///
/// Precision beyond nanoseconds pads with zeros; the stored value cannot hold
/// finer detail.
pub(crate) fn format_fraction(nanos: u32, precision: u32) -> String {
    if precision == 0 {
        return String::new();
    }
    let digits = format!("{nanos:09}");
    let mut fraction = String::with_capacity(1 + precision as usize);
    fraction.push('.');
    if precision as usize <= digits.len() {
        fraction.push_str(&digits[..precision as usize]);
    } else {
        fraction.push_str(&digits);
        for _ in digits.len()..precision as usize {
            fraction.push('0');
        }
    }
    fraction
}

/// Format a fixed offset as `+HH:MM` / `-HH:MM`.
pub(crate) fn format_offset(offset: FixedOffset) -> String {
    let total = offset.local_minus_utc();
    let sign = if total < 0 { '-' } else { '+' };
    let total = total.unsigned_abs();
    format!("{sign}{:02}:{:02}", total / 3600, (total % 3600) / 60)
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02X}"));
    }
    out
}
