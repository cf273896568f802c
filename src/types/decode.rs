//! Wire value decoding.
//!
//! Converts raw JSON cells into typed [`Value`]s, driven by the column's
//! [`TypeSignature`]. Decoding is pure: given the same signature and raw
//! value it always produces the same result and performs no I/O. Spooled
//! segments are resolved *before* rows reach this module, so an inline page
//! and a spooled page decode identically.

use std::str::FromStr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{DataError, ProtocolError, TrinoError};
use crate::transport::messages::Column;
use crate::types::signature::{RowField, TypeSignature};
use crate::types::value::{Row, TimeZoneRef, Value};

/// How primitive values are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Full typed mapping; unrepresentable values raise `DataError`
    #[default]
    Typed,
    /// Pass raw JSON through untouched; nothing raises for range reasons
    Legacy,
}

/// Decoder for the rows of one query, built once from the first column set.
#[derive(Debug, Clone)]
pub struct RowDecoder {
    signatures: Vec<TypeSignature>,
    names: Arc<Vec<Option<String>>>,
    mode: DecodeMode,
}

impl RowDecoder {
    /// Build a decoder from the envelope's column metadata.
    pub fn new(columns: &[Column], mode: DecodeMode) -> Result<Self, ProtocolError> {
        let mut signatures = Vec::with_capacity(columns.len());
        let mut names = Vec::with_capacity(columns.len());
        for column in columns {
            let raw = column
                .type_signature
                .as_ref()
                .ok_or(ProtocolError::MissingField("typeSignature"))?;
            signatures.push(TypeSignature::from_wire(raw)?);
            names.push(Some(column.name.clone()));
        }
        Ok(Self {
            signatures,
            names: Arc::new(names),
            mode,
        })
    }

    /// Number of columns this decoder expects per row.
    pub fn column_count(&self) -> usize {
        self.signatures.len()
    }

    /// Decode one wire row.
    pub fn decode_row(&self, raw: &[serde_json::Value]) -> Result<Row, TrinoError> {
        if raw.len() != self.signatures.len() {
            return Err(ProtocolError::MalformedEnvelope(format!(
                "row has {} values but {} columns are described",
                raw.len(),
                self.signatures.len()
            ))
            .into());
        }
        if self.mode == DecodeMode::Legacy {
            let values = raw.iter().cloned().map(Value::Other).collect();
            return Ok(Row::new(values, Arc::clone(&self.names)));
        }
        let mut values = Vec::with_capacity(raw.len());
        for (signature, cell) in self.signatures.iter().zip(raw) {
            values.push(decode_value(signature, cell)?);
        }
        Ok(Row::new(values, Arc::clone(&self.names)))
    }

    /// Decode a page of wire rows, preserving order.
    pub fn decode_rows(&self, raw: &[Vec<serde_json::Value>]) -> Result<Vec<Row>, TrinoError> {
        raw.iter().map(|row| self.decode_row(row)).collect()
    }
}

/// Decode a single cell against its signature.
pub fn decode_value(
    signature: &TypeSignature,
    raw: &serde_json::Value,
) -> Result<Value, DataError> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    match signature {
        TypeSignature::Boolean => match raw {
            serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
            serde_json::Value::String(s) if s.eq_ignore_ascii_case("true") => {
                Ok(Value::Boolean(true))
            }
            serde_json::Value::String(s) if s.eq_ignore_ascii_case("false") => {
                Ok(Value::Boolean(false))
            }
            _ => Err(conversion(signature, raw, "expected a boolean")),
        },
        TypeSignature::TinyInt => {
            let v = integer(signature, raw)?;
            i8::try_from(v)
                .map(Value::TinyInt)
                .map_err(|_| out_of_range(signature, raw))
        }
        TypeSignature::SmallInt => {
            let v = integer(signature, raw)?;
            i16::try_from(v)
                .map(Value::SmallInt)
                .map_err(|_| out_of_range(signature, raw))
        }
        TypeSignature::Integer => {
            let v = integer(signature, raw)?;
            i32::try_from(v)
                .map(Value::Integer)
                .map_err(|_| out_of_range(signature, raw))
        }
        TypeSignature::BigInt => Ok(Value::BigInt(integer(signature, raw)?)),
        TypeSignature::Real => Ok(Value::Real(floating(signature, raw)? as f32)),
        TypeSignature::Double => Ok(Value::Double(floating(signature, raw)?)),
        TypeSignature::Decimal { .. } => {
            let text = match raw {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => return Err(conversion(signature, raw, "expected a decimal string")),
            };
            Decimal::from_str(&text)
                .map(Value::Decimal)
                .map_err(|_| out_of_range(signature, raw))
        }
        TypeSignature::Varchar { .. } => Ok(Value::Varchar(string(signature, raw)?)),
        TypeSignature::Char { .. } => Ok(Value::Char(string(signature, raw)?)),
        TypeSignature::Json => Ok(Value::Json(string(signature, raw)?)),
        TypeSignature::IpAddress => Ok(Value::Varchar(string(signature, raw)?)),
        TypeSignature::Varbinary => {
            let text = string(signature, raw)?;
            BASE64
                .decode(text.as_bytes())
                .map(Value::Varbinary)
                .map_err(|e| conversion(signature, raw, &format!("invalid base64: {e}")))
        }
        TypeSignature::Date => {
            let text = string(signature, raw)?;
            NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| conversion(signature, raw, &e.to_string()))
        }
        TypeSignature::Time { precision } => {
            let text = string(signature, raw)?;
            let value = parse_time(&text).ok_or_else(|| conversion(signature, raw, "bad time"))?;
            Ok(Value::Time {
                value,
                precision: *precision,
            })
        }
        TypeSignature::TimeWithTimeZone { precision } => {
            let text = string(signature, raw)?;
            // The offset is always the trailing "+HH:MM"/"-HH:MM"
            if text.len() < 6 {
                return Err(conversion(signature, raw, "bad time with time zone"));
            }
            let (time_part, zone_part) = text.split_at(text.len() - 6);
            let offset = parse_offset(zone_part)
                .ok_or_else(|| conversion(signature, raw, "bad zone offset"))?;
            let value = parse_time(time_part.trim_end())
                .ok_or_else(|| conversion(signature, raw, "bad time"))?;
            Ok(Value::TimeWithTimeZone {
                value,
                offset,
                precision: *precision,
            })
        }
        TypeSignature::Timestamp { precision } => {
            let text = string(signature, raw)?;
            let value = parse_timestamp(&text)
                .ok_or_else(|| conversion(signature, raw, "bad timestamp"))?;
            Ok(Value::Timestamp {
                value,
                precision: *precision,
            })
        }
        TypeSignature::TimestampWithTimeZone { precision } => {
            let text = string(signature, raw)?;
            let (datetime_part, zone_part) = text
                .rsplit_once(' ')
                .ok_or_else(|| conversion(signature, raw, "missing zone"))?;
            let zone = parse_zone(zone_part)
                .ok_or_else(|| conversion(signature, raw, "unknown time zone"))?;
            let value = parse_timestamp(datetime_part)
                .ok_or_else(|| conversion(signature, raw, "bad timestamp"))?;
            Ok(Value::TimestampWithTimeZone {
                value,
                zone,
                precision: *precision,
            })
        }
        TypeSignature::IntervalYearToMonth => {
            let text = string(signature, raw)?;
            parse_year_month(&text)
                .map(|months| Value::IntervalYearToMonth { months })
                .ok_or_else(|| conversion(signature, raw, "bad interval"))
        }
        TypeSignature::IntervalDayToSecond => {
            let text = string(signature, raw)?;
            parse_day_second(&text)
                .map(|milliseconds| Value::IntervalDayToSecond { milliseconds })
                .ok_or_else(|| conversion(signature, raw, "bad interval"))
        }
        TypeSignature::Uuid => {
            let text = string(signature, raw)?;
            Uuid::from_str(&text)
                .map(Value::Uuid)
                .map_err(|e| conversion(signature, raw, &e.to_string()))
        }
        TypeSignature::Array(element) => {
            let items = raw
                .as_array()
                .ok_or_else(|| conversion(signature, raw, "expected an array"))?;
            let decoded: Result<Vec<_>, _> =
                items.iter().map(|item| decode_value(element, item)).collect();
            Ok(Value::Array(decoded?))
        }
        TypeSignature::Map { key, value } => {
            let object = raw
                .as_object()
                .ok_or_else(|| conversion(signature, raw, "expected an object"))?;
            let mut entries = Vec::with_capacity(object.len());
            for (raw_key, raw_value) in object {
                let decoded_key =
                    decode_value(key, &serde_json::Value::String(raw_key.clone()))?;
                let decoded_value = decode_value(value, raw_value)?;
                entries.push((decoded_key, decoded_value));
            }
            Ok(Value::Map(entries))
        }
        TypeSignature::Row(fields) => {
            let items = raw
                .as_array()
                .ok_or_else(|| conversion(signature, raw, "expected an array"))?;
            if items.len() != fields.len() {
                return Err(conversion(signature, raw, "row arity mismatch"));
            }
            decode_row_value(fields, items)
        }
        TypeSignature::Other(_) => Ok(Value::Other(raw.clone())),
    }
}

fn decode_row_value(
    fields: &[RowField],
    items: &[serde_json::Value],
) -> Result<Value, DataError> {
    let mut values = Vec::with_capacity(fields.len());
    let mut names = Vec::with_capacity(fields.len());
    for (field, item) in fields.iter().zip(items) {
        values.push(decode_value(&field.signature, item)?);
        names.push(field.name.clone());
    }
    Ok(Value::Row(Row::new(values, Arc::new(names))))
}

fn integer(signature: &TypeSignature, raw: &serde_json::Value) -> Result<i64, DataError> {
    match raw {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| out_of_range(signature, raw)),
        // Map keys arrive as strings of the key type
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| conversion(signature, raw, "expected an integer")),
        _ => Err(conversion(signature, raw, "expected an integer")),
    }
}

fn floating(signature: &TypeSignature, raw: &serde_json::Value) -> Result<f64, DataError> {
    match raw {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| conversion(signature, raw, "expected a number")),
        serde_json::Value::String(s) => match s.as_str() {
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            "NaN" => Ok(f64::NAN),
            other => other
                .parse::<f64>()
                .map_err(|_| conversion(signature, raw, "expected a number")),
        },
        _ => Err(conversion(signature, raw, "expected a number")),
    }
}

fn string(signature: &TypeSignature, raw: &serde_json::Value) -> Result<String, DataError> {
    match raw {
        serde_json::Value::String(s) => Ok(s.clone()),
        _ => Err(conversion(signature, raw, "expected a string")),
    }
}

/// Parse `HH:MM:SS` with an optional fraction of up to nanosecond detail.
fn parse_time(text: &str) -> Option<NaiveTime> {
    let (base, fraction) = split_fraction(text);
    let time = NaiveTime::parse_from_str(base, "%H:%M:%S").ok()?;
    time.with_nanosecond(fraction_nanos(fraction)?)
}

/// Parse `YYYY-MM-DD HH:MM:SS` with an optional fraction.
fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let (base, fraction) = split_fraction(text);
    let datetime = NaiveDateTime::parse_from_str(base, "%Y-%m-%d %H:%M:%S").ok()?;
    datetime.with_nanosecond(fraction_nanos(fraction)?)
}

fn split_fraction(text: &str) -> (&str, &str) {
    match text.split_once('.') {
        Some((base, fraction)) => (base, fraction),
        None => (text, ""),
    }
}

/// Fractional digits to nanoseconds. Digits beyond nanosecond detail are
/// truncated; the declared precision still governs re-encoding.
fn fraction_nanos(fraction: &str) -> Option<u32> {
    if fraction.is_empty() {
        return Some(0);
    }
    if !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits = if fraction.len() > 9 {
        &fraction[..9]
    } else {
        fraction
    };
    let mut nanos: u32 = digits.parse().ok()?;
    for _ in digits.len()..9 {
        nanos *= 10;
    }
    Some(nanos)
}

fn parse_offset(text: &str) -> Option<FixedOffset> {
    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let seconds = hours.parse::<i32>().ok()? * 3600 + minutes.parse::<i32>().ok()? * 60;
    FixedOffset::east_opt(sign * seconds)
}

fn parse_zone(text: &str) -> Option<TimeZoneRef> {
    if text.starts_with('+') || text.starts_with('-') {
        parse_offset(text).map(TimeZoneRef::Offset)
    } else {
        Tz::from_str(text).ok().map(TimeZoneRef::Named)
    }
}

fn parse_year_month(text: &str) -> Option<i32> {
    let (sign, rest) = match text.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, text),
    };
    let (years, months) = rest.split_once('-')?;
    let total = years.parse::<i32>().ok()? * 12 + months.parse::<i32>().ok()?;
    Some(sign * total)
}

fn parse_day_second(text: &str) -> Option<i64> {
    let (sign, rest) = match text.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, text),
    };
    let (days, clock) = rest.split_once(' ')?;
    let (clock, fraction) = split_fraction(clock);
    let mut parts = clock.split(':');
    let hours = parts.next()?.parse::<i64>().ok()?;
    let minutes = parts.next()?.parse::<i64>().ok()?;
    let seconds = parts.next()?.parse::<i64>().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let millis = if fraction.is_empty() {
        0
    } else {
        i64::from(fraction_nanos(fraction)?) / 1_000_000
    };
    let total = ((days.parse::<i64>().ok()? * 24 + hours) * 3600 + minutes * 60 + seconds)
        * 1000
        + millis;
    Some(sign * total)
}

fn conversion(
    signature: &TypeSignature,
    raw: &serde_json::Value,
    message: &str,
) -> DataError {
    DataError::Conversion {
        trino_type: signature.to_string(),
        value: raw.to_string(),
        message: message.to_string(),
    }
}

fn out_of_range(signature: &TypeSignature, raw: &serde_json::Value) -> DataError {
    DataError::OutOfRange {
        trino_type: signature.to_string(),
        value: raw.to_string(),
    }
}
