//! Type signatures.
//!
//! The coordinator describes every column with a structured `typeSignature`
//! payload. This module decodes that payload into a tagged tree, which the
//! value decoder walks recursively, and derives the display attributes
//! (internal size, precision, scale) consumed by cursor descriptions.

use std::fmt;

use crate::error::ProtocolError;
use crate::transport::messages::{RawTypeArgument, RawTypeSignature};

/// Default fractional-second precision when a temporal signature carries no
/// explicit precision argument.
pub const DEFAULT_TEMPORAL_PRECISION: u32 = 3;

/// Length reported for unbounded VARCHAR.
const UNBOUNDED_LENGTH: u64 = 2_147_483_647;

/// A decoded type signature.
///
/// Leaf kinds map a cell value directly; `Array`, `Map` and `Row` nest and
/// are decoded by structural recursion.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSignature {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Decimal { precision: u32, scale: u32 },
    Varchar { length: Option<u32> },
    Char { length: u32 },
    Varbinary,
    Json,
    Date,
    Time { precision: u32 },
    TimeWithTimeZone { precision: u32 },
    Timestamp { precision: u32 },
    TimestampWithTimeZone { precision: u32 },
    IntervalYearToMonth,
    IntervalDayToSecond,
    Uuid,
    IpAddress,
    Array(Box<TypeSignature>),
    Map {
        key: Box<TypeSignature>,
        value: Box<TypeSignature>,
    },
    Row(Vec<RowField>),
    /// A type this client has no dedicated mapping for; values pass through
    /// as raw JSON
    Other(String),
}

/// One field of a `row(..)` signature. The name is optional; anonymous
/// fields remain addressable by position only.
#[derive(Debug, Clone, PartialEq)]
pub struct RowField {
    pub name: Option<String>,
    pub signature: TypeSignature,
}

impl TypeSignature {
    /// Decode a wire signature into the tagged tree.
    pub fn from_wire(raw: &RawTypeSignature) -> Result<Self, ProtocolError> {
        let signature = match raw.raw_type.as_str() {
            "boolean" => TypeSignature::Boolean,
            "tinyint" => TypeSignature::TinyInt,
            "smallint" => TypeSignature::SmallInt,
            "integer" => TypeSignature::Integer,
            "bigint" => TypeSignature::BigInt,
            "real" => TypeSignature::Real,
            "double" => TypeSignature::Double,
            "decimal" => TypeSignature::Decimal {
                precision: long_argument(raw, 0).unwrap_or(38) as u32,
                scale: long_argument(raw, 1).unwrap_or(0) as u32,
            },
            "varchar" => {
                let length = long_argument(raw, 0);
                TypeSignature::Varchar {
                    length: match length {
                        None => None,
                        Some(n) if n >= UNBOUNDED_LENGTH => None,
                        Some(n) => Some(n as u32),
                    },
                }
            }
            "char" => TypeSignature::Char {
                length: long_argument(raw, 0).unwrap_or(1) as u32,
            },
            "varbinary" => TypeSignature::Varbinary,
            "json" => TypeSignature::Json,
            "date" => TypeSignature::Date,
            "time" => TypeSignature::Time {
                precision: temporal_precision(raw),
            },
            "time with time zone" => TypeSignature::TimeWithTimeZone {
                precision: temporal_precision(raw),
            },
            "timestamp" => TypeSignature::Timestamp {
                precision: temporal_precision(raw),
            },
            "timestamp with time zone" => TypeSignature::TimestampWithTimeZone {
                precision: temporal_precision(raw),
            },
            "interval year to month" => TypeSignature::IntervalYearToMonth,
            "interval day to second" => TypeSignature::IntervalDayToSecond,
            "uuid" => TypeSignature::Uuid,
            "ipaddress" => TypeSignature::IpAddress,
            "array" => {
                let element = type_argument(raw, 0)?;
                TypeSignature::Array(Box::new(element))
            }
            "map" => {
                let key = type_argument(raw, 0)?;
                let value = type_argument(raw, 1)?;
                TypeSignature::Map {
                    key: Box::new(key),
                    value: Box::new(value),
                }
            }
            "row" => {
                let mut fields = Vec::with_capacity(raw.arguments.len());
                for argument in &raw.arguments {
                    fields.push(named_type_argument(argument)?);
                }
                TypeSignature::Row(fields)
            }
            other => TypeSignature::Other(other.to_string()),
        };
        Ok(signature)
    }

    /// Internal size in characters, for length-parameterized types.
    pub fn internal_size(&self) -> Option<u32> {
        match self {
            TypeSignature::Varchar { length } => *length,
            TypeSignature::Char { length } => Some(*length),
            _ => None,
        }
    }

    /// Numeric or temporal precision, when the type carries one.
    pub fn precision(&self) -> Option<u32> {
        match self {
            TypeSignature::Decimal { precision, .. } => Some(*precision),
            TypeSignature::Time { precision }
            | TypeSignature::TimeWithTimeZone { precision }
            | TypeSignature::Timestamp { precision }
            | TypeSignature::TimestampWithTimeZone { precision } => Some(*precision),
            _ => None,
        }
    }

    /// Decimal scale.
    pub fn scale(&self) -> Option<u32> {
        match self {
            TypeSignature::Decimal { scale, .. } => Some(*scale),
            _ => None,
        }
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSignature::Boolean => write!(f, "boolean"),
            TypeSignature::TinyInt => write!(f, "tinyint"),
            TypeSignature::SmallInt => write!(f, "smallint"),
            TypeSignature::Integer => write!(f, "integer"),
            TypeSignature::BigInt => write!(f, "bigint"),
            TypeSignature::Real => write!(f, "real"),
            TypeSignature::Double => write!(f, "double"),
            TypeSignature::Decimal { precision, scale } => {
                write!(f, "decimal({precision},{scale})")
            }
            TypeSignature::Varchar { length: Some(n) } => write!(f, "varchar({n})"),
            TypeSignature::Varchar { length: None } => write!(f, "varchar"),
            TypeSignature::Char { length } => write!(f, "char({length})"),
            TypeSignature::Varbinary => write!(f, "varbinary"),
            TypeSignature::Json => write!(f, "json"),
            TypeSignature::Date => write!(f, "date"),
            TypeSignature::Time { precision } => write!(f, "time({precision})"),
            TypeSignature::TimeWithTimeZone { precision } => {
                write!(f, "time({precision}) with time zone")
            }
            TypeSignature::Timestamp { precision } => write!(f, "timestamp({precision})"),
            TypeSignature::TimestampWithTimeZone { precision } => {
                write!(f, "timestamp({precision}) with time zone")
            }
            TypeSignature::IntervalYearToMonth => write!(f, "interval year to month"),
            TypeSignature::IntervalDayToSecond => write!(f, "interval day to second"),
            TypeSignature::Uuid => write!(f, "uuid"),
            TypeSignature::IpAddress => write!(f, "ipaddress"),
            TypeSignature::Array(element) => write!(f, "array({element})"),
            TypeSignature::Map { key, value } => write!(f, "map({key},{value})"),
            TypeSignature::Row(fields) => {
                write!(f, "row(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    if let Some(name) = &field.name {
                        write!(f, "{name} ")?;
                    }
                    write!(f, "{}", field.signature)?;
                }
                write!(f, ")")
            }
            TypeSignature::Other(name) => write!(f, "{name}"),
        }
    }
}

fn long_argument(raw: &RawTypeSignature, index: usize) -> Option<u64> {
    raw.arguments
        .get(index)
        .filter(|arg| arg.kind == "LONG")
        .and_then(|arg| arg.value.as_u64())
}

fn temporal_precision(raw: &RawTypeSignature) -> u32 {
    long_argument(raw, 0)
        .map(|p| p as u32)
        .unwrap_or(DEFAULT_TEMPORAL_PRECISION)
}

fn type_argument(raw: &RawTypeSignature, index: usize) -> Result<TypeSignature, ProtocolError> {
    let argument = raw.arguments.get(index).ok_or_else(|| {
        ProtocolError::MalformedEnvelope(format!(
            "signature '{}' is missing type argument {index}",
            raw.raw_type
        ))
    })?;
    let nested: RawTypeSignature = serde_json::from_value(argument.value.clone())
        .map_err(|e| ProtocolError::MalformedEnvelope(format!("bad nested signature: {e}")))?;
    TypeSignature::from_wire(&nested)
}

fn named_type_argument(argument: &RawTypeArgument) -> Result<RowField, ProtocolError> {
    let value = argument.value.as_object().ok_or_else(|| {
        ProtocolError::MalformedEnvelope("row field argument is not an object".to_string())
    })?;
    let name = value
        .get("fieldName")
        .and_then(|field| field.get("name"))
        .and_then(|name| name.as_str())
        .map(str::to_string);
    let raw_signature = value.get("typeSignature").ok_or_else(|| {
        ProtocolError::MalformedEnvelope("row field argument has no typeSignature".to_string())
    })?;
    let nested: RawTypeSignature = serde_json::from_value(raw_signature.clone())
        .map_err(|e| ProtocolError::MalformedEnvelope(format!("bad row field signature: {e}")))?;
    Ok(RowField {
        name,
        signature: TypeSignature::from_wire(&nested)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(json: &str) -> RawTypeSignature {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_leaf_signatures() {
        let sig = TypeSignature::from_wire(&wire(r#"{"rawType": "boolean"}"#)).unwrap();
        assert_eq!(sig, TypeSignature::Boolean);

        let sig = TypeSignature::from_wire(&wire(
            r#"{"rawType": "decimal",
                "arguments": [{"kind": "LONG", "value": 18}, {"kind": "LONG", "value": 4}]}"#,
        ))
        .unwrap();
        assert_eq!(
            sig,
            TypeSignature::Decimal {
                precision: 18,
                scale: 4
            }
        );
        assert_eq!(sig.precision(), Some(18));
        assert_eq!(sig.scale(), Some(4));
        assert_eq!(sig.to_string(), "decimal(18,4)");
    }

    #[test]
    fn test_varchar_length() {
        let bounded = TypeSignature::from_wire(&wire(
            r#"{"rawType": "varchar", "arguments": [{"kind": "LONG", "value": 25}]}"#,
        ))
        .unwrap();
        assert_eq!(bounded, TypeSignature::Varchar { length: Some(25) });
        assert_eq!(bounded.internal_size(), Some(25));

        let unbounded = TypeSignature::from_wire(&wire(
            r#"{"rawType": "varchar", "arguments": [{"kind": "LONG", "value": 2147483647}]}"#,
        ))
        .unwrap();
        assert_eq!(unbounded, TypeSignature::Varchar { length: None });
        assert_eq!(unbounded.to_string(), "varchar");
    }

    #[test]
    fn test_temporal_precision() {
        let sig = TypeSignature::from_wire(&wire(
            r#"{"rawType": "timestamp with time zone",
                "arguments": [{"kind": "LONG", "value": 9}]}"#,
        ))
        .unwrap();
        assert_eq!(sig, TypeSignature::TimestampWithTimeZone { precision: 9 });
        assert_eq!(sig.to_string(), "timestamp(9) with time zone");

        // No argument defaults to millisecond precision
        let sig = TypeSignature::from_wire(&wire(r#"{"rawType": "time"}"#)).unwrap();
        assert_eq!(
            sig,
            TypeSignature::Time {
                precision: DEFAULT_TEMPORAL_PRECISION
            }
        );
    }

    #[test]
    fn test_array_of_row_signature() {
        let sig = TypeSignature::from_wire(&wire(
            r#"{
                "rawType": "array",
                "arguments": [{"kind": "TYPE", "value": {
                    "rawType": "row",
                    "arguments": [
                        {"kind": "NAMED_TYPE", "value": {
                            "fieldName": {"name": "a"},
                            "typeSignature": {"rawType": "integer"}
                        }},
                        {"kind": "NAMED_TYPE", "value": {
                            "typeSignature": {"rawType": "varchar",
                                              "arguments": [{"kind": "LONG", "value": 2147483647}]}
                        }}
                    ]
                }}]
            }"#,
        ))
        .unwrap();

        match sig {
            TypeSignature::Array(element) => match *element {
                TypeSignature::Row(fields) => {
                    assert_eq!(fields.len(), 2);
                    assert_eq!(fields[0].name.as_deref(), Some("a"));
                    assert_eq!(fields[0].signature, TypeSignature::Integer);
                    assert!(fields[1].name.is_none());
                    assert_eq!(fields[1].signature, TypeSignature::Varchar { length: None });
                }
                other => panic!("expected row element, got {other:?}"),
            },
            other => panic!("expected array, got {other:?}"),
        }
    }

    #[test]
    fn test_map_signature() {
        let sig = TypeSignature::from_wire(&wire(
            r#"{
                "rawType": "map",
                "arguments": [
                    {"kind": "TYPE", "value": {"rawType": "varchar",
                        "arguments": [{"kind": "LONG", "value": 2147483647}]}},
                    {"kind": "TYPE", "value": {"rawType": "bigint"}}
                ]
            }"#,
        ))
        .unwrap();
        assert_eq!(
            sig,
            TypeSignature::Map {
                key: Box::new(TypeSignature::Varchar { length: None }),
                value: Box::new(TypeSignature::BigInt),
            }
        );
        assert_eq!(sig.to_string(), "map(varchar,bigint)");
    }

    #[test]
    fn test_unknown_type_passes_through() {
        let sig = TypeSignature::from_wire(&wire(r#"{"rawType": "HyperLogLog"}"#)).unwrap();
        assert_eq!(sig, TypeSignature::Other("HyperLogLog".to_string()));
    }

    #[test]
    fn test_missing_array_element_is_protocol_error() {
        let result = TypeSignature::from_wire(&wire(r#"{"rawType": "array"}"#));
        assert!(matches!(
            result,
            Err(ProtocolError::MalformedEnvelope(_))
        ));
    }
}
