//! Wire type decoding: signatures, typed values and the row decoder.

mod decode;
mod signature;
mod value;

pub use decode::{decode_value, DecodeMode, RowDecoder};
pub use signature::{RowField, TypeSignature, DEFAULT_TEMPORAL_PRECISION};
pub use value::{Row, TimeZoneRef, Value};
