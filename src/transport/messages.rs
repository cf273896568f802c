//! Statement protocol message types.
//!
//! This module defines the JSON structures exchanged with the coordinator's
//! `/v1/statement` endpoint, and the protocol header names the client sends
//! and interprets.

use serde::Deserialize;

/// Protocol header names.
///
/// Headers prefixed `X-Trino-Set`/`X-Trino-Clear`/`X-Trino-Added`/
/// `X-Trino-Deallocated` arrive on responses and must be echoed back through
/// the session state on subsequent requests.
pub mod headers {
    pub const USER: &str = "X-Trino-User";
    pub const SOURCE: &str = "X-Trino-Source";
    pub const CATALOG: &str = "X-Trino-Catalog";
    pub const SCHEMA: &str = "X-Trino-Schema";
    pub const TIME_ZONE: &str = "X-Trino-Time-Zone";
    pub const LANGUAGE: &str = "X-Trino-Language";
    pub const CLIENT_INFO: &str = "X-Trino-Client-Info";
    pub const CLIENT_TAGS: &str = "X-Trino-Client-Tags";
    pub const EXTRA_CREDENTIAL: &str = "X-Trino-Extra-Credential";

    pub const SESSION: &str = "X-Trino-Session";
    pub const SET_SESSION: &str = "X-Trino-Set-Session";
    pub const CLEAR_SESSION: &str = "X-Trino-Clear-Session";

    pub const ROLE: &str = "X-Trino-Role";
    pub const SET_ROLE: &str = "X-Trino-Set-Role";

    pub const SET_CATALOG: &str = "X-Trino-Set-Catalog";
    pub const SET_SCHEMA: &str = "X-Trino-Set-Schema";

    pub const TRANSACTION: &str = "X-Trino-Transaction-Id";
    pub const STARTED_TRANSACTION: &str = "X-Trino-Started-Transaction-Id";
    pub const CLEAR_TRANSACTION: &str = "X-Trino-Clear-Transaction-Id";

    pub const PREPARED_STATEMENT: &str = "X-Trino-Prepared-Statement";
    pub const ADDED_PREPARE: &str = "X-Trino-Added-Prepare";
    pub const DEALLOCATED_PREPARE: &str = "X-Trino-Deallocated-Prepare";
}

/// Path of the statement submission endpoint.
pub const STATEMENT_PATH: &str = "/v1/statement";

/// Marker value for the transaction header when no transaction is active.
pub const NO_TRANSACTION: &str = "NONE";

/// One polling response from the coordinator.
///
/// A response without `next_uri` is terminal; `error` and a present
/// `next_uri` are mutually exclusive.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResults {
    /// Query id assigned by the coordinator
    pub id: String,
    /// URI with human-readable information about the query
    pub info_uri: Option<String>,
    /// URI to poll for the next portion of results; absent when terminal
    pub next_uri: Option<String>,
    /// URI for partial cancellation of the current stage
    pub partial_cancel_uri: Option<String>,
    /// Column metadata; may be absent on early polls
    pub columns: Option<Vec<Column>>,
    /// Row data, inline or spooled
    pub data: Option<QueryData>,
    /// Execution statistics
    pub stats: Option<StatementStats>,
    /// Terminal query failure
    pub error: Option<ErrorInfo>,
    /// Warnings accumulated so far
    #[serde(default)]
    pub warnings: Vec<TrinoWarning>,
    /// Kind of update performed (e.g. "INSERT"), for non-SELECT statements
    pub update_type: Option<String>,
    /// Number of rows affected, when the engine can determine it
    pub update_count: Option<u64>,
}

/// Row payload of a polling response.
///
/// Servers either inline rows as a JSON array of arrays or, with protocol
/// spooling enabled, reference externally stored segments.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QueryData {
    /// Rows inlined in the envelope
    Inline(Vec<Vec<serde_json::Value>>),
    /// Rows spooled to external storage
    Spooled(SpooledData),
}

/// Spooled data descriptor: a shared encoding plus an ordered segment list.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpooledData {
    /// Encoding identifier, e.g. "json" or "json+lz4"
    pub encoding: String,
    /// Ordered segments making up the data page
    pub segments: Vec<Segment>,
}

/// One segment of a spooled data page.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    /// "inline" or "spooled"
    #[serde(rename = "type")]
    pub kind: String,
    /// Base64 payload for inline segments
    pub data: Option<String>,
    /// Storage URI for spooled segments
    pub uri: Option<String>,
    /// URI to call exactly once after successful consumption
    pub ack_uri: Option<String>,
    /// Decode metadata
    #[serde(default)]
    pub metadata: SegmentMetadata,
}

/// Decode metadata attached to a segment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMetadata {
    /// Stored (possibly compressed) byte length
    pub segment_size: Option<u64>,
    /// Byte length after decompression
    pub uncompressed_size: Option<u64>,
    /// Offset of the first row in the logical row stream
    pub row_offset: Option<u64>,
    /// Number of rows in the segment
    pub rows_count: Option<u64>,
}

/// Column metadata from the envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    /// Column name
    pub name: String,
    /// Textual type, e.g. "timestamp(6) with time zone"
    #[serde(rename = "type")]
    pub type_name: String,
    /// Structured type signature
    pub type_signature: Option<RawTypeSignature>,
}

/// Structured type signature as sent on the wire.
///
/// Composite types nest through `arguments`; see
/// [`crate::types::TypeSignature`] for the decoded tree.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTypeSignature {
    /// Base type name, e.g. "decimal", "array", "row"
    pub raw_type: String,
    /// Type arguments (precision, element types, row fields)
    #[serde(default)]
    pub arguments: Vec<RawTypeArgument>,
}

/// One argument of a type signature.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTypeArgument {
    /// Argument kind: "LONG", "TYPE", "NAMED_TYPE" or "VARIABLE"
    pub kind: String,
    /// Kind-dependent payload
    pub value: serde_json::Value,
}

/// Execution statistics reported with every response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementStats {
    pub state: Option<String>,
    #[serde(default)]
    pub queued: bool,
    #[serde(default)]
    pub scheduled: bool,
    #[serde(default)]
    pub nodes: u64,
    #[serde(default)]
    pub total_splits: u64,
    #[serde(default)]
    pub queued_splits: u64,
    #[serde(default)]
    pub running_splits: u64,
    #[serde(default)]
    pub completed_splits: u64,
    #[serde(default)]
    pub cpu_time_millis: u64,
    #[serde(default)]
    pub wall_time_millis: u64,
    #[serde(default)]
    pub queued_time_millis: u64,
    #[serde(default)]
    pub elapsed_time_millis: u64,
    #[serde(default)]
    pub processed_rows: u64,
    #[serde(default)]
    pub processed_bytes: u64,
    #[serde(default)]
    pub physical_input_bytes: u64,
    #[serde(default)]
    pub peak_memory_bytes: u64,
    #[serde(default)]
    pub spilled_bytes: u64,
}

/// Warning reported by the engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrinoWarning {
    pub warning_code: Option<WarningCode>,
    pub message: String,
}

/// Numeric code and symbolic name of a warning.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningCode {
    pub code: i32,
    pub name: String,
}

/// Query failure information, preserved verbatim.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default)]
    pub error_code: i32,
    pub error_name: Option<String>,
    pub error_type: Option<String>,
    pub error_location: Option<ErrorLocation>,
    pub failure_info: Option<serde_json::Value>,
}

/// Position of an error in the statement text.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLocation {
    pub line_number: u32,
    pub column_number: u32,
}

impl QueryResults {
    /// A response without a `nextUri` is terminal.
    pub fn is_terminal(&self) -> bool {
        self.next_uri.is_none()
    }
}

impl ErrorInfo {
    /// Convert into the caller-facing error kind, attaching the query id.
    pub fn into_query_error(self, query_id: Option<String>) -> crate::error::QueryError {
        crate::error::QueryError::Server {
            message: self.message,
            error_code: self.error_code,
            error_name: self.error_name.unwrap_or_else(|| "GENERIC_ERROR".to_string()),
            error_type: self.error_type.unwrap_or_else(|| "INTERNAL_ERROR".to_string()),
            query_id,
            location: self
                .error_location
                .map(|loc| (loc.line_number, loc.column_number)),
        }
    }
}
