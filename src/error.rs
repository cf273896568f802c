//! Error types for trino-rs.
//!
//! This module defines domain-specific error types organized by functional area.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type encompassing all possible errors.
#[derive(Error, Debug)]
pub enum TrinoError {
    /// Transport-level errors (unreachable coordinator, exhausted retries)
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Malformed or unexpected protocol payloads
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Errors reported by the engine for a query
    #[error(transparent)]
    Query(#[from] QueryError),

    /// Wire value decoding errors
    #[error(transparent)]
    Data(#[from] DataError),

    /// Non-retryable credential rejection
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
}

/// Errors related to reaching the coordinator or segment storage.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The request never produced a usable HTTP response
    #[error("failed to reach {url}: {message}")]
    Unreachable { url: String, message: String },

    /// A non-retryable HTTP status was returned
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The retry policy gave up
    #[error("retries exhausted after {attempts} attempts in {elapsed:?}: {last}")]
    RetriesExhausted {
        attempts: u32,
        elapsed: Duration,
        last: String,
    },

    /// Invalid connection parameters
    #[error("invalid connection parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Connection is closed
    #[error("connection is closed")]
    Closed,
}

/// Errors caused by responses the client cannot interpret.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The response body is not the expected statement envelope
    #[error("malformed response envelope: {0}")]
    MalformedEnvelope(String),

    /// The server sent a different column set for an already-described query
    #[error("column metadata changed during query execution")]
    ColumnMismatch,

    /// A spooled segment uses an encoding this client cannot decode
    #[error("unsupported segment encoding '{0}'")]
    UnsupportedEncoding(String),

    /// A required envelope field is absent
    #[error("response is missing required field '{0}'")]
    MissingField(&'static str),

    /// A segment payload could not be decompressed or parsed
    #[error("invalid segment payload: {0}")]
    InvalidSegment(String),
}

/// Errors reported by the engine itself.
#[derive(Error, Debug)]
pub enum QueryError {
    /// A terminal query failure, preserved verbatim from the server
    #[error("query failed: {error_name}: {message}")]
    Server {
        message: String,
        error_code: i32,
        error_name: String,
        error_type: String,
        query_id: Option<String>,
        /// (line, column) in the statement text, when the server reports one
        location: Option<(u32, u32)>,
    },

    /// The statement was cancelled before or during execution
    #[error("query has been cancelled")]
    Cancelled,

    /// A statement was issued in a state that does not allow it
    #[error("invalid query state: {0}")]
    InvalidState(String),
}

impl QueryError {
    /// Whether the server classified this as a user error.
    pub fn is_user_error(&self) -> bool {
        matches!(self, QueryError::Server { error_type, .. } if error_type == "USER_ERROR")
    }

    /// Whether the server classified this as an external (connector) error.
    pub fn is_external_error(&self) -> bool {
        matches!(self, QueryError::Server { error_type, .. } if error_type == "EXTERNAL")
    }
}

/// Errors converting wire values into typed values.
#[derive(Error, Debug)]
pub enum DataError {
    /// The raw value does not parse as the declared type
    #[error("cannot decode {value} as {trino_type}: {message}")]
    Conversion {
        trino_type: String,
        value: String,
        message: String,
    },

    /// The value parses but does not fit the target representation
    #[error("value {value} out of range for {trino_type}")]
    OutOfRange { trino_type: String, value: String },

    /// A parameter value has no SQL literal form
    #[error("query parameter of type {0} cannot be encoded as a SQL literal")]
    UnsupportedParameter(&'static str),
}

/// Non-retryable authentication failures.
#[derive(Error, Debug)]
pub enum AuthenticationError {
    /// The server rejected the presented credentials
    #[error("credentials rejected: {0}")]
    Rejected(String),

    /// The challenge offered no scheme this strategy supports
    #[error("no supported authentication scheme in challenge: {0}")]
    UnsupportedChallenge(String),

    /// The OAuth2 redirect/token flow failed
    #[error("OAuth2 flow failed: {0}")]
    OAuth2(String),

    /// Client certificate material could not be loaded
    #[error("invalid client certificate: {0}")]
    Certificate(String),

    /// The external GSSAPI negotiator failed
    #[error("GSSAPI negotiation failed: {0}")]
    Gssapi(String),
}
