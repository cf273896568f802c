//! # trino-rs
//!
//! Async client for the Trino distributed SQL engine's HTTP protocol.
//!
//! The client submits a statement with an HTTP POST, polls the returned
//! `nextUri` until the query reaches a terminal state, and streams decoded,
//! typed rows back through a pull-based cursor. Retries, authentication,
//! spooled result segments and session/transaction headers are handled
//! transparently.
//!
//! ## Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use trino_rs::{Connection, ConnectionParams, NoAuthentication};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let params = ConnectionParams::new("coordinator.example.com")
//!     .with_user("alice")
//!     .with_catalog("hive")
//!     .with_schema("default");
//! let connection = Connection::connect(params, Arc::new(NoAuthentication))?;
//!
//! let mut cursor = connection.execute("SELECT id, name FROM users").await?;
//! while let Some(row) = cursor.fetch_one().await? {
//!     println!("{:?}", row.get(0));
//! }
//!
//! cursor.close().await;
//! connection.close().await;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod query;
pub mod transport;
pub mod types;

pub use connection::auth::{
    AuthScheme, Authentication, BasicAuthentication, BearerAuthentication,
    CertificateAuthentication, Challenge, ChallengeAction, GssNegotiator, InMemoryTokenCache,
    KerberosAuthentication, LoggingRedirectHandler, NoAuthentication, OAuth2Authentication,
    RedirectHandler, TokenCache,
};
pub use connection::params::{ConnectionParams, IsolationLevel, PreparedStatementMode};
pub use connection::session::{ClientSession, SessionSnapshot, SessionUpdates};
pub use connection::Connection;
pub use error::{
    AuthenticationError, ConnectionError, DataError, ProtocolError, QueryError, TrinoError,
};
pub use query::{ColumnDescription, Cursor, QueryState, StatementRequest};
pub use transport::{HttpTransport, RetryPolicy, StatementTransport};
pub use types::{DecodeMode, Row, TimeZoneRef, TypeSignature, Value};
