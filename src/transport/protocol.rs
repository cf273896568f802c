//! Transport abstraction.
//!
//! The `StatementTransport` trait is the seam between the query execution
//! state machine and the wire: submitting, polling, cancelling and segment
//! retrieval. The production implementation is
//! [`crate::transport::http::HttpTransport`]; tests substitute mocks.

use async_trait::async_trait;

use crate::connection::session::{SessionSnapshot, SessionUpdates};
use crate::error::TrinoError;
use crate::transport::messages::QueryResults;

/// One processed protocol exchange: the decoded envelope plus the session
/// deltas carried by the response headers.
#[derive(Debug, Clone)]
pub struct StatementResponse {
    pub results: QueryResults,
    pub updates: SessionUpdates,
}

/// Transport operations required to drive one statement.
///
/// Every method applies the connection's authentication strategy and retry
/// policy; segment storage goes through the same client configuration as
/// the coordinator.
#[async_trait]
pub trait StatementTransport: Send + Sync {
    /// POST the statement text, opening a query.
    async fn submit(
        &self,
        statement: &str,
        session: &SessionSnapshot,
    ) -> Result<StatementResponse, TrinoError>;

    /// GET the next portion of results.
    async fn poll(
        &self,
        next_uri: &str,
        session: &SessionSnapshot,
    ) -> Result<StatementResponse, TrinoError>;

    /// DELETE the given URI to request cancellation.
    async fn cancel(&self, uri: &str) -> Result<(), TrinoError>;

    /// GET an encoded spooled-segment block.
    async fn fetch_segment(&self, uri: &str) -> Result<Vec<u8>, TrinoError>;

    /// POST the acknowledgement for a consumed segment.
    async fn ack_segment(&self, uri: &str) -> Result<(), TrinoError>;
}
