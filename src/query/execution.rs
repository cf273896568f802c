//! Query execution state machine.
//!
//! One `QueryExecution` owns one statement's lifecycle: submit the text,
//! poll `nextUri` until the server stops producing one, merge columns,
//! stats and warnings along the way, and decode each data page (resolving
//! spooled segments transparently). Transitions only move forward:
//!
//! ```text
//! Created → Running → Finished | Failed | Cancelled
//! ```
//!
//! Instances are single-flight: all methods take `&mut self`, so one
//! logical caller at a time drives the machine; the cursor serializes
//! access for concurrent consumers.

use std::sync::Arc;

use crate::connection::session::ClientSession;
use crate::error::{ProtocolError, QueryError, TrinoError};
use crate::transport::messages::{Column, QueryData, StatementStats, TrinoWarning};
use crate::transport::protocol::{StatementResponse, StatementTransport};
use crate::transport::spool::SegmentFetcher;
use crate::types::{DecodeMode, Row, RowDecoder};

/// Lifecycle of one statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    /// Not yet submitted
    Created,
    /// Submitted; the server still hands out a `nextUri`
    Running,
    /// Terminal: drained successfully
    Finished,
    /// Terminal: the server reported an error, or the exchange broke down
    Failed,
    /// Terminal: cancellation was requested locally
    Cancelled,
}

/// State machine driving one statement.
pub struct QueryExecution {
    transport: Arc<dyn StatementTransport>,
    session: Arc<ClientSession>,
    statement: String,
    decode_mode: DecodeMode,
    state: QueryState,
    query_id: Option<String>,
    info_uri: Option<String>,
    next_uri: Option<String>,
    columns: Option<Vec<Column>>,
    decoder: Option<RowDecoder>,
    stats: Option<StatementStats>,
    warnings: Vec<TrinoWarning>,
    update_type: Option<String>,
    update_count: Option<u64>,
    error: Option<QueryError>,
}

impl QueryExecution {
    pub fn new(
        transport: Arc<dyn StatementTransport>,
        session: Arc<ClientSession>,
        statement: impl Into<String>,
        decode_mode: DecodeMode,
    ) -> Self {
        Self {
            transport,
            session,
            statement: statement.into(),
            decode_mode,
            state: QueryState::Created,
            query_id: None,
            info_uri: None,
            next_uri: None,
            columns: None,
            decoder: None,
            stats: None,
            warnings: Vec::new(),
            update_type: None,
            update_count: None,
            error: None,
        }
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            QueryState::Finished | QueryState::Failed | QueryState::Cancelled
        )
    }

    pub fn query_id(&self) -> Option<&str> {
        self.query_id.as_deref()
    }

    pub fn info_uri(&self) -> Option<&str> {
        self.info_uri.as_deref()
    }

    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    pub fn stats(&self) -> Option<&StatementStats> {
        self.stats.as_ref()
    }

    pub fn warnings(&self) -> &[TrinoWarning] {
        &self.warnings
    }

    pub fn update_type(&self) -> Option<&str> {
        self.update_type.as_deref()
    }

    pub fn update_count(&self) -> Option<u64> {
        self.update_count
    }

    /// Take the recorded server error, leaving the machine terminal. The
    /// cursor uses this to raise the failure exactly once.
    pub fn take_error(&mut self) -> Option<QueryError> {
        self.error.take()
    }

    /// Issue the initial POST. Returns the rows of the first page, which
    /// may be empty.
    pub async fn submit(&mut self) -> Result<Vec<Row>, TrinoError> {
        match self.state {
            QueryState::Created => {}
            QueryState::Cancelled => return Err(QueryError::Cancelled.into()),
            _ => {
                return Err(QueryError::InvalidState(
                    "statement was already submitted".to_string(),
                )
                .into())
            }
        }
        tracing::debug!(statement = %self.statement, "submitting statement");
        let snapshot = self.session.snapshot().await;
        let response = match self.transport.submit(&self.statement, &snapshot).await {
            Ok(response) => response,
            Err(error) => {
                self.state = QueryState::Failed;
                return Err(error);
            }
        };
        self.state = QueryState::Running;
        self.process(response).await
    }

    /// Poll the stored `nextUri` once. A no-op returning no rows when the
    /// machine is already terminal.
    pub async fn advance(&mut self) -> Result<Vec<Row>, TrinoError> {
        if self.is_terminal() {
            return Ok(Vec::new());
        }
        let next_uri = match self.next_uri.clone() {
            Some(uri) => uri,
            None => {
                // A non-terminal state always carries a nextUri; defend
                // against a broken server by finishing instead of looping
                self.state = QueryState::Finished;
                return Ok(Vec::new());
            }
        };
        let snapshot = self.session.snapshot().await;
        let response = match self.transport.poll(&next_uri, &snapshot).await {
            Ok(response) => response,
            Err(error) => {
                self.state = QueryState::Failed;
                return Err(error);
            }
        };
        self.process(response).await
    }

    /// Best-effort cancellation: DELETE the current `nextUri` (or the
    /// `infoUri` when none remains). Transport failures are logged and
    /// swallowed; local state transitions to `Cancelled` regardless.
    pub async fn cancel(&mut self) {
        if self.is_terminal() {
            return;
        }
        let uri = self.next_uri.clone().or_else(|| self.info_uri.clone());
        if let Some(uri) = uri {
            tracing::debug!(query_id = ?self.query_id, "cancelling query");
            if let Err(error) = self.transport.cancel(&uri).await {
                tracing::info!(%error, "cancellation request failed");
            }
        }
        self.state = QueryState::Cancelled;
    }

    async fn process(&mut self, response: StatementResponse) -> Result<Vec<Row>, TrinoError> {
        match self.process_inner(response).await {
            Ok(rows) => Ok(rows),
            Err(error) => {
                // A response the client cannot interpret leaves the
                // exchange unusable; later fetches report exhausted
                // instead of repeating the failure
                self.state = QueryState::Failed;
                Err(error)
            }
        }
    }

    async fn process_inner(
        &mut self,
        response: StatementResponse,
    ) -> Result<Vec<Row>, TrinoError> {
        let StatementResponse { results, updates } = response;

        // Session deltas apply only after a successfully parsed response
        self.session.apply(&updates).await;

        if self.query_id.is_none() {
            self.query_id = Some(results.id.clone());
        }
        if self.info_uri.is_none() {
            self.info_uri = results.info_uri.clone();
        }
        if let Some(stats) = results.stats {
            self.stats = Some(stats);
        }
        if !results.warnings.is_empty() {
            self.warnings = results.warnings;
        }
        if results.update_type.is_some() {
            self.update_type = results.update_type;
        }
        if results.update_count.is_some() {
            self.update_count = results.update_count;
        }

        if let Some(columns) = &results.columns {
            match &self.columns {
                None => {
                    self.decoder = Some(RowDecoder::new(columns, self.decode_mode)?);
                    self.columns = Some(columns.clone());
                }
                // Columns never change for the lifetime of a query id
                Some(existing) if existing != columns => {
                    return Err(ProtocolError::ColumnMismatch.into());
                }
                Some(_) => {}
            }
        }

        let mut rows = Vec::new();
        if let Some(data) = results.data {
            let decoder = self
                .decoder
                .as_ref()
                .ok_or(ProtocolError::MissingField("columns"))?;
            match data {
                QueryData::Inline(raw) => {
                    rows = decoder.decode_rows(&raw)?;
                }
                QueryData::Spooled(spooled) => {
                    let fetcher = SegmentFetcher::new(self.transport.as_ref());
                    for segment in &spooled.segments {
                        let raw = fetcher.fetch(&spooled.encoding, segment).await?;
                        rows.extend(decoder.decode_rows(&raw)?);
                    }
                }
            }
        }

        self.next_uri = results.next_uri.clone();
        if let Some(error) = results.error {
            self.state = QueryState::Failed;
            self.error = Some(error.into_query_error(self.query_id.clone()));
            tracing::debug!(query_id = ?self.query_id, "query failed on the server");
        } else if results.next_uri.is_none() {
            self.state = QueryState::Finished;
        } else {
            self.state = QueryState::Running;
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::params::ConnectionParams;
    use crate::connection::session::{SessionSnapshot, SessionUpdates};
    use crate::types::Value;
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::json;

    mock! {
        pub Transport {}

        #[async_trait]
        impl StatementTransport for Transport {
            async fn submit(
                &self,
                statement: &str,
                session: &SessionSnapshot,
            ) -> Result<StatementResponse, TrinoError>;
            async fn poll(
                &self,
                next_uri: &str,
                session: &SessionSnapshot,
            ) -> Result<StatementResponse, TrinoError>;
            async fn cancel(&self, uri: &str) -> Result<(), TrinoError>;
            async fn fetch_segment(&self, uri: &str) -> Result<Vec<u8>, TrinoError>;
            async fn ack_segment(&self, uri: &str) -> Result<(), TrinoError>;
        }
    }

    fn response(body: serde_json::Value) -> StatementResponse {
        StatementResponse {
            results: serde_json::from_value(body).unwrap(),
            updates: SessionUpdates::default(),
        }
    }

    fn session() -> Arc<ClientSession> {
        Arc::new(ClientSession::from_params(
            &ConnectionParams::new("coordinator").with_user("alice"),
        ))
    }

    fn integer_columns() -> serde_json::Value {
        json!([{"name": "_col0", "type": "integer",
                "typeSignature": {"rawType": "integer", "arguments": []}}])
    }

    fn execution(transport: MockTransport) -> QueryExecution {
        QueryExecution::new(
            Arc::new(transport),
            session(),
            "SELECT 1",
            DecodeMode::Typed,
        )
    }

    #[tokio::test]
    async fn test_single_page_query() {
        let mut transport = MockTransport::new();
        let columns = integer_columns();
        transport.expect_submit().times(1).returning(move |_, _| {
            Ok(response(json!({
                "id": "q1",
                "infoUri": "http://coordinator/ui/q1",
                "columns": columns.clone(),
                "data": [[1]],
                "stats": {"state": "FINISHED"}
            })))
        });

        let mut execution = execution(transport);
        assert_eq!(execution.state(), QueryState::Created);

        let rows = execution.submit().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(0), Some(&Value::Integer(1)));
        assert_eq!(execution.state(), QueryState::Finished);
        assert_eq!(execution.query_id(), Some("q1"));
        assert!(execution.is_terminal());

        // advance on a terminal machine is a no-op
        let rows = execution.advance().await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(execution.state(), QueryState::Finished);
    }

    #[tokio::test]
    async fn test_multi_page_advance() {
        let mut transport = MockTransport::new();
        let columns = integer_columns();
        transport.expect_submit().times(1).returning(move |_, _| {
            Ok(response(json!({
                "id": "q1",
                "nextUri": "http://coordinator/v1/statement/q1/1",
                "columns": columns.clone(),
                "data": [[1], [2]],
                "stats": {"state": "RUNNING"}
            })))
        });
        transport
            .expect_poll()
            .times(1)
            .withf(|uri, _| uri == "http://coordinator/v1/statement/q1/1")
            .returning(|_, _| {
                // Empty page, more data pending
                Ok(response(json!({
                    "id": "q1",
                    "nextUri": "http://coordinator/v1/statement/q1/2",
                    "stats": {"state": "RUNNING"}
                })))
            });
        transport
            .expect_poll()
            .times(1)
            .withf(|uri, _| uri == "http://coordinator/v1/statement/q1/2")
            .returning(|_, _| {
                // Data-bearing and terminal at once
                Ok(response(json!({
                    "id": "q1",
                    "data": [[3]],
                    "stats": {"state": "FINISHED"}
                })))
            });

        let mut execution = execution(transport);
        let mut all = execution.submit().await.unwrap();
        while !execution.is_terminal() {
            all.extend(execution.advance().await.unwrap());
        }
        let values: Vec<_> = all.iter().map(|row| row.get(0).cloned().unwrap()).collect();
        assert_eq!(
            values,
            vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]
        );
        assert_eq!(execution.state(), QueryState::Finished);
    }

    #[tokio::test]
    async fn test_server_error_is_recorded_verbatim() {
        let mut transport = MockTransport::new();
        transport.expect_submit().times(1).returning(|_, _| {
            Ok(response(json!({
                "id": "q1",
                "nextUri": "http://coordinator/v1/statement/q1/1",
                "stats": {"state": "RUNNING"}
            })))
        });
        transport.expect_poll().times(1).returning(|_, _| {
            Ok(response(json!({
                "id": "q1",
                "error": {
                    "message": "Division by zero",
                    "errorCode": 8,
                    "errorName": "DIVISION_BY_ZERO",
                    "errorType": "USER_ERROR"
                },
                "stats": {"state": "FAILED"}
            })))
        });

        let mut execution = execution(transport);
        execution.submit().await.unwrap();
        let rows = execution.advance().await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(execution.state(), QueryState::Failed);

        match execution.take_error().unwrap() {
            QueryError::Server {
                error_name,
                error_code,
                message,
                query_id,
                ..
            } => {
                assert_eq!(error_name, "DIVISION_BY_ZERO");
                assert_eq!(error_code, 8);
                assert_eq!(message, "Division by zero");
                assert_eq!(query_id.as_deref(), Some("q1"));
            }
            other => panic!("expected server error, got {other:?}"),
        }
        // The error is taken exactly once
        assert!(execution.take_error().is_none());
    }

    #[tokio::test]
    async fn test_changed_columns_fail_fast() {
        let mut transport = MockTransport::new();
        let columns = integer_columns();
        transport.expect_submit().times(1).returning(move |_, _| {
            Ok(response(json!({
                "id": "q1",
                "nextUri": "http://coordinator/v1/statement/q1/1",
                "columns": columns.clone(),
                "stats": {"state": "RUNNING"}
            })))
        });
        transport.expect_poll().times(1).returning(|_, _| {
            Ok(response(json!({
                "id": "q1",
                "columns": [{"name": "other", "type": "bigint",
                             "typeSignature": {"rawType": "bigint", "arguments": []}}],
                "stats": {"state": "RUNNING"},
                "nextUri": "http://coordinator/v1/statement/q1/2"
            })))
        });

        let mut execution = execution(transport);
        execution.submit().await.unwrap();
        let result = execution.advance().await;
        assert!(matches!(
            result,
            Err(TrinoError::Protocol(ProtocolError::ColumnMismatch))
        ));
        assert_eq!(execution.state(), QueryState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_swallows_transport_failure() {
        let mut transport = MockTransport::new();
        transport.expect_submit().times(1).returning(|_, _| {
            Ok(response(json!({
                "id": "q1",
                "infoUri": "http://coordinator/ui/q1",
                "nextUri": "http://coordinator/v1/statement/q1/1",
                "stats": {"state": "RUNNING"}
            })))
        });
        transport
            .expect_cancel()
            .times(1)
            .withf(|uri| uri == "http://coordinator/v1/statement/q1/1")
            .returning(|_| {
                Err(crate::error::ConnectionError::Http {
                    status: 500,
                    message: "boom".to_string(),
                }
                .into())
            });

        let mut execution = execution(transport);
        execution.submit().await.unwrap();
        // Cancellation is advisory: the transport error never surfaces
        execution.cancel().await;
        assert_eq!(execution.state(), QueryState::Cancelled);
    }

    #[tokio::test]
    async fn test_spooled_page_is_resolved_through_transport() {
        let mut transport = MockTransport::new();
        let columns = integer_columns();
        transport.expect_submit().times(1).returning(move |_, _| {
            Ok(response(json!({
                "id": "q1",
                "columns": columns.clone(),
                "data": {
                    "encoding": "json",
                    "segments": [
                        {"type": "spooled",
                         "uri": "https://storage/seg/1",
                         "ackUri": "https://storage/seg/1/ack"}
                    ]
                },
                "stats": {"state": "FINISHED"}
            })))
        });
        transport
            .expect_fetch_segment()
            .times(1)
            .withf(|uri| uri == "https://storage/seg/1")
            .returning(|_| Ok(br#"[[10], [20]]"#.to_vec()));
        transport
            .expect_ack_segment()
            .times(1)
            .withf(|uri| uri == "https://storage/seg/1/ack")
            .returning(|_| Ok(()));

        let mut execution = execution(transport);
        let rows = execution.submit().await.unwrap();
        let values: Vec<_> = rows.iter().map(|row| row.get(0).cloned().unwrap()).collect();
        assert_eq!(values, vec![Value::Integer(10), Value::Integer(20)]);
        assert_eq!(execution.state(), QueryState::Finished);
    }

    #[tokio::test]
    async fn test_update_count_without_columns() {
        let mut transport = MockTransport::new();
        transport.expect_submit().times(1).returning(|_, _| {
            Ok(response(json!({
                "id": "q1",
                "updateType": "INSERT",
                "updateCount": 3,
                "stats": {"state": "FINISHED"}
            })))
        });

        let mut execution = execution(transport);
        let rows = execution.submit().await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(execution.update_type(), Some("INSERT"));
        assert_eq!(execution.update_count(), Some(3));
        assert_eq!(execution.state(), QueryState::Finished);
    }

    #[tokio::test]
    async fn test_double_submit_is_invalid() {
        let mut transport = MockTransport::new();
        transport.expect_submit().times(1).returning(|_, _| {
            Ok(response(json!({
                "id": "q1",
                "stats": {"state": "FINISHED"}
            })))
        });

        let mut execution = execution(transport);
        execution.submit().await.unwrap();
        let result = execution.submit().await;
        assert!(matches!(
            result,
            Err(TrinoError::Query(QueryError::InvalidState(_)))
        ));
    }
}
