//! Result cursor.
//!
//! A `Cursor` wraps one [`QueryExecution`] and exposes pull-based row
//! retrieval: one row, a bounded batch, or a full drain. Rows are buffered
//! one page at a time and delivered exactly once regardless of how fetch
//! calls interleave. A recorded server failure is raised only when the
//! stream actually needs to advance past the failure point — rows buffered
//! before it are always delivered first.

use std::collections::VecDeque;

use crate::error::{ProtocolError, TrinoError};
use crate::query::execution::{QueryExecution, QueryState};
use crate::transport::messages::{Column, StatementStats, TrinoWarning};
use crate::types::{Row, TypeSignature};

/// Column attributes exposed to relational-mapping adapters.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescription {
    pub name: String,
    /// Textual type, e.g. "timestamp(6) with time zone"
    pub type_name: String,
    /// Character length for length-parameterized types
    pub internal_size: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

impl ColumnDescription {
    fn from_column(column: &Column) -> Result<Self, ProtocolError> {
        let raw = column
            .type_signature
            .as_ref()
            .ok_or(ProtocolError::MissingField("typeSignature"))?;
        let signature = TypeSignature::from_wire(raw)?;
        Ok(Self {
            name: column.name.clone(),
            type_name: column.type_name.clone(),
            internal_size: signature.internal_size(),
            precision: signature.precision(),
            scale: signature.scale(),
        })
    }
}

/// Pull-based iterator over one statement's row stream.
pub struct Cursor {
    execution: QueryExecution,
    buffer: VecDeque<Row>,
    /// Failure hit at a fetch_many/fetch_all boundary after rows were
    /// already collected for that call; raised by the next fetch
    pending_error: Option<TrinoError>,
    closed: bool,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("buffered", &self.buffer.len())
            .field("pending_error", &self.pending_error)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Cursor {
    /// Submit the statement and block until the first page of rows or a
    /// terminal state arrives, so a failing statement is detectable
    /// without an explicit fetch.
    pub(crate) async fn run(mut execution: QueryExecution) -> Result<Self, TrinoError> {
        let mut buffer = VecDeque::new();
        buffer.extend(execution.submit().await?);
        while buffer.is_empty() && !execution.is_terminal() {
            buffer.extend(execution.advance().await?);
        }
        if buffer.is_empty() {
            // Failures on zero-row terminal queries surface immediately
            if let Some(error) = execution.take_error() {
                return Err(error.into());
            }
        }
        Ok(Self {
            execution,
            buffer,
            pending_error: None,
            closed: false,
        })
    }

    /// Fetch the next row, or `None` when the stream is exhausted.
    ///
    /// Pulls additional pages as needed. A recorded failure is raised by
    /// the first call that needs data past the failure point, exactly
    /// once; afterwards the cursor reports exhausted.
    pub async fn fetch_one(&mut self) -> Result<Option<Row>, TrinoError> {
        if let Some(row) = self.buffer.pop_front() {
            return Ok(Some(row));
        }
        if let Some(error) = self.pending_error.take() {
            return Err(error);
        }
        loop {
            if self.execution.is_terminal() {
                if let Some(error) = self.execution.take_error() {
                    return Err(error.into());
                }
                // Cancelled and drained streams both read as exhausted
                return Ok(None);
            }
            self.buffer.extend(self.execution.advance().await?);
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
        }
    }

    /// Fetch up to `count` rows — never fewer unless the stream is
    /// exhausted. A failure encountered after rows were collected for
    /// this call is held back and raised by the next fetch instead, so no
    /// already-delivered row is lost or repeated.
    pub async fn fetch_many(&mut self, count: usize) -> Result<Vec<Row>, TrinoError> {
        let mut rows = Vec::new();
        while rows.len() < count {
            match self.fetch_one().await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(error) => {
                    if rows.is_empty() {
                        return Err(error);
                    }
                    self.pending_error = Some(error);
                    break;
                }
            }
        }
        Ok(rows)
    }

    /// Drain the stream to termination.
    pub async fn fetch_all(&mut self) -> Result<Vec<Row>, TrinoError> {
        let mut rows = Vec::new();
        loop {
            match self.fetch_one().await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => break,
                Err(error) => {
                    if rows.is_empty() {
                        return Err(error);
                    }
                    self.pending_error = Some(error);
                    break;
                }
            }
        }
        Ok(rows)
    }

    /// Per-column description, available once the server has described the
    /// result set.
    pub fn description(&self) -> Result<Option<Vec<ColumnDescription>>, TrinoError> {
        match self.execution.columns() {
            Some(columns) => {
                let descriptions: Result<Vec<_>, _> =
                    columns.iter().map(ColumnDescription::from_column).collect();
                Ok(Some(descriptions?))
            }
            None => Ok(None),
        }
    }

    /// Rows affected by an update statement; `None` means unknown, never
    /// zero. Row counts of streamed SELECTs are unknowable up front.
    pub fn row_count(&self) -> Option<u64> {
        self.execution.update_count()
    }

    /// Server-assigned query id.
    pub fn query_id(&self) -> Option<&str> {
        self.execution.query_id()
    }

    /// URI with human-readable information about the query.
    pub fn info_uri(&self) -> Option<&str> {
        self.execution.info_uri()
    }

    /// Kind of update performed, for non-SELECT statements.
    pub fn update_type(&self) -> Option<&str> {
        self.execution.update_type()
    }

    /// Latest execution statistics.
    pub fn stats(&self) -> Option<&StatementStats> {
        self.execution.stats()
    }

    /// Warnings reported by the engine.
    pub fn warnings(&self) -> &[TrinoWarning] {
        self.execution.warnings()
    }

    /// Current execution state.
    pub fn state(&self) -> QueryState {
        self.execution.state()
    }

    /// Request cancellation of the running query. Advisory and
    /// best-effort: never raises, and buffered rows stay intact.
    pub async fn cancel(&mut self) {
        self.execution.cancel().await;
    }

    /// Close the cursor. Idempotent; an unconsumed healthy query gets a
    /// best-effort cancel so the server can release resources.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if !self.execution.is_terminal() {
            self.execution.cancel().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::params::ConnectionParams;
    use crate::connection::session::{ClientSession, SessionSnapshot, SessionUpdates};
    use crate::error::QueryError;
    use crate::transport::protocol::{StatementResponse, StatementTransport};
    use crate::types::{DecodeMode, Value};
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::json;
    use std::sync::Arc;

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

    fn integer_columns() -> serde_json::Value {
        json!([{"name": "v", "type": "integer",
                "typeSignature": {"rawType": "integer", "arguments": []}}])
    }

    async fn cursor(transport: MockTransport) -> Result<Cursor, TrinoError> {
        let session = Arc::new(ClientSession::from_params(
            &ConnectionParams::new("coordinator"),
        ));
        Cursor::run(QueryExecution::new(
            Arc::new(transport),
            session,
            "SELECT v FROM t",
            DecodeMode::Typed,
        ))
        .await
    }

    /// Transport scripted with pages [[1,2], [3], [4,5]].
    fn paged_transport() -> MockTransport {
        let mut transport = MockTransport::new();
        let columns = integer_columns();
        transport.expect_submit().times(1).returning(move |_, _| {
            Ok(response(json!({
                "id": "q1",
                "nextUri": "next/1",
                "columns": columns.clone(),
                "data": [[1], [2]],
                "stats": {"state": "RUNNING"}
            })))
        });
        transport
            .expect_poll()
            .times(1)
            .withf(|uri, _| uri == "next/1")
            .returning(|_, _| {
                Ok(response(json!({
                    "id": "q1",
                    "nextUri": "next/2",
                    "data": [[3]],
                    "stats": {"state": "RUNNING"}
                })))
            });
        transport
            .expect_poll()
            .times(1)
            .withf(|uri, _| uri == "next/2")
            .returning(|_, _| {
                Ok(response(json!({
                    "id": "q1",
                    "data": [[4], [5]],
                    "stats": {"state": "FINISHED"}
                })))
            });
        transport
    }

    fn values(rows: &[Row]) -> Vec<i32> {
        rows.iter()
            .map(|row| match row.get(0) {
                Some(Value::Integer(v)) => *v,
                other => panic!("unexpected cell {other:?}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_fetch_all_returns_every_row_in_order() {
        let mut cursor = cursor(paged_transport()).await.unwrap();
        let rows = cursor.fetch_all().await.unwrap();
        assert_eq!(values(&rows), vec![1, 2, 3, 4, 5]);

        // Exhausted afterwards
        assert!(cursor.fetch_one().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interleaved_fetches_are_exactly_once() {
        let mut cursor = cursor(paged_transport()).await.unwrap();

        let first = cursor.fetch_one().await.unwrap().unwrap();
        let batch = cursor.fetch_many(2).await.unwrap();
        let rest = cursor.fetch_all().await.unwrap();

        let mut all = vec![first];
        all.extend(batch);
        all.extend(rest);
        assert_eq!(values(&all), vec![1, 2, 3, 4, 5]);
        assert!(cursor.fetch_one().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_many_crosses_page_boundaries() {
        let mut cursor = cursor(paged_transport()).await.unwrap();
        // Page one holds 2 rows; fetch_many(4) must not stop short
        let batch = cursor.fetch_many(4).await.unwrap();
        assert_eq!(values(&batch), vec![1, 2, 3, 4]);
        let rest = cursor.fetch_all().await.unwrap();
        assert_eq!(values(&rest), vec![5]);
    }

    #[tokio::test]
    async fn test_buffered_rows_delivered_before_error() {
        let mut transport = MockTransport::new();
        let columns = integer_columns();
        transport.expect_submit().times(1).returning(move |_, _| {
            Ok(response(json!({
                "id": "q1",
                "nextUri": "next/1",
                "columns": columns.clone(),
                "data": [[1], [2]],
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

        let mut cursor = cursor(transport).await.unwrap();
        // Rows buffered before the failure still come out
        assert_eq!(values(&[cursor.fetch_one().await.unwrap().unwrap()]), vec![1]);
        assert_eq!(values(&[cursor.fetch_one().await.unwrap().unwrap()]), vec![2]);
        // The first fetch that needs to advance raises the server error
        match cursor.fetch_one().await {
            Err(TrinoError::Query(QueryError::Server { error_name, .. })) => {
                assert_eq!(error_name, "DIVISION_BY_ZERO")
            }
            other => panic!("expected server error, got {other:?}"),
        }
        // Raised exactly once; afterwards the stream reads exhausted
        assert!(cursor.fetch_one().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_all_holds_error_until_collected_rows_are_returned() {
        let mut transport = MockTransport::new();
        let columns = integer_columns();
        transport.expect_submit().times(1).returning(move |_, _| {
            Ok(response(json!({
                "id": "q1",
                "nextUri": "next/1",
                "columns": columns.clone(),
                "data": [[1]],
                "stats": {"state": "RUNNING"}
            })))
        });
        transport.expect_poll().times(1).returning(|_, _| {
            Ok(response(json!({
                "id": "q1",
                "error": {"message": "boom", "errorCode": 1,
                          "errorName": "GENERIC_INTERNAL_ERROR",
                          "errorType": "INTERNAL_ERROR"},
                "stats": {"state": "FAILED"}
            })))
        });

        let mut cursor = cursor(transport).await.unwrap();
        // fetch_all keeps the rows it already collected and defers the error
        let rows = cursor.fetch_all().await.unwrap();
        assert_eq!(values(&rows), vec![1]);
        // The deferred error surfaces on the next fetch
        assert!(matches!(
            cursor.fetch_one().await,
            Err(TrinoError::Query(QueryError::Server { .. }))
        ));
    }

    #[tokio::test]
    async fn test_zero_row_failure_surfaces_at_execute() {
        let mut transport = MockTransport::new();
        transport.expect_submit().times(1).returning(|_, _| {
            Ok(response(json!({
                "id": "q1",
                "error": {"message": "line 1:8: Column 'x' cannot be resolved",
                          "errorCode": 47,
                          "errorName": "COLUMN_NOT_FOUND",
                          "errorType": "USER_ERROR"},
                "stats": {"state": "FAILED"}
            })))
        });

        let result = cursor(transport).await;
        assert!(matches!(
            result,
            Err(TrinoError::Query(QueryError::Server { .. }))
        ));
    }

    #[tokio::test]
    async fn test_update_count_and_unknown_rowcount() {
        let mut transport = MockTransport::new();
        transport.expect_submit().times(1).returning(|_, _| {
            Ok(response(json!({
                "id": "q1",
                "updateType": "INSERT",
                "updateCount": 3,
                "stats": {"state": "FINISHED"}
            })))
        });

        let mut cursor = cursor(transport).await.unwrap();
        assert_eq!(cursor.row_count(), Some(3));
        assert_eq!(cursor.update_type(), Some("INSERT"));
        // No data columns: exhausted without error
        assert!(cursor.fetch_one().await.unwrap().is_none());

        let mut cursor = cursor_select_one().await;
        // A SELECT reports unknown, not zero
        assert_eq!(cursor.row_count(), None);
        assert!(cursor.fetch_one().await.unwrap().is_some());
    }

    async fn cursor_select_one() -> Cursor {
        let mut transport = MockTransport::new();
        let columns = integer_columns();
        transport.expect_submit().times(1).returning(move |_, _| {
            Ok(response(json!({
                "id": "q2",
                "columns": columns.clone(),
                "data": [[1]],
                "stats": {"state": "FINISHED"}
            })))
        });
        cursor(transport).await.unwrap()
    }

    #[tokio::test]
    async fn test_description() {
        let mut transport = MockTransport::new();
        transport.expect_submit().times(1).returning(|_, _| {
            Ok(response(json!({
                "id": "q1",
                "columns": [
                    {"name": "d", "type": "decimal(18,4)",
                     "typeSignature": {"rawType": "decimal",
                                       "arguments": [{"kind": "LONG", "value": 18},
                                                     {"kind": "LONG", "value": 4}]}},
                    {"name": "s", "type": "varchar(25)",
                     "typeSignature": {"rawType": "varchar",
                                       "arguments": [{"kind": "LONG", "value": 25}]}}
                ],
                "data": [],
                "stats": {"state": "FINISHED"}
            })))
        });

        let cursor = cursor(transport).await.unwrap();
        let description = cursor.description().unwrap().unwrap();
        assert_eq!(description.len(), 2);
        assert_eq!(description[0].name, "d");
        assert_eq!(description[0].precision, Some(18));
        assert_eq!(description[0].scale, Some(4));
        assert_eq!(description[0].internal_size, None);
        assert_eq!(description[1].internal_size, Some(25));
        assert_eq!(description[1].type_name, "varchar(25)");
    }

    #[tokio::test]
    async fn test_close_cancels_unconsumed_query() {
        let mut transport = MockTransport::new();
        let columns = integer_columns();
        transport.expect_submit().times(1).returning(move |_, _| {
            Ok(response(json!({
                "id": "q1",
                "nextUri": "next/1",
                "columns": columns.clone(),
                "data": [[1]],
                "stats": {"state": "RUNNING"}
            })))
        });
        transport
            .expect_cancel()
            .times(1)
            .withf(|uri| uri == "next/1")
            .returning(|_| Ok(()));

        let mut cursor = cursor(transport).await.unwrap();
        cursor.close().await;
        // Idempotent: a second close neither cancels again nor errors
        cursor.close().await;
        assert_eq!(cursor.state(), QueryState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_cursor_reads_exhausted_after_buffer() {
        let mut transport = MockTransport::new();
        let columns = integer_columns();
        transport.expect_submit().times(1).returning(move |_, _| {
            Ok(response(json!({
                "id": "q1",
                "nextUri": "next/1",
                "columns": columns.clone(),
                "data": [[1]],
                "stats": {"state": "RUNNING"}
            })))
        });
        transport.expect_cancel().times(1).returning(|_| Ok(()));

        let mut cursor = cursor(transport).await.unwrap();
        cursor.cancel().await;
        // Buffered rows are not corrupted by cancellation
        assert_eq!(values(&[cursor.fetch_one().await.unwrap().unwrap()]), vec![1]);
        // Then the stream reads exhausted rather than raising
        assert!(cursor.fetch_one().await.unwrap().is_none());
    }
}
