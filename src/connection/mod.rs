//! Logical connections.
//!
//! A `Connection` owns one authenticated transport and one
//! [`ClientSession`], hands out cursors, decides the parameterized
//! execution path once per connection, and drives transactions. Statements
//! from one connection share session state; the session is only ever
//! mutated by applying server-reported deltas.

pub mod auth;
pub mod params;
pub mod session;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::connection::auth::Authentication;
use crate::connection::params::{ConnectionParams, IsolationLevel, PreparedStatementMode};
use crate::connection::session::ClientSession;
use crate::error::{ConnectionError, ProtocolError, QueryError, TrinoError};
use crate::query::execution::QueryExecution;
use crate::query::results::Cursor;
use crate::query::statement::{
    deallocate_sql, execute_immediate_sql, execute_sql, generate_statement_name, prepare_sql,
    StatementRequest,
};
use crate::transport::http::HttpTransport;
use crate::transport::protocol::StatementTransport;
use crate::types::Value;

/// Probe statement deciding whether the server supports the one-shot
/// parameterized execution path.
const CAPABILITY_PROBE: &str = "EXECUTE IMMEDIATE 'SELECT 1'";

/// One logical connection to a coordinator.
pub struct Connection {
    transport: Arc<dyn StatementTransport>,
    session: Arc<ClientSession>,
    params: ConnectionParams,
    /// Capability probe result, fixed for the connection's lifetime
    prepared_mode: Mutex<Option<PreparedStatementMode>>,
    closed: AtomicBool,
}

impl Connection {
    /// Open a connection using the given authentication strategy.
    pub fn connect(
        params: ConnectionParams,
        auth: Arc<dyn Authentication>,
    ) -> Result<Self, TrinoError> {
        let transport = Arc::new(HttpTransport::new(&params, auth)?);
        Ok(Self::with_transport(transport, params))
    }

    pub(crate) fn with_transport(
        transport: Arc<dyn StatementTransport>,
        params: ConnectionParams,
    ) -> Self {
        let session = Arc::new(ClientSession::from_params(&params));
        Self {
            transport,
            session,
            params,
            prepared_mode: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// The session owned by this connection.
    pub fn session(&self) -> &ClientSession {
        &self.session
    }

    /// The parameters this connection was opened with.
    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    /// Execute a statement without bound parameters.
    pub async fn execute(&self, statement: &str) -> Result<Cursor, TrinoError> {
        self.execute_with_params(statement, &[]).await
    }

    /// Execute a statement with bound parameters.
    ///
    /// Parameters ride through the one-shot `EXECUTE IMMEDIATE` path when
    /// the server supports it, otherwise through the legacy
    /// `PREPARE`/`EXECUTE`/`DEALLOCATE` sequence. The choice is probed at
    /// most once per connection and cached.
    pub async fn execute_with_params(
        &self,
        statement: &str,
        parameters: &[Value],
    ) -> Result<Cursor, TrinoError> {
        self.ensure_open()?;
        self.ensure_transaction().await?;

        if parameters.is_empty() {
            return Cursor::run(self.new_execution(statement)).await;
        }

        match self.prepared_mode().await {
            PreparedStatementMode::ExecuteImmediate => {
                let sql = execute_immediate_sql(statement, parameters)?;
                Cursor::run(self.new_execution(&sql)).await
            }
            PreparedStatementMode::Legacy => {
                let name = generate_statement_name();
                self.run_to_completion(&prepare_sql(&name, statement))
                    .await?;
                let sql = execute_sql(&name, parameters)?;
                let result = Cursor::run(self.new_execution(&sql)).await;
                // The statement is deallocated as soon as execution has
                // started; the cursor keeps streaming independently
                if let Err(error) = self.run_to_completion(&deallocate_sql(&name)).await {
                    tracing::warn!(%error, name, "failed to deallocate prepared statement");
                }
                result
            }
        }
    }

    /// Execute a prepared [`StatementRequest`].
    pub async fn execute_request(&self, request: &StatementRequest) -> Result<Cursor, TrinoError> {
        self.execute_with_params(&request.statement, &request.parameters)
            .await
    }

    /// Start an explicit transaction at the connection's isolation level.
    pub async fn start_transaction(&self) -> Result<(), TrinoError> {
        self.ensure_open()?;
        let sql = self
            .params
            .isolation
            .start_transaction_sql()
            .ok_or_else(|| {
                QueryError::InvalidState("connection is in autocommit mode".to_string())
            })?;
        self.run_to_completion(sql).await?;
        if self.session.transaction_id().await.is_none() {
            return Err(ProtocolError::MissingField("X-Trino-Started-Transaction-Id").into());
        }
        Ok(())
    }

    /// Commit the open transaction. A no-op when none is open.
    pub async fn commit(&self) -> Result<(), TrinoError> {
        self.ensure_open()?;
        if self.session.transaction_id().await.is_none() {
            return Ok(());
        }
        self.run_to_completion("COMMIT").await?;
        self.session.clear_transaction().await;
        Ok(())
    }

    /// Roll back the open transaction.
    pub async fn rollback(&self) -> Result<(), TrinoError> {
        self.ensure_open()?;
        if self.session.transaction_id().await.is_none() {
            return Err(
                QueryError::InvalidState("no transaction was started".to_string()).into(),
            );
        }
        self.run_to_completion("ROLLBACK").await?;
        self.session.clear_transaction().await;
        Ok(())
    }

    /// Close the connection. Idempotent. An open transaction is rolled
    /// back first; a rollback failure is logged, never raised, so it
    /// cannot mask an error the caller is already handling.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.session.transaction_id().await.is_some() {
            if let Err(error) = self.run_to_completion("ROLLBACK").await {
                tracing::warn!(%error, "rollback on close failed");
            }
            self.session.clear_transaction().await;
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), TrinoError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed.into());
        }
        Ok(())
    }

    /// Start a transaction implicitly before the first statement when the
    /// connection is not in autocommit and none is open yet.
    async fn ensure_transaction(&self) -> Result<(), TrinoError> {
        if self.params.isolation == IsolationLevel::Autocommit {
            return Ok(());
        }
        if self.session.transaction_id().await.is_some() {
            return Ok(());
        }
        self.start_transaction().await
    }

    /// Cached prepared-statement mode, probing the server on first use.
    async fn prepared_mode(&self) -> PreparedStatementMode {
        if let Some(mode) = self.params.prepared_statements {
            return mode;
        }
        let mut cached = self.prepared_mode.lock().await;
        if let Some(mode) = *cached {
            return mode;
        }
        let mode = match self.run_to_completion(CAPABILITY_PROBE).await {
            Ok(()) => PreparedStatementMode::ExecuteImmediate,
            Err(error) => {
                tracing::warn!(
                    %error,
                    "EXECUTE IMMEDIATE unavailable, falling back to legacy prepared statements"
                );
                PreparedStatementMode::Legacy
            }
        };
        *cached = Some(mode);
        mode
    }

    fn new_execution(&self, statement: &str) -> QueryExecution {
        QueryExecution::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.session),
            statement,
            self.params.decode_mode,
        )
    }

    /// Run an auxiliary statement through the normal execution path and
    /// drain it.
    async fn run_to_completion(&self, statement: &str) -> Result<(), TrinoError> {
        let mut cursor = Cursor::run(self.new_execution(statement)).await?;
        cursor.fetch_all().await?;
        Ok(())
    }
}
