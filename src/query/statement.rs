//! Statement construction.
//!
//! Parameterized statements are expressed through SQL itself: either the
//! one-shot `EXECUTE IMMEDIATE '..' USING ..` form, or the legacy
//! `PREPARE` / `EXECUTE` / `DEALLOCATE PREPARE` sequence for servers that
//! predate `EXECUTE IMMEDIATE`. Parameter values are rendered as typed SQL
//! literals by [`Value::to_sql_literal`].

use uuid::Uuid;

use crate::error::DataError;
use crate::types::Value;

/// One statement submission: text plus bound parameter values. Immutable
/// per attempt; the session fields that accompany it are snapshotted
/// separately at request-build time.
#[derive(Debug, Clone)]
pub struct StatementRequest {
    pub statement: String,
    pub parameters: Vec<Value>,
}

impl StatementRequest {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            parameters: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Vec<Value>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Generate a unique name for a prepared statement.
pub fn generate_statement_name() -> String {
    format!("st_{}", Uuid::new_v4().simple())
}

/// Render the one-shot parameterized form.
pub fn execute_immediate_sql(statement: &str, parameters: &[Value]) -> Result<String, DataError> {
    let escaped = statement.replace('\'', "''");
    if parameters.is_empty() {
        return Ok(format!("EXECUTE IMMEDIATE '{escaped}'"));
    }
    Ok(format!(
        "EXECUTE IMMEDIATE '{escaped}' USING {}",
        render_parameters(parameters)?
    ))
}

/// Render the `PREPARE` step of the legacy sequence.
pub fn prepare_sql(name: &str, statement: &str) -> String {
    format!("PREPARE {name} FROM {statement}")
}

/// Render the `EXECUTE` step of the legacy sequence.
pub fn execute_sql(name: &str, parameters: &[Value]) -> Result<String, DataError> {
    if parameters.is_empty() {
        return Ok(format!("EXECUTE {name}"));
    }
    Ok(format!(
        "EXECUTE {name} USING {}",
        render_parameters(parameters)?
    ))
}

/// Render the `DEALLOCATE` step of the legacy sequence.
pub fn deallocate_sql(name: &str) -> String {
    format!("DEALLOCATE PREPARE {name}")
}

fn render_parameters(parameters: &[Value]) -> Result<String, DataError> {
    let rendered: Result<Vec<_>, _> = parameters.iter().map(Value::to_sql_literal).collect();
    Ok(rendered?.join(", "))
}
