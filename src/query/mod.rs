//! Query execution: statement construction, the per-statement state
//! machine and the caller-facing cursor.

pub mod execution;
pub mod results;
pub mod statement;

pub use execution::{QueryExecution, QueryState};
pub use results::{ColumnDescription, Cursor};
pub use statement::StatementRequest;
