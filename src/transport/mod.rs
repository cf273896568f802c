//! Transport layer: the statement protocol over HTTP, retry policy and
//! spooled-segment retrieval.

pub mod http;
pub mod messages;
pub mod protocol;
pub mod retry;
pub mod spool;

pub use http::HttpTransport;
pub use protocol::{StatementResponse, StatementTransport};
pub use retry::{AttemptOutcome, FatalReason, RetryDecision, RetryPolicy};
