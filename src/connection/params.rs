//! Connection parameters.
//!
//! `ConnectionParams` collects everything needed to open a logical
//! connection: coordinator endpoint, identity, initial session fields and
//! the retry/timeout tuning. Parameters are immutable once the connection
//! is built; the evolving state lives in
//! [`crate::connection::session::ClientSession`].

use std::collections::BTreeMap;
use std::time::Duration;

use url::Url;

use crate::error::ConnectionError;
use crate::transport::retry::RetryPolicy;
use crate::types::DecodeMode;

/// Default HTTP port of a coordinator.
pub const DEFAULT_PORT: u16 = 8080;
/// Default TLS port of a coordinator.
pub const DEFAULT_TLS_PORT: u16 = 443;
/// Default source reported to the coordinator.
pub const DEFAULT_SOURCE: &str = "trino-rs";
/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transaction isolation requested for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Each statement is its own implicit transaction
    #[default]
    Autocommit,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// The statement that starts a transaction at this level, or `None`
    /// for autocommit.
    pub fn start_transaction_sql(&self) -> Option<&'static str> {
        match self {
            IsolationLevel::Autocommit => None,
            IsolationLevel::ReadUncommitted => {
                Some("START TRANSACTION ISOLATION LEVEL READ UNCOMMITTED")
            }
            IsolationLevel::ReadCommitted => {
                Some("START TRANSACTION ISOLATION LEVEL READ COMMITTED")
            }
            IsolationLevel::RepeatableRead => {
                Some("START TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            }
            IsolationLevel::Serializable => {
                Some("START TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            }
        }
    }
}

/// How parameterized statements are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreparedStatementMode {
    /// One-shot `EXECUTE IMMEDIATE '..' USING ..`
    ExecuteImmediate,
    /// Three-step `PREPARE` / `EXECUTE` / `DEALLOCATE PREPARE`
    Legacy,
}

/// Parameters for one logical connection to a coordinator.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    /// Coordinator host name
    pub host: String,
    /// Coordinator port
    pub port: u16,
    /// Use HTTPS
    pub use_tls: bool,
    /// User associated with queries, for access control and scheduling
    pub user: Option<String>,
    /// Source associated with queries
    pub source: Option<String>,
    /// Default catalog
    pub catalog: Option<String>,
    /// Default schema
    pub schema: Option<String>,
    /// IANA time zone sent with every request
    pub time_zone: Option<String>,
    /// Locale sent with every request
    pub locale: Option<String>,
    /// Free-form client info
    pub client_info: Option<String>,
    /// Client tags, for resource-group matching
    pub client_tags: Vec<String>,
    /// Extra credentials forwarded to connectors
    pub extra_credentials: Vec<(String, String)>,
    /// Initial session properties
    pub session_properties: BTreeMap<String, String>,
    /// Initial roles, catalog → role
    pub roles: BTreeMap<String, String>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Retry/backoff tuning
    pub retry: RetryPolicy,
    /// Transaction isolation
    pub isolation: IsolationLevel,
    /// Explicit prepared-statement mode; `None` lets the connection probe
    /// the server once and cache the result
    pub prepared_statements: Option<PreparedStatementMode>,
    /// How primitive values are decoded
    pub decode_mode: DecodeMode,
}

impl ConnectionParams {
    /// Parameters for a plain-HTTP coordinator on the default port.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            use_tls: false,
            user: None,
            source: Some(DEFAULT_SOURCE.to_string()),
            catalog: None,
            schema: None,
            time_zone: None,
            locale: None,
            client_info: None,
            client_tags: Vec::new(),
            extra_credentials: Vec::new(),
            session_properties: BTreeMap::new(),
            roles: BTreeMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
            isolation: IsolationLevel::Autocommit,
            prepared_statements: None,
            decode_mode: DecodeMode::Typed,
        }
    }

    /// Parse a `trino://user@host:port/catalog/schema` connection string.
    /// `https` or port 443 selects TLS.
    pub fn from_url(input: &str) -> Result<Self, ConnectionError> {
        let url = Url::parse(input).map_err(|e| ConnectionError::InvalidParameter {
            parameter: "url".to_string(),
            message: e.to_string(),
        })?;
        let host = url
            .host_str()
            .ok_or_else(|| ConnectionError::InvalidParameter {
                parameter: "url".to_string(),
                message: "missing host".to_string(),
            })?
            .to_string();

        let use_tls = match url.scheme() {
            "https" => true,
            "http" | "trino" => url.port() == Some(DEFAULT_TLS_PORT),
            other => {
                return Err(ConnectionError::InvalidParameter {
                    parameter: "url".to_string(),
                    message: format!("unsupported scheme '{other}'"),
                })
            }
        };
        let port = url
            .port()
            .unwrap_or(if use_tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

        let mut params = Self::new(host);
        params.port = port;
        params.use_tls = use_tls;
        if !url.username().is_empty() {
            let user = urlencoding::decode(url.username())
                .map_err(|e| ConnectionError::InvalidParameter {
                    parameter: "user".to_string(),
                    message: e.to_string(),
                })?
                .into_owned();
            params.user = Some(user);
        }

        let mut segments = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()))
            .into_iter()
            .flatten();
        if let Some(catalog) = segments.next() {
            params.catalog = Some(catalog.to_string());
        }
        if let Some(schema) = segments.next() {
            params.schema = Some(schema.to_string());
        }
        Ok(params)
    }

    /// Base URL of the coordinator.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Check parameters that cannot be validated at build time.
    ///
    /// Extra credential keys must be ASCII without whitespace or `=`, since
    /// they are joined into a single header value.
    pub fn validate(&self) -> Result<(), ConnectionError> {
        for (key, _) in &self.extra_credentials {
            let ok = !key.is_empty()
                && key.is_ascii()
                && !key.contains(|c: char| c.is_whitespace() || c == '=');
            if !ok {
                return Err(ConnectionError::InvalidParameter {
                    parameter: "extra_credential".to_string(),
                    message: format!(
                        "whitespace, '=' and non-ASCII are disallowed in key '{key}'"
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        if self.use_tls && self.port == DEFAULT_PORT {
            self.port = DEFAULT_TLS_PORT;
        }
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_time_zone(mut self, time_zone: impl Into<String>) -> Self {
        self.time_zone = Some(time_zone.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_client_info(mut self, client_info: impl Into<String>) -> Self {
        self.client_info = Some(client_info.into());
        self
    }

    pub fn with_client_tag(mut self, tag: impl Into<String>) -> Self {
        self.client_tags.push(tag.into());
        self
    }

    pub fn with_extra_credential(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.extra_credentials.push((key.into(), value.into()));
        self
    }

    pub fn with_session_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.session_properties.insert(name.into(), value.into());
        self
    }

    pub fn with_role(mut self, catalog: impl Into<String>, role: impl Into<String>) -> Self {
        self.roles.insert(catalog.into(), role.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_prepared_statements(mut self, mode: PreparedStatementMode) -> Self {
        self.prepared_statements = Some(mode);
        self
    }

    pub fn with_decode_mode(mut self, mode: DecodeMode) -> Self {
        self.decode_mode = mode;
        self
    }
}
