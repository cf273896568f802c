//! Client session state.
//!
//! The session owns every piece of connection-wide mutable state: catalog,
//! schema, session properties, prepared statements, roles and the
//! transaction id. Statements never touch it directly — they read an
//! immutable [`SessionSnapshot`] at request-build time, and the transport
//! reports server-driven changes back as a [`SessionUpdates`] that is
//! applied atomically here.

use std::collections::BTreeMap;

use tokio::sync::RwLock;

use crate::connection::params::ConnectionParams;
use crate::transport::messages::NO_TRANSACTION;

/// Immutable view of the session, captured once per request.
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub user: Option<String>,
    pub source: Option<String>,
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub time_zone: Option<String>,
    pub locale: Option<String>,
    pub client_info: Option<String>,
    pub client_tags: Vec<String>,
    pub extra_credentials: Vec<(String, String)>,
    pub properties: BTreeMap<String, String>,
    pub prepared_statements: BTreeMap<String, String>,
    pub roles: BTreeMap<String, String>,
    pub transaction_id: Option<String>,
}

/// Session changes carried by response headers.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdates {
    pub set_catalog: Option<String>,
    pub set_schema: Option<String>,
    pub set_session: Vec<(String, String)>,
    pub clear_session: Vec<String>,
    pub set_roles: Vec<(String, String)>,
    pub added_prepare: Vec<(String, String)>,
    pub deallocated_prepare: Vec<String>,
    pub started_transaction: Option<String>,
    pub clear_transaction: bool,
}

impl SessionUpdates {
    /// Whether the response changed anything.
    pub fn is_empty(&self) -> bool {
        self.set_catalog.is_none()
            && self.set_schema.is_none()
            && self.set_session.is_empty()
            && self.clear_session.is_empty()
            && self.set_roles.is_empty()
            && self.added_prepare.is_empty()
            && self.deallocated_prepare.is_empty()
            && self.started_transaction.is_none()
            && !self.clear_transaction
    }
}

#[derive(Debug, Default)]
struct SessionState {
    user: Option<String>,
    source: Option<String>,
    catalog: Option<String>,
    schema: Option<String>,
    time_zone: Option<String>,
    locale: Option<String>,
    client_info: Option<String>,
    client_tags: Vec<String>,
    extra_credentials: Vec<(String, String)>,
    properties: BTreeMap<String, String>,
    prepared_statements: BTreeMap<String, String>,
    roles: BTreeMap<String, String>,
    /// `None` means autocommit. The transaction lifecycle is
    /// NONE → STARTED → (committed | rolled back) → NONE; terminal states
    /// collapse straight back to `None`.
    transaction_id: Option<String>,
}

/// Connection-wide session state with single-writer discipline.
#[derive(Debug)]
pub struct ClientSession {
    inner: RwLock<SessionState>,
}

impl ClientSession {
    /// Build the initial session from connection parameters.
    pub fn from_params(params: &ConnectionParams) -> Self {
        Self {
            inner: RwLock::new(SessionState {
                user: params.user.clone(),
                source: params.source.clone(),
                catalog: params.catalog.clone(),
                schema: params.schema.clone(),
                time_zone: params.time_zone.clone(),
                locale: params.locale.clone(),
                client_info: params.client_info.clone(),
                client_tags: params.client_tags.clone(),
                extra_credentials: params.extra_credentials.clone(),
                properties: params.session_properties.clone(),
                prepared_statements: BTreeMap::new(),
                roles: params.roles.clone(),
                transaction_id: None,
            }),
        }
    }

    /// Capture an immutable snapshot for one request.
    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.read().await;
        SessionSnapshot {
            user: state.user.clone(),
            source: state.source.clone(),
            catalog: state.catalog.clone(),
            schema: state.schema.clone(),
            time_zone: state.time_zone.clone(),
            locale: state.locale.clone(),
            client_info: state.client_info.clone(),
            client_tags: state.client_tags.clone(),
            extra_credentials: state.extra_credentials.clone(),
            properties: state.properties.clone(),
            prepared_statements: state.prepared_statements.clone(),
            roles: state.roles.clone(),
            transaction_id: state.transaction_id.clone(),
        }
    }

    /// Apply server-reported deltas atomically.
    pub async fn apply(&self, updates: &SessionUpdates) {
        if updates.is_empty() {
            return;
        }
        let mut state = self.inner.write().await;
        if let Some(catalog) = &updates.set_catalog {
            state.catalog = Some(catalog.clone());
        }
        if let Some(schema) = &updates.set_schema {
            state.schema = Some(schema.clone());
        }
        for name in &updates.clear_session {
            state.properties.remove(name);
        }
        for (name, value) in &updates.set_session {
            state.properties.insert(name.clone(), value.clone());
        }
        for (catalog, role) in &updates.set_roles {
            state.roles.insert(catalog.clone(), role.clone());
        }
        for (name, statement) in &updates.added_prepare {
            state
                .prepared_statements
                .insert(name.clone(), statement.clone());
        }
        for name in &updates.deallocated_prepare {
            state.prepared_statements.remove(name);
        }
        if let Some(id) = &updates.started_transaction {
            if id != NO_TRANSACTION {
                state.transaction_id = Some(id.clone());
            }
        }
        if updates.clear_transaction {
            state.transaction_id = None;
        }
    }

    /// Current transaction id, `None` in autocommit.
    pub async fn transaction_id(&self) -> Option<String> {
        self.inner.read().await.transaction_id.clone()
    }

    /// Forget the transaction, returning to autocommit.
    pub async fn clear_transaction(&self) {
        self.inner.write().await.transaction_id = None;
    }

    /// Current catalog.
    pub async fn catalog(&self) -> Option<String> {
        self.inner.read().await.catalog.clone()
    }

    /// Current schema.
    pub async fn schema(&self) -> Option<String> {
        self.inner.read().await.schema.clone()
    }

    /// Current session properties.
    pub async fn properties(&self) -> BTreeMap<String, String> {
        self.inner.read().await.properties.clone()
    }

    /// Current prepared-statement bindings.
    pub async fn prepared_statements(&self) -> BTreeMap<String, String> {
        self.inner.read().await.prepared_statements.clone()
    }
}
