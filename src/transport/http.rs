//! HTTP transport implementation.
//!
//! One `HttpTransport` serves a logical connection: it owns the reqwest
//! client, stitches session snapshots into protocol headers, applies the
//! authentication strategy to every request, runs the retry loop, and
//! extracts session deltas from response headers. Segment storage requests
//! go through the same client, credentials and retry policy as the
//! coordinator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER, WWW_AUTHENTICATE};
use url::Url;

use crate::connection::auth::{Authentication, Challenge, ChallengeAction};
use crate::connection::params::ConnectionParams;
use crate::connection::session::{SessionSnapshot, SessionUpdates};
use crate::error::{AuthenticationError, ConnectionError, ProtocolError, TrinoError};
use crate::transport::messages::{self, headers, QueryResults};
use crate::transport::protocol::{StatementResponse, StatementTransport};
use crate::transport::retry::{AttemptOutcome, FatalReason, RetryDecision, RetryPolicy};

/// Transport over the coordinator's HTTP protocol.
pub struct HttpTransport {
    client: reqwest::Client,
    statement_url: Url,
    auth: Arc<dyn Authentication>,
    policy: RetryPolicy,
}

impl HttpTransport {
    /// Build the transport for a connection.
    pub fn new(
        params: &ConnectionParams,
        auth: Arc<dyn Authentication>,
    ) -> Result<Self, TrinoError> {
        params.validate()?;
        let mut builder = reqwest::Client::builder().timeout(params.request_timeout);
        builder = auth.configure(builder)?;
        let client = builder
            .build()
            .map_err(|e| ConnectionError::InvalidParameter {
                parameter: "http client".to_string(),
                message: e.to_string(),
            })?;
        let base = Url::parse(&params.base_url()).map_err(|e| {
            ConnectionError::InvalidParameter {
                parameter: "host".to_string(),
                message: e.to_string(),
            }
        })?;
        let statement_url =
            base.join(messages::STATEMENT_PATH)
                .map_err(|e| ConnectionError::InvalidParameter {
                    parameter: "host".to_string(),
                    message: e.to_string(),
                })?;
        Ok(Self {
            client,
            statement_url,
            auth,
            policy: params.retry.clone(),
        })
    }

    /// Run one logical request through auth, challenge handling and the
    /// retry policy. Returns the first successful response.
    async fn execute_with_retry<F>(
        &self,
        url: &str,
        build: F,
    ) -> Result<reqwest::Response, TrinoError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        let mut challenged = false;
        loop {
            attempt += 1;
            let request = self.auth.apply(build());
            let outcome = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status.as_u16() == 401 || status.as_u16() == 407 {
                        let values: Vec<String> = response
                            .headers()
                            .get_all(WWW_AUTHENTICATE)
                            .iter()
                            .filter_map(|v| v.to_str().ok().map(str::to_string))
                            .collect();
                        let value_refs: Vec<&str> = values.iter().map(String::as_str).collect();
                        let challenge = Challenge::parse(status.as_u16(), &value_refs);
                        if challenged {
                            return Err(AuthenticationError::Rejected(format!(
                                "credentials still rejected after challenge (HTTP {})",
                                status.as_u16()
                            ))
                            .into());
                        }
                        challenged = true;
                        match self.auth.handle_challenge(&challenge).await? {
                            ChallengeAction::RetryRequest => {
                                tracing::debug!(url, "retrying after authentication challenge");
                                continue;
                            }
                            ChallengeAction::Unhandled => {
                                return Err(AuthenticationError::Rejected(format!(
                                    "HTTP {}, offered schemes: {}",
                                    status.as_u16(),
                                    challenge.offered()
                                ))
                                .into())
                            }
                        }
                    }
                    AttemptOutcome::Status {
                        code: status.as_u16(),
                        retry_after: parse_retry_after(response.headers()),
                    }
                }
                Err(error) => AttemptOutcome::Network(error.to_string()),
            };

            match self.policy.decide(attempt, started.elapsed(), &outcome) {
                RetryDecision::Retry(delay) => {
                    tracing::debug!(
                        url,
                        attempt,
                        outcome = %outcome.describe(),
                        ?delay,
                        "request failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Fatal(FatalReason::NonRetryable) => {
                    return Err(match outcome {
                        AttemptOutcome::Status { code, .. } => ConnectionError::Http {
                            status: code,
                            message: reqwest::StatusCode::from_u16(code)
                                .ok()
                                .and_then(|s| s.canonical_reason())
                                .unwrap_or("unexpected status")
                                .to_string(),
                        }
                        .into(),
                        AttemptOutcome::Network(message) => ConnectionError::Unreachable {
                            url: url.to_string(),
                            message,
                        }
                        .into(),
                    })
                }
                RetryDecision::Fatal(_) => {
                    tracing::warn!(url, attempt, "giving up after exhausting retries");
                    return Err(ConnectionError::RetriesExhausted {
                        attempts: attempt,
                        elapsed: started.elapsed(),
                        last: outcome.describe(),
                    }
                    .into());
                }
            }
        }
    }

    /// Decode a statement envelope and the session deltas it carries.
    async fn process_response(
        &self,
        response: reqwest::Response,
    ) -> Result<StatementResponse, TrinoError> {
        let updates = parse_session_updates(response.headers());
        let url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ConnectionError::Unreachable {
                url,
                message: e.to_string(),
            })?;
        let results: QueryResults = serde_json::from_str(&body)
            .map_err(|e| ProtocolError::MalformedEnvelope(e.to_string()))?;
        tracing::debug!(
            id = %results.id,
            terminal = results.is_terminal(),
            "processed statement response"
        );
        Ok(StatementResponse { results, updates })
    }
}

#[async_trait]
impl StatementTransport for HttpTransport {
    async fn submit(
        &self,
        statement: &str,
        session: &SessionSnapshot,
    ) -> Result<StatementResponse, TrinoError> {
        let header_map = build_headers(session)?;
        let url = self.statement_url.clone();
        let statement = statement.to_string();
        let response = self
            .execute_with_retry(url.as_str(), || {
                self.client
                    .post(url.clone())
                    .headers(header_map.clone())
                    .body(statement.clone())
            })
            .await?;
        self.process_response(response).await
    }

    async fn poll(
        &self,
        next_uri: &str,
        session: &SessionSnapshot,
    ) -> Result<StatementResponse, TrinoError> {
        let header_map = build_headers(session)?;
        let response = self
            .execute_with_retry(next_uri, || {
                self.client.get(next_uri).headers(header_map.clone())
            })
            .await?;
        self.process_response(response).await
    }

    async fn cancel(&self, uri: &str) -> Result<(), TrinoError> {
        self.execute_with_retry(uri, || self.client.delete(uri))
            .await?;
        Ok(())
    }

    async fn fetch_segment(&self, uri: &str) -> Result<Vec<u8>, TrinoError> {
        let response = self
            .execute_with_retry(uri, || self.client.get(uri))
            .await?;
        let url = response.url().to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ConnectionError::Unreachable {
                url,
                message: e.to_string(),
            })?;
        Ok(bytes.to_vec())
    }

    async fn ack_segment(&self, uri: &str) -> Result<(), TrinoError> {
        self.execute_with_retry(uri, || self.client.post(uri))
            .await?;
        Ok(())
    }
}

/// Build the protocol headers for one request from a session snapshot.
pub fn build_headers(session: &SessionSnapshot) -> Result<HeaderMap, TrinoError> {
    let mut map = HeaderMap::new();
    insert_optional(&mut map, headers::USER, session.user.as_deref())?;
    insert_optional(&mut map, headers::SOURCE, session.source.as_deref())?;
    insert_optional(&mut map, headers::CATALOG, session.catalog.as_deref())?;
    insert_optional(&mut map, headers::SCHEMA, session.schema.as_deref())?;
    insert_optional(&mut map, headers::TIME_ZONE, session.time_zone.as_deref())?;
    insert_optional(&mut map, headers::LANGUAGE, session.locale.as_deref())?;
    insert_optional(
        &mut map,
        headers::CLIENT_INFO,
        session.client_info.as_deref(),
    )?;

    if !session.client_tags.is_empty() {
        insert(&mut map, headers::CLIENT_TAGS, &session.client_tags.join(","))?;
    }

    if !session.properties.is_empty() {
        let value = session
            .properties
            .iter()
            .map(|(name, value)| format!("{name}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join(",");
        insert(&mut map, headers::SESSION, &value)?;
    }

    if !session.roles.is_empty() {
        let value = session
            .roles
            .iter()
            .map(|(catalog, role)| format!("{catalog}={role}"))
            .collect::<Vec<_>>()
            .join(",");
        insert(&mut map, headers::ROLE, &value)?;
    }

    if !session.extra_credentials.is_empty() {
        let value = session
            .extra_credentials
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join(", ");
        insert(&mut map, headers::EXTRA_CREDENTIAL, &value)?;
    }

    if !session.prepared_statements.is_empty() {
        let value = session
            .prepared_statements
            .iter()
            .map(|(name, statement)| format!("{name}={}", urlencoding::encode(statement)))
            .collect::<Vec<_>>()
            .join(",");
        insert(&mut map, headers::PREPARED_STATEMENT, &value)?;
    }

    let transaction = session
        .transaction_id
        .as_deref()
        .unwrap_or(messages::NO_TRANSACTION);
    insert(&mut map, headers::TRANSACTION, transaction)?;
    Ok(map)
}

fn insert(map: &mut HeaderMap, name: &str, value: &str) -> Result<(), TrinoError> {
    let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid_header(name, e))?;
    let value = HeaderValue::from_str(value).map_err(|e| invalid_header(name.as_str(), e))?;
    map.insert(name, value);
    Ok(())
}

fn insert_optional(
    map: &mut HeaderMap,
    name: &str,
    value: Option<&str>,
) -> Result<(), TrinoError> {
    match value {
        Some(value) => insert(map, name, value),
        None => Ok(()),
    }
}

fn invalid_header(name: &str, error: impl std::fmt::Display) -> TrinoError {
    ConnectionError::InvalidParameter {
        parameter: name.to_string(),
        message: error.to_string(),
    }
    .into()
}

/// Extract the session deltas a response carries in its headers.
pub fn parse_session_updates(map: &HeaderMap) -> SessionUpdates {
    SessionUpdates {
        set_catalog: single_value(map, headers::SET_CATALOG),
        set_schema: single_value(map, headers::SET_SCHEMA),
        set_session: pair_values(map, headers::SET_SESSION),
        clear_session: list_values(map, headers::CLEAR_SESSION),
        set_roles: pair_values(map, headers::SET_ROLE),
        added_prepare: pair_values(map, headers::ADDED_PREPARE),
        deallocated_prepare: list_values(map, headers::DEALLOCATED_PREPARE)
            .into_iter()
            .map(|name| decode_value(&name))
            .collect(),
        started_transaction: single_value(map, headers::STARTED_TRANSACTION),
        clear_transaction: map.contains_key(headers::CLEAR_TRANSACTION),
    }
}

fn single_value(map: &HeaderMap, name: &str) -> Option<String> {
    map.get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn list_values(map: &HeaderMap, name: &str) -> Vec<String> {
    map.get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

fn pair_values(map: &HeaderMap, name: &str) -> Vec<(String, String)> {
    list_values(map, name)
        .into_iter()
        .filter_map(|entry| {
            entry
                .split_once('=')
                .map(|(key, value)| (key.trim().to_string(), decode_value(value.trim())))
        })
        .collect()
}

fn decode_value(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

fn parse_retry_after(map: &HeaderMap) -> Option<Duration> {
    map.get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
