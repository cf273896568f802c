//! Authentication strategies.
//!
//! A closed set of variants behind one capability interface: each strategy
//! knows how to attach credentials to an outgoing request (`apply`) and how
//! to react to a 401/407 challenge (`handle_challenge`). Adding a scheme
//! means adding a type here; the execution loop never changes.
//!
//! External collaborators stay behind traits: browser/redirect capture for
//! OAuth2 ([`RedirectHandler`]), persistent token storage ([`TokenCache`]),
//! and GSSAPI byte negotiation ([`GssNegotiator`]).

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;

use crate::error::AuthenticationError;

/// Maximum polls against the OAuth2 token server before giving up.
const MAX_OAUTH_ATTEMPTS: u32 = 5;

/// One scheme offered in a `WWW-Authenticate` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthScheme {
    /// Scheme name, e.g. "Bearer", "Negotiate", "Basic"
    pub scheme: String,
    /// `key=value` parameters
    pub params: Vec<(String, String)>,
    /// Raw token68 payload for schemes like `Negotiate <token>`
    pub token: Option<String>,
}

impl AuthScheme {
    /// Look up a parameter, case-insensitively.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn strength(&self) -> u8 {
        if self.scheme.eq_ignore_ascii_case("bearer") {
            3
        } else if self.scheme.eq_ignore_ascii_case("negotiate") {
            2
        } else if self.scheme.eq_ignore_ascii_case("basic") {
            1
        } else {
            0
        }
    }
}

/// An authentication challenge extracted from a 401/407 response.
///
/// `WWW-Authenticate` may legally appear multiple times and may carry
/// several schemes per value; all of them are collected here.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub status: u16,
    pub schemes: Vec<AuthScheme>,
}

impl Challenge {
    /// All offered schemes, parsed from every header occurrence.
    pub fn parse(status: u16, header_values: &[&str]) -> Self {
        let mut schemes = Vec::new();
        for value in header_values {
            parse_challenge_value(value, &mut schemes);
        }
        Self { status, schemes }
    }

    /// Find an offered scheme by name.
    pub fn scheme(&self, name: &str) -> Option<&AuthScheme> {
        self.schemes
            .iter()
            .find(|s| s.scheme.eq_ignore_ascii_case(name))
    }

    /// The strongest supported scheme offered (Bearer > Negotiate > Basic).
    pub fn strongest(&self) -> Option<&AuthScheme> {
        self.schemes.iter().max_by_key(|s| s.strength())
    }

    /// Comma-joined scheme names, for error messages.
    pub fn offered(&self) -> String {
        let names: Vec<_> = self.schemes.iter().map(|s| s.scheme.as_str()).collect();
        names.join(", ")
    }
}

/// Split one `WWW-Authenticate` value into schemes.
///
/// Commas separate both parameters and schemes, so a new scheme starts at
/// any comma-separated segment whose first word carries no `=`.
fn parse_challenge_value(value: &str, schemes: &mut Vec<AuthScheme>) {
    for segment in split_outside_quotes(value, ',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        let (head, rest) = match segment.split_once(' ') {
            Some((head, rest)) => (head, rest.trim()),
            None => (segment, ""),
        };
        if head.contains('=') {
            // Continuation of the current scheme's parameter list
            if let Some(current) = schemes.last_mut() {
                if let Some((key, raw)) = segment.split_once('=') {
                    current
                        .params
                        .push((key.trim().to_string(), unquote(raw.trim())));
                }
            }
        } else {
            let mut scheme = AuthScheme {
                scheme: head.to_string(),
                params: Vec::new(),
                token: None,
            };
            if !rest.is_empty() {
                if let Some((key, raw)) = rest.split_once('=') {
                    scheme
                        .params
                        .push((key.trim().to_string(), unquote(raw.trim())));
                } else {
                    scheme.token = Some(rest.to_string());
                }
            }
            schemes.push(scheme);
        }
    }
}

fn split_outside_quotes(value: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c == separator && !in_quotes => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts
}

fn unquote(value: &str) -> String {
    value.trim_matches('"').to_string()
}

/// What the transport should do after a handled challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeAction {
    /// Credentials were refreshed; retry the request once
    RetryRequest,
    /// This strategy cannot satisfy the challenge
    Unhandled,
}

/// Capability interface for attaching credentials and reacting to
/// challenges.
#[async_trait]
pub trait Authentication: Send + Sync + fmt::Debug {
    /// Install connection-level material (e.g. a client certificate) when
    /// the HTTP client is built.
    fn configure(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, AuthenticationError> {
        Ok(builder)
    }

    /// Attach credentials to an outgoing request.
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
    }

    /// React to an authentication challenge. Static strategies cannot
    /// produce fresher credentials and leave the challenge unhandled,
    /// which surfaces as [`AuthenticationError::Rejected`].
    async fn handle_challenge(
        &self,
        _challenge: &Challenge,
    ) -> Result<ChallengeAction, AuthenticationError> {
        Ok(ChallengeAction::Unhandled)
    }
}

/// Anonymous access: requests carry only the user header.
#[derive(Debug, Default)]
pub struct NoAuthentication;

#[async_trait]
impl Authentication for NoAuthentication {}

/// HTTP basic authentication with static credentials.
pub struct BasicAuthentication {
    username: String,
    password: String,
}

impl BasicAuthentication {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BasicAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuthentication")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Authentication for BasicAuthentication {
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }
}

/// Static bearer token (JWT) authentication.
pub struct BearerAuthentication {
    token: String,
}

impl BearerAuthentication {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for BearerAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerAuthentication")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Authentication for BearerAuthentication {
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.token)
    }
}

/// Client-certificate authentication. The identity is installed on the
/// HTTP client at build time; requests need no further decoration.
pub struct CertificateAuthentication {
    pem: Vec<u8>,
}

impl CertificateAuthentication {
    /// PEM bundle holding the client certificate and its private key.
    pub fn from_pem(pem: Vec<u8>) -> Self {
        Self { pem }
    }
}

impl fmt::Debug for CertificateAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateAuthentication")
            .field("pem", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl Authentication for CertificateAuthentication {
    fn configure(
        &self,
        builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, AuthenticationError> {
        let identity = reqwest::Identity::from_pem(&self.pem)
            .map_err(|e| AuthenticationError::Certificate(e.to_string()))?;
        Ok(builder.identity(identity))
    }
}

/// Collaborator that delivers the OAuth2 authorization URL to the user
/// (browser launch, console print, IDE notification — the client does not
/// care which).
pub trait RedirectHandler: Send + Sync + fmt::Debug {
    fn on_redirect(&self, url: &str);
}

/// Redirect handler that logs the authorization URL.
#[derive(Debug, Default)]
pub struct LoggingRedirectHandler;

impl RedirectHandler for LoggingRedirectHandler {
    fn on_redirect(&self, url: &str) {
        tracing::info!("open the following URL in a browser to authenticate: {url}");
    }
}

/// Pluggable token storage. The in-process default is
/// [`InMemoryTokenCache`]; persistent backends (keyrings, files) implement
/// this trait outside the crate.
pub trait TokenCache: Send + Sync + fmt::Debug {
    fn load(&self, key: &str) -> Option<String>;
    fn store(&self, key: &str, token: &str);
}

/// Process-local token cache.
#[derive(Debug, Default)]
pub struct InMemoryTokenCache {
    tokens: Mutex<HashMap<String, String>>,
}

impl TokenCache for InMemoryTokenCache {
    fn load(&self, key: &str) -> Option<String> {
        self.tokens.lock().ok()?.get(key).cloned()
    }

    fn store(&self, key: &str, token: &str) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(key.to_string(), token.to_string());
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenPollResponse {
    token: Option<String>,
    error: Option<String>,
    #[serde(rename = "nextUri")]
    next_uri: Option<String>,
}

/// Browser-redirect OAuth2 authentication.
///
/// On a Bearer challenge the strategy hands the redirect URL to the
/// [`RedirectHandler`], polls the token server until the user completes the
/// flow, and caches the token keyed by host (and user, when one is set) so
/// two users on one host never share a token.
pub struct OAuth2Authentication {
    host: String,
    user: Option<String>,
    redirect_handler: Arc<dyn RedirectHandler>,
    cache: Arc<dyn TokenCache>,
    http: reqwest::Client,
}

impl OAuth2Authentication {
    pub fn new(host: impl Into<String>, redirect_handler: Arc<dyn RedirectHandler>) -> Self {
        Self {
            host: host.into(),
            user: None,
            redirect_handler,
            cache: Arc::new(InMemoryTokenCache::default()),
            http: reqwest::Client::new(),
        }
    }

    /// Scope the token cache to a logical user on this host.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Replace the token cache with a persistent backend.
    pub fn with_token_cache(mut self, cache: Arc<dyn TokenCache>) -> Self {
        self.cache = cache;
        self
    }

    fn cache_key(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    async fn poll_token_server(&self, mut token_uri: String) -> Result<String, AuthenticationError> {
        for _ in 0..MAX_OAUTH_ATTEMPTS {
            let response = self
                .http
                .get(&token_uri)
                .send()
                .await
                .map_err(|e| AuthenticationError::OAuth2(e.to_string()))?;
            if !response.status().is_success() {
                return Err(AuthenticationError::OAuth2(format!(
                    "token server answered HTTP {}",
                    response.status().as_u16()
                )));
            }
            let body: TokenPollResponse = response
                .json()
                .await
                .map_err(|e| AuthenticationError::OAuth2(e.to_string()))?;
            if let Some(token) = body.token {
                return Ok(token);
            }
            if let Some(error) = body.error {
                return Err(AuthenticationError::OAuth2(error));
            }
            match body.next_uri {
                Some(next) => {
                    tracing::debug!("token server deferred, polling {next}");
                    token_uri = next;
                }
                None => {
                    return Err(AuthenticationError::OAuth2(
                        "token server answered without token, error or nextUri".to_string(),
                    ))
                }
            }
        }
        Err(AuthenticationError::OAuth2(
            "exceeded max attempts while waiting for the token".to_string(),
        ))
    }
}

impl fmt::Debug for OAuth2Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Authentication")
            .field("host", &self.host)
            .field("user", &self.user)
            .finish()
    }
}

#[async_trait]
impl Authentication for OAuth2Authentication {
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.cache.load(&self.cache_key()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn handle_challenge(
        &self,
        challenge: &Challenge,
    ) -> Result<ChallengeAction, AuthenticationError> {
        let bearer = challenge.scheme("bearer").ok_or_else(|| {
            AuthenticationError::UnsupportedChallenge(challenge.offered())
        })?;
        let redirect_uri = bearer.param("x_redirect_server").ok_or_else(|| {
            AuthenticationError::OAuth2("challenge has no x_redirect_server".to_string())
        })?;
        let token_uri = bearer.param("x_token_server").ok_or_else(|| {
            AuthenticationError::OAuth2("challenge has no x_token_server".to_string())
        })?;

        self.redirect_handler.on_redirect(redirect_uri);
        let token = self.poll_token_server(token_uri.to_string()).await?;
        self.cache.store(&self.cache_key(), &token);
        Ok(ChallengeAction::RetryRequest)
    }
}

/// Collaborator producing GSSAPI negotiation tokens. The byte-level
/// Kerberos exchange lives outside this crate.
#[async_trait]
pub trait GssNegotiator: Send + Sync + fmt::Debug {
    /// Produce the next client token for `service`@`host`, given the
    /// server's previous token, if any.
    async fn negotiate(
        &self,
        service: &str,
        host: &str,
        server_token: Option<&[u8]>,
    ) -> Result<Vec<u8>, AuthenticationError>;
}

/// Kerberos/GSSAPI authentication, delegated to a [`GssNegotiator`].
pub struct KerberosAuthentication {
    service: String,
    host: String,
    negotiator: Arc<dyn GssNegotiator>,
    current_token: Mutex<Option<String>>,
}

impl KerberosAuthentication {
    pub fn new(
        service: impl Into<String>,
        host: impl Into<String>,
        negotiator: Arc<dyn GssNegotiator>,
    ) -> Self {
        Self {
            service: service.into(),
            host: host.into(),
            negotiator,
            current_token: Mutex::new(None),
        }
    }
}

impl fmt::Debug for KerberosAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KerberosAuthentication")
            .field("service", &self.service)
            .field("host", &self.host)
            .finish()
    }
}

#[async_trait]
impl Authentication for KerberosAuthentication {
    fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let token = self.current_token.lock().ok().and_then(|t| t.clone());
        match token {
            Some(token) => request.header("Authorization", format!("Negotiate {token}")),
            None => request,
        }
    }

    async fn handle_challenge(
        &self,
        challenge: &Challenge,
    ) -> Result<ChallengeAction, AuthenticationError> {
        let negotiate = challenge.scheme("negotiate").ok_or_else(|| {
            AuthenticationError::UnsupportedChallenge(challenge.offered())
        })?;
        let server_token = match &negotiate.token {
            Some(token) => Some(BASE64.decode(token.as_bytes()).map_err(|e| {
                AuthenticationError::Gssapi(format!("bad server token: {e}"))
            })?),
            None => None,
        };
        let client_token = self
            .negotiator
            .negotiate(&self.service, &self.host, server_token.as_deref())
            .await?;
        if let Ok(mut current) = self.current_token.lock() {
            *current = Some(BASE64.encode(client_token));
        }
        Ok(ChallengeAction::RetryRequest)
    }
}
