//! HTTP transport.
//!
//! Builds the shared cookie-carrying client, attaches the bearer token from
//! the session store, turns bodies into JSON values and maps transport
//! failures into [`ClientError`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use reqwest::{Client, ClientBuilder, Method, StatusCode, Url};
use serde_json::{Map, Value};

use super::context::QueryParams;
use super::mutation::RequestBody;
use crate::error::{ClientError, Result};
use crate::storage::session::{SessionStore, token_fingerprint};

/// Default timeout for HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the shared HTTP client.
///
/// The cookie store is enabled so the refresh-token cookie set by the server
/// is sent back on every request.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration, user_agent: &str) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .cookie_store(true)
        .user_agent(user_agent)
        .build()
        .map_err(|e| ClientError::Network(e.to_string()))
}

/// Default `User-Agent` header.
#[must_use]
pub fn default_user_agent() -> String {
    format!("edugate/{}", env!("CARGO_PKG_VERSION"))
}

/// One request as issued by the orchestrator or dispatcher.
///
/// Cloneable so the single post-refresh retry can resend it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub endpoint: String,
    pub params: Option<QueryParams>,
    pub body: RequestBody,
}

impl ApiRequest {
    #[must_use]
    pub fn get(endpoint: impl Into<String>, params: Option<QueryParams>) -> Self {
        Self {
            method: Method::GET,
            endpoint: endpoint.into(),
            params,
            body: RequestBody::Empty,
        }
    }

    #[must_use]
    pub fn with_body(method: Method, endpoint: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            params: None,
            body,
        }
    }
}

/// A response with its body already decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub value: Value,
}

impl HttpResponse {
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    /// The body on 2xx, otherwise the error derived from status and body.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] for any non-success status.
    pub fn into_result(self) -> Result<Value> {
        if self.status.is_success() {
            Ok(self.value)
        } else {
            Err(ClientError::http(
                self.status.as_u16(),
                server_message(&self.value),
            ))
        }
    }
}

/// Human-readable message from an error body.
///
/// Prefers `message` (a string, or an array of strings joined with `", "`),
/// then `error`.
#[must_use]
pub fn server_message(body: &Value) -> Option<String> {
    match body.get("message") {
        Some(Value::String(message)) if !message.is_empty() => return Some(message.clone()),
        Some(Value::Array(items)) if !items.is_empty() => {
            let parts: Vec<String> = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect();
            return Some(parts.join(", "));
        }
        _ => {}
    }
    body.get("error")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Decode a body. Anything that is not JSON becomes an empty object.
#[must_use]
pub fn parse_body(headers: &HeaderMap, bytes: &[u8]) -> Value {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
    if !is_json || bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Object(Map::new());
    }
    serde_json::from_slice(bytes).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "response declared JSON but did not parse");
        Value::Object(Map::new())
    })
}

/// Map a `reqwest` failure to the crate error.
#[must_use]
pub fn map_transport_error(err: &reqwest::Error, timeout: Duration) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout(timeout.as_secs())
    } else if err.is_connect() {
        ClientError::ConnectionRefused {
            host: err
                .url()
                .and_then(|u| u.host_str().map(ToString::to_string))
                .unwrap_or_default(),
        }
    } else {
        ClientError::Network(err.to_string())
    }
}

/// Issues requests against the API base URL.
#[derive(Clone)]
pub struct Transport {
    client: Client,
    base_url: Url,
    session: Arc<dyn SessionStore>,
    timeout: Duration,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute URL.
    pub fn new(
        client: Client,
        base_url: &str,
        session: Arc<dyn SessionStore>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("invalid base URL '{base_url}': {e}")))?;
        Ok(Self {
            client,
            base_url,
            session,
            timeout,
        })
    }

    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn session(&self) -> &Arc<dyn SessionStore> {
        &self.session
    }

    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Absolute URL for `endpoint`, with non-null params URL-encoded.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidEndpoint`] if the result does not parse.
    pub fn url_for(&self, endpoint: &str, params: Option<&QueryParams>) -> Result<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = endpoint.trim_start_matches('/');
        let mut url = Url::parse(&format!("{base}/{path}")).map_err(|e| {
            ClientError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            }
        })?;
        if let Some(params) = params.filter(|p| !p.is_empty()) {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in params.query_pairs() {
                pairs.append_pair(&name, &value);
            }
        }
        Ok(url)
    }

    /// Send one request. Any status is returned as a response; only
    /// transport failures are errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, a multipart file cannot be
    /// read, or the request fails before a response arrives.
    pub async fn send(&self, request: &ApiRequest) -> Result<HttpResponse> {
        let url = self.url_for(&request.endpoint, request.params.as_ref())?;
        let mut builder = self.client.request(request.method.clone(), url);

        match self.session.access_token() {
            Ok(Some(token)) => {
                tracing::trace!(token = %token_fingerprint(&token), "attaching bearer token");
                builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "could not read access token"),
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(value)?),
            RequestBody::Multipart(form) => builder.multipart(form.to_form()?),
        };

        tracing::debug!(method = %request.method, endpoint = %request.endpoint, "sending request");
        let response = builder
            .send()
            .await
            .map_err(|e| map_transport_error(&e, self.timeout))?;

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| map_transport_error(&e, self.timeout))?;
        let value = parse_body(&headers, &bytes);

        if !status.is_success() {
            tracing::debug!(
                status = status.as_u16(),
                endpoint = %request.endpoint,
                body = %value,
                "request returned error status"
            );
        }

        Ok(HttpResponse { status, value })
    }
}

// =============================================================================
// Retry
// =============================================================================

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based): `base × 2^(retry-1)`, capped.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    ///
    /// # Errors
    ///
    /// Returns the last error produced by `op`.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::debug!(
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
