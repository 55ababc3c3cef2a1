//
//  repo-migrator
//  api/client.rs
//
//  Created by Ngonidzashe Mangudya on 2026/01/12.
//  Copyright (c) 2025 IAMNGONI. All rights reserved.
//

//! # Rate-Limit Aware HTTP Client
//!
//! [`ApiClient`] sits between the typed service clients and an
//! [`HttpTransport`]. Every logical call runs the same state machine:
//!
//! 1. Honor any delay deferred by an earlier call (then clear it)
//! 2. Send the request
//! 3. Primary limit (quota at zero + marker): defer the *next* call until the
//!    quota resets; this response is still handled normally
//! 4. Secondary limit (403/429 + marker): wait in place and resend, up to a
//!    ceiling, then fail with [`ApiError::SecondaryRateLimitExhausted`]
//! 5. A primary-flagged 403 with a delay pending is resent once, after the wait
//! 6. Check the status against what the caller expects
//!
//! Read helpers (`get*`) additionally wrap the whole call in the client's
//! [`RetryPolicy`]; write helpers do not, since resending is only safe where
//! the caller knows the server operation is idempotent.
//!
//! Clones share the pending delay, so every caller of one service observes the
//! same primary back-off.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use repo_migrator::api::{ApiClient, RateLimitRules, ReqwestTransport};
//! use repo_migrator::auth::AuthCredential;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = ApiClient::new(Arc::new(ReqwestTransport::new()?), RateLimitRules::GITHUB)
//!     .with_auth(AuthCredential::bearer("ghp_example"));
//!
//! let org: serde_json::Value = client.get_json("https://api.github.com/orgs/octo").await?;
//! println!("{}", org["login"]);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::common::{header_value, ApiError, ERROR_BODY_LIMIT};
use super::rate_limit::{
    Clock, PendingDelay, RateLimitRules, RateLimitState, SecondaryBackoff, SystemClock,
};
use super::retry::{RetryPolicy, TRANSIENT_STATUS_CODES};
use super::transport::{Headers, HttpMethod, HttpRequest, HttpResponse, HttpTransport, RequestBody};
use crate::auth::AuthCredential;

/// Correlation id GitHub attaches to every response.
const REQUEST_ID_HEADER: &str = "X-GitHub-Request-Id";

/// Which response status a call accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedStatus {
    /// Any 2xx.
    Success,

    /// Exactly this status, success or not. Used by existence probes.
    Exactly(u16),
}

/// The rate-limit aware client shared by every typed service client.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    auth: Option<AuthCredential>,
    default_headers: Headers,
    rules: RateLimitRules,
    secondary: SecondaryBackoff,
    retry_policy: RetryPolicy,
    pending_delay: PendingDelay,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("auth", &self.auth)
            .field("rules", &self.rules)
            .field("secondary", &self.secondary)
            .field("retry_policy", &self.retry_policy)
            .field("pending_delay", &self.pending_delay.current())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client with default retry and back-off settings and the
    /// system clock.
    ///
    /// # Parameters
    ///
    /// * `transport` - Where requests are actually sent
    /// * `rules` - Which responses count as throttling for this service
    pub fn new(transport: Arc<dyn HttpTransport>, rules: RateLimitRules) -> Self {
        Self {
            transport,
            auth: None,
            default_headers: Vec::new(),
            rules,
            secondary: SecondaryBackoff::default(),
            retry_policy: RetryPolicy::default(),
            pending_delay: PendingDelay::new(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_auth(mut self, auth: AuthCredential) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Adds a header sent with every request unless the request sets it itself.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_secondary_backoff(mut self, backoff: SecondaryBackoff) -> Self {
        self.secondary = backoff;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Delay the next call of any clone of this client will wait for.
    pub fn pending_delay(&self) -> &PendingDelay {
        &self.pending_delay
    }

    /// Runs one logical call through the rate-limit state machine.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Transport`] when no response was received
    /// - [`ApiError::SecondaryRateLimitExhausted`] after too many throttled resends
    /// - [`ApiError::Http`] / [`ApiError::AuthFailed`] for a non-2xx under
    ///   [`ExpectedStatus::Success`]
    /// - [`ApiError::UnexpectedStatus`] for a mismatch under
    ///   [`ExpectedStatus::Exactly`]
    pub async fn send(
        &self,
        request: HttpRequest,
        expected: ExpectedStatus,
    ) -> Result<HttpResponse, ApiError> {
        let request = self.prepare(request);
        let mut secondary_retries = 0u32;
        let mut resent_after_primary = false;

        loop {
            self.apply_pending_delay().await;

            let response = self.dispatch(&request).await?;
            let now = self.clock.now_unix();
            let state = RateLimitState::from_headers(&response.headers, now);
            let body = response.text();

            let primary = self.rules.is_primary_limited(&state, &body);
            if primary {
                let wait = state.until_reset(now);
                if !wait.is_zero() {
                    tracing::warn!(
                        "API rate limit exceeded, next request will wait {}s for the quota to reset",
                        wait.as_secs()
                    );
                    self.pending_delay.defer(wait);
                }
            }

            if self.rules.defer_on_retry_after {
                if let Some(retry_after) = state.retry_after {
                    tracing::warn!(
                        "THROTTLING IN EFFECT, next request will wait {}s",
                        retry_after.as_secs_f64()
                    );
                    self.pending_delay.defer(retry_after);
                }
            }

            if self.rules.is_secondary_limited(response.status, &body) {
                if secondary_retries >= self.secondary.max_retries {
                    tracing::error!(
                        "Secondary rate limit persisted after {} retries, giving up",
                        self.secondary.max_retries
                    );
                    return Err(ApiError::SecondaryRateLimitExhausted {
                        max_retries: self.secondary.max_retries,
                    });
                }

                let wait = self.secondary.delay_for(secondary_retries, &state, now);
                secondary_retries += 1;
                tracing::warn!(
                    "Secondary rate limit detected (HTTP {}), waiting {}s before retry {}/{}",
                    response.status,
                    wait.as_secs(),
                    secondary_retries,
                    self.secondary.max_retries
                );
                self.clock.sleep(wait).await;
                continue;
            }

            if response.status == 403
                && primary
                && !resent_after_primary
                && !self.pending_delay.current().is_zero()
            {
                resent_after_primary = true;
                tracing::debug!("Resending {} {} after primary rate limit", request.method, request.url);
                continue;
            }

            return check_status(response, expected, &body);
        }
    }

    /// Sends `request` once, expecting a 2xx. No retry policy is applied.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.send(request, ExpectedStatus::Success).await
    }

    /// GETs `url` under the retry policy and returns the full response.
    pub async fn get_response(&self, url: &str) -> Result<HttpResponse, ApiError> {
        self.retry_policy
            .retry(|| async move { self.execute(HttpRequest::get(url)).await })
            .await
    }

    /// GETs `url` under the retry policy and returns the body text.
    pub async fn get(&self, url: &str) -> Result<String, ApiError> {
        Ok(self.get_response(url).await?.text())
    }

    /// GETs `url` under the retry policy and deserializes the body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        Ok(self.get_response(url).await?.json()?)
    }

    /// GETs `url` expecting exactly `status`, returning the body.
    ///
    /// Any other status fails with [`ApiError::UnexpectedStatus`] carrying the
    /// actual status, which is what existence probes match on. A mismatch on a
    /// transient status (502, 503, ...) is retried like any transient failure.
    pub async fn get_non_success(&self, url: &str, status: u16) -> Result<String, ApiError> {
        let response = self
            .retry_policy
            .retry_when(
                || async move {
                    self.send(HttpRequest::get(url), ExpectedStatus::Exactly(status))
                        .await
                },
                is_transient_mismatch,
            )
            .await?;
        Ok(response.text())
    }

    /// POSTs a JSON body and returns the parsed response (`Null` when empty).
    pub async fn post_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Value, ApiError> {
        self.send_json(HttpMethod::Post, url, body).await
    }

    pub async fn put_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Value, ApiError> {
        self.send_json(HttpMethod::Put, url, body).await
    }

    pub async fn patch_json<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Value, ApiError> {
        self.send_json(HttpMethod::Patch, url, body).await
    }

    pub async fn delete(&self, url: &str) -> Result<(), ApiError> {
        self.execute(HttpRequest::new(HttpMethod::Delete, url)).await?;
        Ok(())
    }

    /// POSTs a GraphQL document and returns the whole response.
    ///
    /// A 200 carrying a non-empty `errors` array fails with
    /// [`ApiError::GraphQl`] holding the first message.
    pub async fn post_graphql(&self, url: &str, body: &Value) -> Result<Value, ApiError> {
        let data = self.post_json(url, body).await?;
        ensure_no_graphql_errors(&data)?;
        Ok(data)
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        url: &str,
        body: &B,
    ) -> Result<Value, ApiError> {
        let request = HttpRequest::new(method, url).json(body)?;
        let response = self.execute(request).await?;
        parse_json_body(&response)
    }

    fn prepare(&self, mut request: HttpRequest) -> HttpRequest {
        let mut headers = self.default_headers.clone();
        if let Some(auth) = &self.auth {
            headers.push(("Authorization".to_string(), auth.authorization_header()));
        }
        headers.retain(|(name, _)| header_value(&request.headers, name).is_none());
        headers.append(&mut request.headers);
        request.headers = headers;
        request
    }

    async fn apply_pending_delay(&self) {
        let delay = self.pending_delay.current();
        if delay.is_zero() {
            return;
        }

        tracing::warn!("Waiting {}s for rate limit before next request", delay.as_secs_f64());
        self.clock.sleep(delay).await;
        self.pending_delay.clear(delay);
    }

    async fn dispatch(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        tracing::debug!("HTTP {}: {}", request.method, request.url);
        match &request.body {
            Some(RequestBody::Json(text)) => tracing::trace!("HTTP BODY: {}", text),
            Some(RequestBody::Binary { .. }) => tracing::trace!("HTTP BODY: BLOB"),
            None => {}
        }

        let response = self.transport.send(request.clone()).await?;

        tracing::debug!("RESPONSE ({}) for {} {}", response.status, request.method, request.url);
        if let Some(id) = response.header(REQUEST_ID_HEADER) {
            tracing::debug!("{}: {}", REQUEST_ID_HEADER, id);
        }
        tracing::trace!("RESPONSE HEADERS: {:?}", response.headers);
        tracing::trace!("RESPONSE BODY: {}", crate::util::truncate(&response.text(), ERROR_BODY_LIMIT));

        Ok(response)
    }
}

fn is_transient_mismatch(err: &ApiError) -> bool {
    match err {
        ApiError::UnexpectedStatus { status, .. } => TRANSIENT_STATUS_CODES.contains(status),
        other => other.is_transient(),
    }
}

fn check_status(
    response: HttpResponse,
    expected: ExpectedStatus,
    body: &str,
) -> Result<HttpResponse, ApiError> {
    match expected {
        ExpectedStatus::Success if response.is_success() => Ok(response),
        ExpectedStatus::Success => Err(ApiError::from_status(response.status, body)),
        ExpectedStatus::Exactly(code) if response.status == code => Ok(response),
        ExpectedStatus::Exactly(code) => Err(ApiError::UnexpectedStatus {
            expected: code,
            status: response.status,
            body: crate::util::truncate(body, ERROR_BODY_LIMIT),
        }),
    }
}

/// Parses a response body as JSON, treating an empty body as `null`.
pub fn parse_json_body(response: &HttpResponse) -> Result<Value, ApiError> {
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(response.json()?)
}

/// Fails with the first GraphQL error message, or `UNKNOWN` without one.
pub fn ensure_no_graphql_errors(data: &Value) -> Result<(), ApiError> {
    match data.get("errors").and_then(Value::as_array) {
        Some(errors) if !errors.is_empty() => {
            let message = errors
                .first()
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN")
                .to_string();
            Err(ApiError::GraphQl { message })
        }
        _ => Ok(()),
    }
}
