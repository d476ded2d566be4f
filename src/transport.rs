//! HTTP transport for the tracking and deployment endpoints.
//!
//! This module provides an async HTTP client with connection pooling,
//! retry logic with exponential backoff and jitter, `Retry-After` handling
//! and optional redirect following.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{redirect, Certificate, Client, Identity, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::HttpSettings;
use crate::credentials::HostCreds;
use crate::headers::HeaderProviderChain;

/// Hard ceiling on a single backoff sleep.
pub const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Status codes retried for tracking requests.
pub const TRACKING_RETRY_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Status codes retried for deployment requests.
pub const DEPLOYMENT_RETRY_CODES: [u16; 4] = [429, 500, 502, 503];

/// Status codes on which a `Retry-After` header is honored.
const RETRY_AFTER_STATUS_CODES: [u16; 3] = [413, 429, 503];

/// Maximum redirects followed when redirects are allowed.
const MAX_REDIRECTS: usize = 10;

/// Errors that can occur while sending a request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Server error ({code}) from {url}: {message}")]
    Status {
        url: String,
        code: StatusCode,
        message: String,
    },

    #[error("Redirect ({code}) from {url} to {location:?} while redirects are disabled")]
    Redirect {
        url: String,
        code: StatusCode,
        location: Option<String>,
    },

    #[error("All {attempts} attempts exhausted. Last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Unsupported authentication configuration: {0}")]
    UnsupportedAuth(String),

    #[error("Transport configuration error: {0}")]
    Config(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

impl TransportError {
    /// Status code of a terminal HTTP error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            TransportError::Status { code, .. } | TransportError::Redirect { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }
}

/// When and how often to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub retry_codes: HashSet<u16>,

    /// Retries after the first attempt
    pub max_retries: u32,

    /// Backoff base in seconds
    pub backoff_factor: f64,

    /// Upper bound of the uniform jitter in seconds
    pub backoff_jitter: f64,

    pub respect_retry_after: bool,

    pub retry_on_timeout: bool,
}

impl RetryPolicy {
    /// Policy for tracking-server requests.
    pub fn tracking(http: &HttpSettings) -> Self {
        Self::from_settings(http, &TRACKING_RETRY_CODES, true)
    }

    /// Policy for deployment requests; timeouts are never retried.
    pub fn deployment(http: &HttpSettings) -> Self {
        Self::from_settings(http, &DEPLOYMENT_RETRY_CODES, false)
    }

    fn from_settings(http: &HttpSettings, codes: &[u16], retry_on_timeout: bool) -> Self {
        Self {
            retry_codes: codes.iter().copied().collect(),
            max_retries: http.max_retries,
            backoff_factor: http.backoff_factor,
            backoff_jitter: http.backoff_jitter,
            respect_retry_after: http.respect_retry_after,
            retry_on_timeout,
        }
        .clamped(http.max_retries_limit, http.max_backoff_factor_limit)
    }

    /// Clamp retries and backoff factor to the hard limits.
    pub fn clamped(mut self, max_retries_limit: u32, max_backoff_factor_limit: f64) -> Self {
        if self.max_retries > max_retries_limit {
            warn!(
                max_retries = self.max_retries,
                limit = max_retries_limit,
                "Clamping max retries to the configured limit"
            );
            self.max_retries = max_retries_limit;
        }
        if self.backoff_factor > max_backoff_factor_limit {
            warn!(
                backoff_factor = self.backoff_factor,
                limit = max_backoff_factor_limit,
                "Clamping backoff factor to the configured limit"
            );
            self.backoff_factor = max_backoff_factor_limit;
        }
        self
    }

    /// Whether a status code is in the retryable set.
    pub fn is_retryable_status(&self, code: StatusCode) -> bool {
        self.retry_codes.contains(&code.as_u16())
    }

    /// Computed delay before retry number `attempt` (1-based).
    ///
    /// `factor * 2^(attempt-1) + U(0, jitter)`, capped at [`MAX_BACKOFF`].
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let base = self.backoff_factor * 2f64.powi(exponent);
        let jitter = if self.backoff_jitter > 0.0 {
            rand::random::<f64>() * self.backoff_jitter
        } else {
            0.0
        };
        let secs = (base + jitter).clamp(0.0, MAX_BACKOFF.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Parse a `Retry-After` value given as delta-seconds or an HTTP date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = date.with_timezone(&Utc) - now;
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

/// A single logical request, relative to the host of the credentials used to send it.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,

    /// Path such as `/api/2.0/qcflow/runs/log-batch`, or an absolute URL
    pub endpoint: String,

    pub json: Option<serde_json::Value>,

    pub query: Vec<(String, String)>,

    /// Overrides the transport's default request timeout
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            json: None,
            query: Vec::new(),
            timeout: None,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    /// Attach a JSON body.
    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, TransportError> {
        let value =
            serde_json::to_value(body).map_err(|e| TransportError::Parse(e.to_string()))?;
        self.json = Some(value);
        Ok(self)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn url(&self, host: &str) -> String {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            return self.endpoint.clone();
        }
        let host = host.trim_end_matches('/');
        if self.endpoint.starts_with('/') {
            format!("{}{}", host, self.endpoint)
        } else {
            format!("{}/{}", host, self.endpoint)
        }
    }
}

/// A successful response with its body read.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        if self.body.trim().is_empty() {
            return serde_json::from_str("{}").map_err(|e| TransportError::Parse(e.to_string()));
        }
        serde_json::from_str(&self.body).map_err(|e| TransportError::Parse(e.to_string()))
    }
}

/// Snapshot of transport counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Attempts put on the wire, retries included
    pub requests: u64,

    pub retries: u64,

    /// Logical requests that ended in an error
    pub failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

/// Outcome of a single attempt.
enum Attempt {
    Done(HttpResponse),
    Retry {
        error: TransportError,
        retry_after: Option<Duration>,
    },
    Fail(TransportError),
}

/// Retrying HTTP transport.
///
/// The underlying `reqwest::Client` is built once and reused for connection
/// pooling. TLS settings come from the credentials given at construction;
/// credentials passed to [`Transport::send`] supply the host and the
/// authorization for that request.
pub struct Transport {
    client: Client,
    policy: RetryPolicy,
    timeout: Duration,
    allow_redirects: bool,
    headers: HeaderProviderChain,
    counters: Counters,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .field("allow_redirects", &self.allow_redirects)
            .finish()
    }
}

impl Transport {
    /// Create a transport.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Config` if a certificate cannot be read or the
    /// HTTP client cannot be built.
    pub fn new(
        http: &HttpSettings,
        policy: RetryPolicy,
        tls: &HostCreds,
    ) -> Result<Self, TransportError> {
        let redirect_policy = if http.allow_redirects {
            redirect::Policy::limited(MAX_REDIRECTS)
        } else {
            redirect::Policy::none()
        };

        let mut builder = Client::builder()
            .timeout(http.request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(redirect_policy);

        if !tls.tls_verify {
            warn!(host = %tls.host, "TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(path) = &tls.server_cert_path {
            let pem = std::fs::read(path).map_err(|e| {
                TransportError::Config(format!(
                    "cannot read server certificate {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let cert = Certificate::from_pem(&pem)
                .map_err(|e| TransportError::Config(format!("invalid server certificate: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }

        if let Some(path) = &tls.client_cert_path {
            let pem = std::fs::read(path).map_err(|e| {
                TransportError::Config(format!(
                    "cannot read client certificate {}: {}",
                    path.display(),
                    e
                ))
            })?;
            let identity = Identity::from_pem(&pem)
                .map_err(|e| TransportError::Config(format!("invalid client certificate: {}", e)))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;

        Ok(Self {
            client,
            policy,
            timeout: http.request_timeout,
            allow_redirects: http.allow_redirects,
            headers: HeaderProviderChain::default(),
            counters: Counters::default(),
        })
    }

    /// Replace the header provider chain.
    pub fn with_headers(mut self, headers: HeaderProviderChain) -> Self {
        self.headers = headers;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Send a request, retrying transient failures.
    ///
    /// # Retryable Errors
    ///
    /// - Connection errors
    /// - Timeouts, when the policy allows it
    /// - Status codes in the policy's retry set
    ///
    /// A non-retryable failure is returned immediately. Once the retry budget
    /// is spent the result is `TransportError::RetriesExhausted`.
    pub async fn send(
        &self,
        request: &HttpRequest,
        creds: &HostCreds,
    ) -> Result<HttpResponse, TransportError> {
        let result = self.send_with_retries(request, creds).await;
        if result.is_err() {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn send_with_retries(
        &self,
        request: &HttpRequest,
        creds: &HostCreds,
    ) -> Result<HttpResponse, TransportError> {
        check_auth(creds)?;

        let url = request.url(&creds.host);
        let max_retries = self.policy.max_retries;
        let mut attempt: u32 = 0;

        debug!(method = %request.method, url = %url, "Sending request");

        loop {
            self.counters.requests.fetch_add(1, Ordering::Relaxed);

            match self.send_once(request, creds, &url).await {
                Attempt::Done(response) => return Ok(response),
                Attempt::Fail(e) => {
                    error!(
                        error = %e,
                        attempts = attempt + 1,
                        retryable = false,
                        "Request failed permanently"
                    );
                    return Err(e);
                }
                Attempt::Retry { error, retry_after } => {
                    if attempt >= max_retries {
                        error!(
                            error = %error,
                            attempts = attempt + 1,
                            "Retry budget exhausted"
                        );
                        return Err(TransportError::RetriesExhausted {
                            attempts: attempt + 1,
                            last_error: error.to_string(),
                        });
                    }

                    attempt += 1;
                    let delay = match retry_after {
                        Some(after) if self.policy.respect_retry_after => after.min(MAX_BACKOFF),
                        _ => self.policy.backoff_delay(attempt),
                    };
                    warn!(
                        error = %error,
                        attempt = attempt,
                        max_retries = max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Request failed, will retry"
                    );
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Send a single HTTP request without retry logic.
    async fn send_once(&self, request: &HttpRequest, creds: &HostCreds, url: &str) -> Attempt {
        let mut builder = self
            .client
            .request(request.method.clone(), url)
            .headers(self.headers.resolve())
            .timeout(request.timeout.unwrap_or(self.timeout));

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }
        if let (Some(username), Some(password)) = (&creds.username, &creds.password) {
            builder = builder.basic_auth(username, Some(password));
        } else if let Some(token) = &creds.token {
            builder = builder.bearer_auth(token);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return self.classify_request_error(e, url),
        };

        let status = response.status();
        let headers = response.headers().clone();

        if status.is_redirection() {
            let location = headers
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let error = TransportError::Redirect {
                url: url.to_string(),
                code: status,
                location,
            };
            return if self.policy.is_retryable_status(status) {
                Attempt::Retry {
                    error,
                    retry_after: None,
                }
            } else {
                Attempt::Fail(error)
            };
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return self.classify_request_error(e, url),
        };

        if status.is_success() {
            return Attempt::Done(HttpResponse {
                status,
                headers,
                body,
            });
        }

        let retry_after = if RETRY_AFTER_STATUS_CODES.contains(&status.as_u16()) {
            headers
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()))
        } else {
            None
        };

        let error = TransportError::Status {
            url: url.to_string(),
            code: status,
            message: body,
        };
        if self.policy.is_retryable_status(status) {
            Attempt::Retry { error, retry_after }
        } else {
            Attempt::Fail(error)
        }
    }

    fn classify_request_error(&self, err: reqwest::Error, url: &str) -> Attempt {
        if err.is_timeout() {
            let error = TransportError::Timeout {
                url: url.to_string(),
            };
            return if self.policy.retry_on_timeout {
                Attempt::Retry {
                    error,
                    retry_after: None,
                }
            } else {
                Attempt::Fail(error)
            };
        }

        let retryable = err.is_connect() || err.is_request();
        let error = TransportError::Request {
            url: url.to_string(),
            source: err,
        };
        if retryable {
            Attempt::Retry {
                error,
                retry_after: None,
            }
        } else {
            Attempt::Fail(error)
        }
    }
}

fn check_auth(creds: &HostCreds) -> Result<(), TransportError> {
    if creds.aws_sigv4 {
        return Err(TransportError::UnsupportedAuth(
            "AWS SigV4 request signing is not supported".to_string(),
        ));
    }
    if let Some(auth) = &creds.auth {
        return Err(TransportError::UnsupportedAuth(format!(
            "custom auth provider {:?} is not supported",
            auth
        )));
    }
    Ok(())
}
