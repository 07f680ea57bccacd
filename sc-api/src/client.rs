//! HTTP client for the chat REST API.
//!
//! Wraps `reqwest::Client` with the chat service's auth headers, custom
//! headers, timeout handling and a small retry loop for requests that never
//! reached the server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use tracing::{debug, warn};

use sc_core::config::ApiConfig;
use sc_core::constants;
use sc_core::error::{ApiError, ChatError, ChatResult};

use crate::request::{ApiRequest, Requester};

/// Retry configuration for requests that failed before a response arrived.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// reqwest-backed [`Requester`].
#[derive(Clone)]
pub struct ApiClient {
    inner: Client,
    timeout: Duration,
    retry_config: RetryConfig,
}

impl ApiClient {
    /// Create a new ApiClient from the API configuration.
    pub fn new(config: &ApiConfig) -> ChatResult<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-stream-client",
            header_value(&constants::user_agent())?,
        );
        for (key, value) in &config.custom_headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| ChatError::Config(format!("invalid header name '{key}': {e}")))?;
            headers.insert(name, header_value(value)?);
        }

        let inner = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(15))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .default_headers(headers)
            .build()
            .map_err(|e| ChatError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner,
            timeout,
            retry_config: RetryConfig::default(),
        })
    }

    /// Set custom retry configuration.
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    fn build_request(&self, request: &ApiRequest) -> RequestBuilder {
        let mut builder = self
            .inner
            .request(request.method.clone(), request.url())
            .timeout(self.timeout)
            .query(&request.full_query());
        if let Some(auth) = &request.auth {
            builder = builder
                .header("Authorization", auth.token.as_str())
                .header("stream-auth-type", auth.auth_type.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
    }

    /// Execute a request, retrying failures that happened before the server
    /// saw it. Timeouts are only retried for idempotent requests.
    async fn request_with_retry(&self, request: &ApiRequest) -> ChatResult<Response> {
        debug!("{} {}", request.method, request.path);

        let mut last_error: Option<ChatError> = None;

        for attempt in 0..=self.retry_config.max_retries {
            if attempt > 0 {
                let delay = self.calculate_retry_delay(attempt - 1);
                warn!(
                    "retrying {} {} (attempt {}/{}) after {:.1}s",
                    request.method,
                    request.path,
                    attempt + 1,
                    self.retry_config.max_retries + 1,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }

            match self.build_request(request).send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let retryable = e.is_connect() || (e.is_timeout() && request.is_idempotent());
                    let err = classify_error(e);
                    if retryable && attempt < self.retry_config.max_retries {
                        warn!("retryable error on {}: {}", request.path, err);
                        last_error = Some(err);
                        continue;
                    }
                    return Err(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ChatError::Http("max retries exceeded".into())))
    }

    /// Calculate retry delay with exponential backoff.
    fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.retry_config.base_delay.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << attempt.min(16));
        let max_ms = self.retry_config.max_delay.as_millis() as u64;
        Duration::from_millis(delay_ms.min(max_ms))
    }

    /// Turn a response into its JSON body, or an `ApiError` for non-2xx.
    async fn check_status(response: Response) -> ChatResult<Value> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ChatError::Http(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(ChatError::Api(parse_api_error(status.as_u16(), &text)));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| ChatError::Serialization(format!("failed to parse response: {e}")))
    }
}

#[async_trait]
impl Requester for ApiClient {
    async fn send(&self, request: ApiRequest) -> ChatResult<Value> {
        let response = self.request_with_retry(&request).await?;
        Self::check_status(response).await
    }
}

fn header_value(value: &str) -> ChatResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ChatError::Config(format!("invalid header value '{value}': {e}")))
}

/// Build the structured error for a non-2xx response body.
///
/// The HTTP status always wins over whatever `StatusCode` the body claims.
fn parse_api_error(status: u16, body: &str) -> ApiError {
    match serde_json::from_str::<ApiError>(body) {
        Ok(mut err) => {
            err.status = status;
            if err.message.is_empty() {
                err.message = format!("request failed with status {status}");
            }
            err
        }
        Err(_) => ApiError::from_status(status, body),
    }
}

/// Classify a reqwest error into a ChatError variant.
fn classify_error(e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::Timeout(e.to_string())
    } else if e.is_connect() {
        ChatError::Http(format!("connection failed: {e}"))
    } else {
        ChatError::Http(e.to_string())
    }
}
