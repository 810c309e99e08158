//! Outbound request/response shapes and the HTTP sender behind them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::warn;

use super::ApiError;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// An outbound API call, kept as plain data so it can be re-authorized and
/// replayed after a token refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Bearer token currently attached, if any.
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    pub(crate) fn set_bearer(&mut self, token: &str) -> Result<(), ApiError> {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| ApiError::InvalidResponse("token is not a valid header value".to_string()))?;
        self.headers.insert(header::AUTHORIZATION, value);
        Ok(())
    }

    pub(crate) fn clear_bearer(&mut self) {
        self.headers.remove(header::AUTHORIZATION);
    }

    /// Whether this request is already the one permitted replay.
    pub fn is_retry(&self) -> bool {
        self.retried
    }

    /// The replay of this request. The rejected token is dropped; the
    /// replay carries only what the authorizer attaches afresh.
    pub(crate) fn into_retry(mut self) -> Self {
        self.retried = true;
        self.clear_bearer();
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
    }

    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.body))
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }
}

/// Sends one request and reports the raw response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Share an existing client's connection pool.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut builder = self
                .client
                .request(request.method.clone(), &request.url)
                .headers(request.headers.clone())
                .header(header::ACCEPT, "application/json");
            if let Some(ref body) = request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(url = %request.url, retry = retries, backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            let body = response.text().await?;
            return Ok(ApiResponse { status, body });
        }
    }
}
