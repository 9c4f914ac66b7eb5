//! HTTP Client Abstraction
//!
//! Async HTTP used for manifests, package archives and individual documents.
//! Requests can opt out of intermediate HTTP caches and can be aborted through
//! a [`CancellationToken`].

use async_trait::async_trait;
use bytes::Bytes;
use core_async::sync::CancellationToken;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
        }
    }
}

/// How a request interacts with HTTP caches between the app and the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Normal HTTP caching semantics
    #[default]
    Default,
    /// Revalidate with the origin before using a cached copy
    NoCache,
    /// Bypass caches entirely; the response is never stored
    NoStore,
}

impl CacheMode {
    /// Request headers that express this mode on the wire.
    pub fn headers(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            CacheMode::Default => &[],
            CacheMode::NoCache => &[("Cache-Control", "no-cache")],
            CacheMode::NoStore => &[("Cache-Control", "no-store"), ("Pragma", "no-cache")],
        }
    }
}

/// HTTP request builder
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
    pub cache_mode: CacheMode,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
            timeout: None,
            cache_mode: CacheMode::Default,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }
}

/// HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// True for `text/html` bodies, which are never stored as documents.
    pub fn is_html(&self) -> bool {
        self.content_type()
            .map(|value| value.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false)
    }

    /// Body as UTF-8 text
    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec())
            .map_err(|e| BridgeError::OperationFailed(format!("Invalid UTF-8: {}", e)))
    }

    /// 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Whether to use exponential backoff
    pub use_exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            use_exponential_backoff: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.use_exponential_backoff {
            return self.base_delay.min(self.max_delay);
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Async HTTP client trait
///
/// Non-2xx statuses are returned as responses, not errors; only transport
/// failures, timeouts and cancellation are reported through `Err`.
///
/// ```ignore
/// use bridge_traits::http::{CacheMode, HttpClient, HttpRequest};
///
/// async fn fetch_package(client: &dyn HttpClient, url: &str) -> Result<Bytes> {
///     let request = HttpRequest::get(url).cache_mode(CacheMode::NoStore);
///     Ok(client.execute(request).await?.body)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Execute an HTTP request
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network connection fails
    /// - Request times out
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Execute an HTTP request with custom retry policy
    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let _ = policy;
        self.execute(request).await
    }

    /// Execute a request that is dropped as soon as `cancel` fires.
    ///
    /// Returns [`BridgeError::Cancelled`] when the token wins the race.
    async fn execute_cancellable(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        core_async::select! {
            _ = cancel.cancelled() => Err(BridgeError::Cancelled),
            result = self.execute(request) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;

    mock! {
        Client {}

        #[async_trait]
        impl HttpClient for Client {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
        }
    }

    #[test]
    fn test_http_request_builder() {
        let request = HttpRequest::get("https://example.com/packages/Cifra.zip")
            .header("Accept", "application/zip")
            .cache_mode(CacheMode::NoStore)
            .timeout(Duration::from_secs(30));

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.cache_mode, CacheMode::NoStore);
        assert_eq!(
            request.headers.get("Accept"),
            Some(&"application/zip".to_string())
        );
    }

    #[test]
    fn test_no_store_headers() {
        let headers = CacheMode::NoStore.headers();
        assert!(headers.contains(&("Cache-Control", "no-store")));
        assert!(CacheMode::Default.headers().is_empty());
    }

    #[test]
    fn test_response_header_lookup_is_case_insensitive() {
        let response =
            HttpResponse::new(200, "<html></html>").with_header("Content-Type", "text/html; charset=utf-8");

        assert_eq!(response.content_type(), Some("text/html; charset=utf-8"));
        assert!(response.is_html());
        assert!(response.is_success());
    }

    #[test]
    fn test_retry_delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            use_exponential_backoff: true,
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(5), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_execute_cancellable_short_circuits_when_cancelled() {
        let mut client = MockClient::new();
        client.expect_execute().never();

        let token = CancellationToken::new();
        token.cancel();

        let result = client
            .execute_cancellable(HttpRequest::get("https://example.com"), &token)
            .await;
        assert!(matches!(result, Err(BridgeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_execute_cancellable_passes_through() {
        let mut client = MockClient::new();
        client
            .expect_execute()
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, "ok")));

        let token = CancellationToken::new();
        let response = client
            .execute_cancellable(HttpRequest::get("https://example.com"), &token)
            .await
            .unwrap();
        assert_eq!(response.text().unwrap(), "ok");
    }
}
