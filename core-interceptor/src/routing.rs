//! Request classification
//!
//! Decides which caching strategy applies to an outgoing request.

use bridge_traits::{HttpMethod, HttpRequest, HttpResponse};
use std::collections::HashMap;
use url::Url;

/// An outgoing request seen by the interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Top-level page load rather than a subresource
    pub navigation: bool,
    pub headers: HashMap<String, String>,
}

impl FetchRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            navigation: false,
            headers: HashMap::new(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self {
            navigation: true,
            ..Self::get(url)
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub(crate) fn to_http(&self) -> HttpRequest {
        let mut request = HttpRequest::new(self.method, self.url.clone());
        request.headers = self.headers.clone();
        request
    }
}

/// Strategy applied to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Non-GET or cross-origin; forwarded untouched
    Passthrough,
    /// A PDF under the asset root; cache-first in the documents namespace
    Document,
    /// Page load; network-first with the app shell as fallback
    Navigation,
    /// Any other same-origin GET; cache-first in the app namespace
    AppResource,
}

pub fn classify(origin: &Url, request: &FetchRequest, url: &Url) -> RequestKind {
    if request.method != HttpMethod::Get || url.origin() != origin.origin() {
        return RequestKind::Passthrough;
    }
    if request.navigation {
        return RequestKind::Navigation;
    }
    if is_document_path(url.path()) {
        RequestKind::Document
    } else {
        RequestKind::AppResource
    }
}

/// `/assets/…/*.pdf`, with the asset folder anywhere in the path.
pub fn is_document_path(path: &str) -> bool {
    let is_pdf = path
        .rsplit('/')
        .next()
        .map(|name| name.to_ascii_lowercase().ends_with(".pdf"))
        .unwrap_or(false);
    is_pdf && (path.starts_with("/assets/") || path.contains("/assets/"))
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// The cached app shell served in place of an uncached route
    ShellFallback,
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub response: HttpResponse,
    pub source: ResponseSource,
}

impl FetchResponse {
    pub(crate) fn network(response: HttpResponse) -> Self {
        Self {
            response,
            source: ResponseSource::Network,
        }
    }

    pub fn from_cache(&self) -> bool {
        self.source != ResponseSource::Network
    }
}
