//! # Background Interceptor
//!
//! Serves document and app shell requests from the persistent cache and
//! stores copies of successful network responses, independently of any sync
//! session.
//!
//! ## Strategies
//!
//! - Asset PDFs: cache-first from the documents namespace. A miss goes to the
//!   network; a `200` response that is not HTML is stored under the
//!   document's canonical URL.
//! - Navigation: network-first. Successful pages are stored in the app
//!   namespace; when the network fails the cached route is served, then the
//!   cached `/` shell.
//! - Other same-origin GETs: cache-first from the app namespace.
//! - Everything else is forwarded untouched.
//!
//! It also runs the per-document batch download used for incremental
//! catalog updates (see [`Interceptor::download_batch`]).

use bridge_traits::storage::PDF_CONTENT_TYPE;
use bridge_traits::{CacheEntry, CacheMode, CacheStore, HttpClient, HttpRequest, HttpResponse};
use bytes::Bytes;
use core_async::sync::CancellationToken;
use core_library::{canonical_url, normalize_entry_name, path_of_url, ASSET_ROOT};
use core_runtime::config::{CacheNamespaces, CoreConfig};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{InterceptorError, Result};
use crate::protocol::{BatchProgress, DEFAULT_BATCH_SIZE};
use crate::routing::{classify, FetchRequest, FetchResponse, RequestKind, ResponseSource};

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Result of a batch download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub progress: BatchProgress,
    pub cancelled: bool,
}

pub struct Interceptor {
    http: Arc<dyn HttpClient>,
    cache: Arc<dyn CacheStore>,
    namespaces: CacheNamespaces,
    origin: Url,
    app_shell_routes: Vec<String>,
    batch_size: usize,
    events: Option<EventBus>,
}

impl Interceptor {
    /// # Errors
    ///
    /// Fails when the configuration has no `HttpClient`.
    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        let http = config
            .http_client
            .clone()
            .ok_or_else(|| core_runtime::Error::CapabilityMissing {
                capability: "HttpClient".to_string(),
                message: "The interceptor needs an HttpClient to reach the network.".to_string(),
            })?;

        Ok(Self {
            http,
            cache: Arc::clone(&config.cache_store),
            namespaces: config.namespaces.clone(),
            origin: config.origin.clone(),
            app_shell_routes: config.app_shell_routes.clone(),
            batch_size: config.interceptor_batch_size.max(1),
            events: None,
        })
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn namespaces(&self) -> &CacheNamespaces {
        &self.namespaces
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Precaches the app shell routes. Routes that fail are skipped.
    ///
    /// Returns the number of routes stored.
    #[instrument(skip(self))]
    pub async fn install(&self) -> usize {
        let mut stored = 0;
        for route in &self.app_shell_routes {
            let url = match self.origin.join(route) {
                Ok(url) => url,
                Err(e) => {
                    warn!(route = %route, error = %e, "Skipping invalid app shell route");
                    continue;
                }
            };
            let request = HttpRequest::get(url.as_str()).cache_mode(CacheMode::NoCache);
            match self.http.execute(request).await {
                Ok(response) if response.is_success() => {
                    let content_type = response
                        .content_type()
                        .unwrap_or(DEFAULT_CONTENT_TYPE)
                        .to_string();
                    match self
                        .store(&self.namespaces.app_shell, url.as_str(), content_type, response.body)
                        .await
                    {
                        Ok(()) => stored += 1,
                        Err(e) => warn!(url = %url, error = %e, "Failed to precache route"),
                    }
                }
                Ok(response) => {
                    warn!(url = %url, status = response.status, "App shell route not cached")
                }
                Err(e) => warn!(url = %url, error = %e, "App shell route not cached"),
            }
        }
        info!(stored, routes = self.app_shell_routes.len(), "Installed app shell");
        stored
    }

    /// Deletes namespaces left over from earlier cache versions.
    ///
    /// Returns the deleted namespace names.
    #[instrument(skip(self))]
    pub async fn activate(&self) -> Result<Vec<String>> {
        let mut deleted = Vec::new();
        for namespace in self.cache.namespaces().await? {
            if self.namespaces.is_stale(&namespace) {
                info!(namespace = %namespace, "Deleting stale cache namespace");
                self.cache.delete_namespace(&namespace).await?;
                deleted.push(namespace);
            }
        }
        if !deleted.is_empty() {
            self.emit(CacheEvent::Cleared {
                namespaces: deleted.clone(),
            });
        }
        Ok(deleted)
    }

    /// Answers an intercepted request.
    ///
    /// # Errors
    ///
    /// - [`InterceptorError::InvalidUrl`] when the URL cannot be parsed
    /// - [`InterceptorError::Unavailable`] when the network fails and no cached
    ///   copy or shell fallback exists
    #[instrument(skip(self, request), fields(url = %request.url, navigation = request.navigation))]
    pub async fn handle_fetch(&self, request: FetchRequest) -> Result<FetchResponse> {
        let url = Url::parse(&request.url).map_err(|e| InterceptorError::InvalidUrl {
            url: request.url.clone(),
            message: e.to_string(),
        })?;

        match classify(&self.origin, &request, &url) {
            RequestKind::Passthrough => {
                let response = self.http.execute(request.to_http()).await.map_err(|e| {
                    InterceptorError::Unavailable {
                        url: request.url.clone(),
                        message: e.to_string(),
                    }
                })?;
                Ok(FetchResponse::network(response))
            }
            RequestKind::Document => {
                let key = self.document_key(&url);
                self.cache_first(&self.namespaces.documents, &key, &request, false)
                    .await
            }
            RequestKind::Navigation => self.network_first(&url, &request).await,
            RequestKind::AppResource => {
                let key = route_key(&url);
                let is_shell_route = self.is_shell_route(url.path());
                self.cache_first(&self.namespaces.app_shell, &key, &request, is_shell_route)
                    .await
            }
        }
    }

    /// Stored document URLs, sorted.
    pub async fn cached_documents(&self) -> Result<Vec<String>> {
        let mut urls: Vec<String> = self
            .cache
            .keys(&self.namespaces.documents)
            .await?
            .into_iter()
            .filter(|key| key.contains(".pdf") || key.contains("/assets/"))
            .collect();
        urls.sort();
        Ok(urls)
    }

    /// Deletes the document and app shell namespaces.
    pub async fn clear_all(&self) -> Result<()> {
        for namespace in self.namespaces.all() {
            self.cache.delete_namespace(namespace).await?;
        }
        info!("Cleared document and app shell caches");
        self.emit(CacheEvent::Cleared {
            namespaces: self.namespaces.all().iter().map(|n| n.to_string()).collect(),
        });
        Ok(())
    }

    /// Fetches and stores `urls` in batches of `batch_size`, documents within
    /// a batch in parallel.
    ///
    /// `on_progress` runs once per finished batch. Cancellation is checked
    /// before each batch; a cancelled run stops without starting the next
    /// one. Individual failures are counted and never abort the run.
    #[instrument(skip(self, urls, cancel, on_progress), fields(total = urls.len()))]
    pub async fn download_batch<F>(
        &self,
        urls: &[String],
        batch_size: usize,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> BatchOutcome
    where
        F: FnMut(BatchProgress),
    {
        let batch_size = if batch_size == 0 {
            DEFAULT_BATCH_SIZE
        } else {
            batch_size
        };
        let total = urls.len() as u64;
        let mut completed = 0u64;
        let mut failed = 0u64;
        info!(total, batch_size, "Starting batch download");

        for (index, batch) in urls.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                info!(completed, failed, "Batch download cancelled");
                return BatchOutcome {
                    progress: BatchProgress::new(completed, failed, total),
                    cancelled: true,
                };
            }

            let results = join_all(batch.iter().map(|url| self.download_document(url))).await;
            for result in results {
                match result {
                    Ok(()) => completed += 1,
                    Err(e) => {
                        warn!(error = %e, "Document download failed");
                        failed += 1;
                    }
                }
            }
            debug!(batch = index + 1, completed, failed, "Batch finished");
            on_progress(BatchProgress::new(completed, failed, total));
        }

        info!(completed, failed, total, "Batch download finished");
        BatchOutcome {
            progress: BatchProgress::new(completed, failed, total),
            cancelled: false,
        }
    }

    async fn download_document(&self, raw: &str) -> Result<()> {
        let url = self
            .origin
            .join(raw)
            .map_err(|e| InterceptorError::InvalidUrl {
                url: raw.to_string(),
                message: e.to_string(),
            })?;
        let request = HttpRequest::get(url.as_str()).cache_mode(CacheMode::NoCache);
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| InterceptorError::Unavailable {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        if !is_storable(&response) {
            return Err(InterceptorError::Unavailable {
                url: url.to_string(),
                message: format!("HTTP {}", response.status),
            });
        }
        let key = self.document_key(&url);
        let content_type = response
            .content_type()
            .unwrap_or(PDF_CONTENT_TYPE)
            .to_string();
        self.store(&self.namespaces.documents, &key, content_type, response.body)
            .await
    }

    async fn cache_first(
        &self,
        namespace: &str,
        key: &str,
        request: &FetchRequest,
        shell_fallback: bool,
    ) -> Result<FetchResponse> {
        if let Some(response) = self.lookup(namespace, key).await {
            debug!(key, "Serving from cache");
            return Ok(FetchResponse {
                response,
                source: ResponseSource::Cache,
            });
        }

        match self.http.execute(request.to_http()).await {
            Ok(response) => {
                if is_storable(&response) {
                    let content_type = response
                        .content_type()
                        .unwrap_or(DEFAULT_CONTENT_TYPE)
                        .to_string();
                    if let Err(e) = self
                        .store(namespace, key, content_type, response.body.clone())
                        .await
                    {
                        warn!(key, error = %e, "Failed to store response");
                    }
                }
                Ok(FetchResponse::network(response))
            }
            Err(e) => {
                // The sync session may have stored it meanwhile
                if let Some(response) = self.lookup(namespace, key).await {
                    return Ok(FetchResponse {
                        response,
                        source: ResponseSource::Cache,
                    });
                }
                if shell_fallback {
                    if let Some(response) = self.shell().await {
                        return Ok(FetchResponse {
                            response,
                            source: ResponseSource::ShellFallback,
                        });
                    }
                }
                Err(InterceptorError::Unavailable {
                    url: request.url.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn network_first(&self, url: &Url, request: &FetchRequest) -> Result<FetchResponse> {
        let key = route_key(url);
        match self
            .http
            .execute(request.to_http())
            .await
        {
            Ok(response) => {
                if response.status == 200 {
                    let content_type = response
                        .content_type()
                        .unwrap_or(HTML_CONTENT_TYPE)
                        .to_string();
                    if let Err(e) = self
                        .store(&self.namespaces.app_shell, &key, content_type, response.body.clone())
                        .await
                    {
                        warn!(key = %key, error = %e, "Failed to store page");
                    }
                }
                Ok(FetchResponse::network(response))
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Navigation offline, trying cache");
                if let Some(response) = self.lookup(&self.namespaces.app_shell, &key).await {
                    return Ok(FetchResponse {
                        response,
                        source: ResponseSource::Cache,
                    });
                }
                if let Some(response) = self.shell().await {
                    return Ok(FetchResponse {
                        response,
                        source: ResponseSource::ShellFallback,
                    });
                }
                Err(InterceptorError::Unavailable {
                    url: request.url.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// The cached `/` page served as HTML.
    async fn shell(&self) -> Option<HttpResponse> {
        let root = self.origin.join("/").ok()?;
        let entry = self
            .cache
            .get(&self.namespaces.app_shell, root.as_str())
            .await
            .ok()
            .flatten()?;
        Some(HttpResponse::new(200, entry.body).with_header("Content-Type", HTML_CONTENT_TYPE))
    }

    async fn lookup(&self, namespace: &str, key: &str) -> Option<HttpResponse> {
        match self.cache.get(namespace, key).await {
            Ok(entry) => entry.map(|entry| {
                HttpResponse::new(200, entry.body).with_header("Content-Type", entry.content_type)
            }),
            Err(e) => {
                warn!(key, error = %e, "Cache lookup failed");
                None
            }
        }
    }

    async fn store(
        &self,
        namespace: &str,
        key: &str,
        content_type: String,
        body: Bytes,
    ) -> Result<()> {
        self.cache
            .put(namespace, key, CacheEntry::new(content_type, body))
            .await?;
        debug!(namespace, key, "Stored response");
        self.emit(CacheEvent::Stored {
            namespace: namespace.to_string(),
            url: key.to_string(),
        });
        Ok(())
    }

    fn is_shell_route(&self, path: &str) -> bool {
        self.app_shell_routes
            .iter()
            .any(|route| route == path || (route != "/" && path.starts_with(route.as_str())))
    }

    /// Same key the sync session uses for the document.
    fn document_key(&self, url: &Url) -> String {
        let path = path_of_url(url);
        if !path.to_ascii_lowercase().starts_with(ASSET_ROOT) {
            return route_key(url);
        }
        normalize_entry_name(&path)
            .and_then(|path| canonical_url(&self.origin, &path).ok())
            .map(String::from)
            .unwrap_or_else(|| route_key(url))
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.events {
            bus.emit(CoreEvent::Cache(event)).ok();
        }
    }
}

/// `200` and not an HTML page.
fn is_storable(response: &HttpResponse) -> bool {
    response.status == 200 && !response.is_html()
}

fn route_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.into()
}
