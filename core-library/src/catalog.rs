//! # Catalog
//!
//! Loads the content manifest and the offline package manifest.
//!
//! Both manifests are fetched bypassing HTTP caches and a copy of every
//! successful response is written to the app shell namespace of the
//! [`CacheStore`]. When the network fails the cached copy is served instead;
//! only when neither source is available does loading fail with
//! [`LibraryError::ManifestUnavailable`].
//!
//! The offline package manifest is fetched lazily on first use and memoized
//! until [`Catalog::invalidate_offline_manifest`] is called.

use bridge_traits::{CacheEntry, CacheMode, CacheStore, HttpClient, HttpRequest};
use bytes::Bytes;
use core_async::sync::Mutex;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CatalogEvent, CoreEvent, EventBus};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{LibraryError, Result};
use crate::models::{parse_catalog, DocumentRecord, OfflineManifest};

const JSON_CONTENT_TYPE: &str = "application/json";

pub struct Catalog {
    http: Arc<dyn HttpClient>,
    cache: Arc<dyn CacheStore>,
    /// Namespace holding manifest copies
    namespace: String,
    origin: Url,
    content_manifest_url: Url,
    offline_manifest_url: Url,
    fallback_packages: BTreeMap<String, Url>,
    offline_manifest: Mutex<Option<Arc<OfflineManifest>>>,
    events: Option<EventBus>,
}

impl Catalog {
    /// Builds a catalog from the core configuration.
    ///
    /// # Errors
    ///
    /// Fails when no `HttpClient` is configured or a configured path cannot be
    /// resolved against the origin.
    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        let http = config.http_client.clone().ok_or_else(|| {
            core_runtime::Error::CapabilityMissing {
                capability: "HttpClient".to_string(),
                message: "An HttpClient is required to load manifests. \
                          Enable the desktop-shims feature or inject one with .http_client()."
                    .to_string(),
            }
        })?;

        let mut fallback_packages = BTreeMap::new();
        for category in config.fallback_packages.keys() {
            if let Some(url) = config.fallback_package_url(category) {
                fallback_packages.insert(category.clone(), url?);
            }
        }

        Ok(Self {
            http,
            cache: Arc::clone(&config.cache_store),
            namespace: config.namespaces.app_shell.clone(),
            origin: config.origin.clone(),
            content_manifest_url: config.content_manifest_url()?,
            offline_manifest_url: config.offline_manifest_url()?,
            fallback_packages,
            offline_manifest: Mutex::new(None),
            events: None,
        })
    }

    /// Publishes catalog events on `bus`.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn content_manifest_url(&self) -> &Url {
        &self.content_manifest_url
    }

    /// Fetches the content manifest, falling back to the cached copy.
    ///
    /// An empty array is returned as-is; callers treat it as "not loaded yet".
    #[instrument(skip(self), fields(url = %self.content_manifest_url))]
    pub async fn load_documents(&self) -> Result<Vec<DocumentRecord>> {
        let url = self.content_manifest_url.as_str();

        let network_error = match self.fetch(url, CacheMode::NoCache).await {
            Ok(body) => match parse_catalog(&body) {
                Ok(documents) => {
                    self.store_copy(url, body).await;
                    info!(documents = documents.len(), "Loaded catalog from network");
                    self.emit(CatalogEvent::Loaded {
                        documents: documents.len(),
                        from_cache: false,
                    });
                    return Ok(documents);
                }
                Err(e) => e.to_string(),
            },
            Err(message) => message,
        };

        warn!(error = %network_error, "Catalog fetch failed, trying cached copy");
        match self.cached_copy(url).await {
            Some(body) => {
                let documents = parse_catalog(&body)?;
                info!(documents = documents.len(), "Loaded catalog from cache");
                self.emit(CatalogEvent::Loaded {
                    documents: documents.len(),
                    from_cache: true,
                });
                Ok(documents)
            }
            None => Err(self.unavailable(url, network_error)),
        }
    }

    /// The offline package manifest, fetched on first use.
    #[instrument(skip(self), fields(url = %self.offline_manifest_url))]
    pub async fn offline_manifest(&self) -> Result<Arc<OfflineManifest>> {
        let mut slot = self.offline_manifest.lock().await;
        if let Some(manifest) = slot.as_ref() {
            return Ok(Arc::clone(manifest));
        }

        let url = self.offline_manifest_url.as_str();
        let network_error = match self.fetch(url, CacheMode::NoStore).await {
            Ok(body) => match OfflineManifest::from_slice(&body) {
                Ok(manifest) => {
                    self.store_copy(url, body).await;
                    debug!(categories = manifest.packages.len(), "Loaded offline manifest");
                    let manifest = Arc::new(manifest);
                    *slot = Some(Arc::clone(&manifest));
                    return Ok(manifest);
                }
                Err(e) => e.to_string(),
            },
            Err(message) => message,
        };

        warn!(error = %network_error, "Offline manifest fetch failed, trying cached copy");
        let Some(body) = self.cached_copy(url).await else {
            return Err(self.unavailable(url, network_error));
        };
        let manifest = Arc::new(OfflineManifest::from_slice(&body)?);
        *slot = Some(Arc::clone(&manifest));
        Ok(manifest)
    }

    /// Forgets the memoized offline manifest so the next call refetches it.
    pub async fn invalidate_offline_manifest(&self) {
        self.offline_manifest.lock().await.take();
    }

    /// Package URLs for a category, in download order.
    ///
    /// Uses the offline manifest when it lists the category and the configured
    /// fallback package otherwise. An empty list means the category has no
    /// package at all.
    ///
    /// # Errors
    ///
    /// [`LibraryError::ManifestUnavailable`] when the manifest cannot be
    /// loaded and no fallback package is configured for the category.
    pub async fn package_parts(&self, category: &str) -> Result<Vec<Url>> {
        let manifest_error = match self.offline_manifest().await {
            Ok(manifest) => {
                if let Some(parts) = manifest.parts_for(category).filter(|p| !p.is_empty()) {
                    return parts
                        .iter()
                        .map(|part| {
                            self.origin.join(&part.url).map_err(|e| {
                                LibraryError::InvalidUrl(format!("{}: {}", part.url, e))
                            })
                        })
                        .collect();
                }
                None
            }
            Err(e) => Some(e),
        };

        if let Some(url) = self.fallback_packages.get(category) {
            debug!(category, url = %url, "Using fallback package");
            return Ok(vec![url.clone()]);
        }

        match manifest_error {
            Some(e) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    async fn fetch(&self, url: &str, mode: CacheMode) -> std::result::Result<Bytes, String> {
        let request = HttpRequest::get(url).cache_mode(mode);
        match self.http.execute(request).await {
            Ok(response) if response.is_success() => Ok(response.body),
            Ok(response) => Err(format!("HTTP {}", response.status)),
            Err(e) => Err(e.to_string()),
        }
    }

    async fn store_copy(&self, url: &str, body: Bytes) {
        let entry = CacheEntry::new(JSON_CONTENT_TYPE, body);
        if let Err(e) = self.cache.put(&self.namespace, url, entry).await {
            warn!(url, error = %e, "Failed to cache manifest copy");
        }
    }

    async fn cached_copy(&self, url: &str) -> Option<Bytes> {
        match self.cache.get(&self.namespace, url).await {
            Ok(entry) => entry.map(|entry| entry.body),
            Err(e) => {
                warn!(url, error = %e, "Failed to read cached manifest");
                None
            }
        }
    }

    fn unavailable(&self, url: &str, message: String) -> LibraryError {
        self.emit(CatalogEvent::ManifestUnavailable {
            url: url.to_string(),
            message: message.clone(),
        });
        LibraryError::ManifestUnavailable {
            url: url.to_string(),
            message,
        }
    }

    fn emit(&self, event: CatalogEvent) {
        if let Some(bus) = &self.events {
            bus.emit(CoreEvent::Catalog(event)).ok();
        }
    }
}
