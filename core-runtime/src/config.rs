//! # Core Configuration Module
//!
//! Builder-based configuration for the offline chart library core.
//!
//! ## Required Dependencies
//!
//! - `CacheStore` - Persistent storage for documents, app shell and manifests
//! - `SettingsStore` - Sync bookkeeping (offline flag, fingerprint, categories)
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - HTTP operations (desktop default: reqwest)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .origin("https://charts.example")
//!     .cache_store(Arc::new(SqliteCacheStore::new(dir.join("cache.db")).await?))
//!     .settings_store(Arc::new(SqliteSettingsStore::new(dir.join("settings.db")).await?))
//!     .interceptor_batch_size(10)
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! The builder validates required dependencies and settings and returns
//! actionable messages:
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Panics: no CacheStore / SettingsStore were injected
//! let config = CoreConfig::builder()
//!     .origin("https://charts.example")
//!     .build()
//!     .expect("Should fail - missing required bridges");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{CacheStore, HttpClient, SettingsStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Default path of the catalog (content) manifest.
pub const DEFAULT_CONTENT_MANIFEST_PATH: &str = "/louvores-manifest.json";
/// Default path of the offline package manifest.
pub const DEFAULT_OFFLINE_MANIFEST_PATH: &str = "/offline-manifest.json";
/// Default base path under which package archives are served.
pub const DEFAULT_PACKAGES_BASE_PATH: &str = "/packages";
/// Default number of documents the interceptor fetches in parallel.
pub const DEFAULT_BATCH_SIZE: usize = 10;
/// Default timeout for a request/response exchange with the interceptor.
pub const DEFAULT_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Names of the persistent cache namespaces.
///
/// Both names share a version prefix; the interceptor deletes namespaces that
/// do not belong to the current version when it activates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNamespaces {
    pub version: String,
    /// Extracted and individually fetched documents
    pub documents: String,
    /// App shell routes, manifests and other same-origin assets
    pub app_shell: String,
}

impl CacheNamespaces {
    pub fn for_version(version: impl Into<String>) -> Self {
        let version = version.into();
        Self {
            documents: format!("{}-pdfs", version),
            app_shell: format!("{}-app", version),
            version,
        }
    }

    /// Whether a namespace belongs to the current version.
    pub fn is_current(&self, namespace: &str) -> bool {
        namespace == self.documents || namespace == self.app_shell
    }

    /// An older namespace of the same family (`plpc-v1-app` when the
    /// current version is `plpc-v2`).
    pub fn is_stale(&self, namespace: &str) -> bool {
        let family = match self.version.find('-') {
            Some(index) => &self.version[..=index],
            None => self.version.as_str(),
        };
        namespace.starts_with(family) && !self.is_current(namespace)
    }

    pub fn all(&self) -> [&str; 2] {
        [self.documents.as_str(), self.app_shell.as_str()]
    }
}

impl Default for CacheNamespaces {
    fn default() -> Self {
        Self::for_version("plpc-v2")
    }
}

/// Core configuration.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Origin every relative path is resolved against
    pub origin: Url,

    pub content_manifest_path: String,

    pub offline_manifest_path: String,

    pub packages_base_path: String,

    /// Package file used when the offline manifest has no entry for a category
    pub fallback_packages: BTreeMap<String, String>,

    pub namespaces: CacheNamespaces,

    /// Routes precached for offline navigation
    pub app_shell_routes: Vec<String>,

    /// Documents fetched in parallel per interceptor batch
    pub interceptor_batch_size: usize,

    /// Upper bound for one interceptor request/response exchange
    pub message_timeout: Duration,

    pub event_buffer_size: usize,

    /// HTTP client (optional with desktop default)
    pub http_client: Option<Arc<dyn HttpClient>>,

    /// Persistent response cache (required)
    pub cache_store: Arc<dyn CacheStore>,

    /// Bookkeeping storage (required)
    pub settings_store: Arc<dyn SettingsStore>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("origin", &self.origin.as_str())
            .field("content_manifest_path", &self.content_manifest_path)
            .field("offline_manifest_path", &self.offline_manifest_path)
            .field("packages_base_path", &self.packages_base_path)
            .field("fallback_packages", &self.fallback_packages)
            .field("namespaces", &self.namespaces)
            .field("interceptor_batch_size", &self.interceptor_batch_size)
            .field("message_timeout", &self.message_timeout)
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .field("cache_store", &"CacheStore { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .finish()
    }
}

/// Category → package file pairs shipped with the app.
pub fn default_fallback_packages() -> BTreeMap<String, String> {
    [
        ("Partitura", "Partitura.zip"),
        ("Cifra", "Cifra.zip"),
        ("Gestos em Gravura", "Gestos-em-Gravura.zip"),
    ]
    .into_iter()
    .map(|(category, file)| (category.to_string(), file.to_string()))
    .collect()
}

fn default_app_shell_routes() -> Vec<String> {
    [
        "/",
        "/leitor",
        "/manifest.json",
        DEFAULT_CONTENT_MANIFEST_PATH,
        "/favicon.svg",
        "/icon-192.png",
        "/icon-512.png",
    ]
        .into_iter()
        .map(String::from)
        .collect()
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Resolves a path (or absolute URL) against the configured origin.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        self.origin
            .join(path)
            .map_err(|e| Error::Config(format!("Cannot resolve '{}' against origin: {}", path, e)))
    }

    pub fn content_manifest_url(&self) -> Result<Url> {
        self.resolve(&self.content_manifest_path)
    }

    pub fn offline_manifest_url(&self) -> Result<Url> {
        self.resolve(&self.offline_manifest_path)
    }

    /// URL of the fallback package for a category, if one is configured.
    pub fn fallback_package_url(&self, category: &str) -> Option<Result<Url>> {
        self.fallback_packages.get(category).map(|file| {
            self.resolve(&format!(
                "{}/{}",
                self.packages_base_path.trim_end_matches('/'),
                file
            ))
        })
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The origin is an http(s) URL
    /// - Manifest and package paths are absolute
    /// - Namespaces are non-empty and distinct
    /// - Batch size and message timeout are within sane bounds
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "Origin must be an http(s) URL, got '{}'",
                self.origin
            )));
        }

        for (name, path) in [
            ("content manifest path", &self.content_manifest_path),
            ("offline manifest path", &self.offline_manifest_path),
            ("packages base path", &self.packages_base_path),
        ] {
            if !path.starts_with('/') {
                return Err(Error::Config(format!(
                    "The {} must start with '/', got '{}'",
                    name, path
                )));
            }
        }

        if self.namespaces.documents.is_empty() || self.namespaces.app_shell.is_empty() {
            return Err(Error::Config("Cache namespaces cannot be empty".to_string()));
        }
        if self.namespaces.documents == self.namespaces.app_shell {
            return Err(Error::Config(
                "Document and app shell caches must use different namespaces".to_string(),
            ));
        }

        if self.interceptor_batch_size == 0 || self.interceptor_batch_size > 100 {
            return Err(Error::Config(format!(
                "Interceptor batch size must be between 1 and 100, got {}",
                self.interceptor_batch_size
            )));
        }

        if self.message_timeout < Duration::from_secs(1) {
            return Err(Error::Config(
                "Interceptor message timeout must be at least one second".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn cache_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "CacheStore".to_string(),
        message: "A CacheStore implementation is required to keep documents available offline. \
                 Desktop: inject bridge_desktop::SqliteCacheStore. \
                 Other hosts: inject an adapter over the platform's persistent cache."
            .to_string(),
    }
}

fn settings_store_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "SettingsStore".to_string(),
        message: "A SettingsStore implementation is required for sync bookkeeping. \
                 Desktop: inject bridge_desktop::SqliteSettingsStore. \
                 Other hosts: inject a key-value store backed by local preferences."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Option<Arc<dyn HttpClient>> {
    let client: Arc<dyn HttpClient> = Arc::new(bridge_desktop::ReqwestHttpClient::new());
    Some(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Option<Arc<dyn HttpClient>> {
    None
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    origin: Option<String>,
    content_manifest_path: Option<String>,
    offline_manifest_path: Option<String>,
    packages_base_path: Option<String>,
    fallback_packages: Option<BTreeMap<String, String>>,
    namespaces: Option<CacheNamespaces>,
    app_shell_routes: Option<Vec<String>>,
    interceptor_batch_size: Option<usize>,
    message_timeout: Option<Duration>,
    event_buffer_size: Option<usize>,
    http_client: Option<Arc<dyn HttpClient>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
}

impl CoreConfigBuilder {
    /// Sets the origin (scheme, host and port) of the chart library site.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().origin("https://charts.example");
    /// ```
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn content_manifest_path(mut self, path: impl Into<String>) -> Self {
        self.content_manifest_path = Some(path.into());
        self
    }

    pub fn offline_manifest_path(mut self, path: impl Into<String>) -> Self {
        self.offline_manifest_path = Some(path.into());
        self
    }

    pub fn packages_base_path(mut self, path: impl Into<String>) -> Self {
        self.packages_base_path = Some(path.into());
        self
    }

    /// Replaces the category → package file fallback table.
    pub fn fallback_packages(mut self, packages: BTreeMap<String, String>) -> Self {
        self.fallback_packages = Some(packages);
        self
    }

    /// Derives both cache namespaces from a version prefix (e.g. `plpc-v2`).
    pub fn cache_version(mut self, version: impl Into<String>) -> Self {
        self.namespaces = Some(CacheNamespaces::for_version(version));
        self
    }

    pub fn app_shell_routes(mut self, routes: Vec<String>) -> Self {
        self.app_shell_routes = Some(routes);
        self
    }

    /// Default: 10
    pub fn interceptor_batch_size(mut self, size: usize) -> Self {
        self.interceptor_batch_size = Some(size);
        self
    }

    /// Default: 5 minutes
    pub fn message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout = Some(timeout);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the reqwest-based client is used when the
    /// `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the persistent cache (required).
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Sets the settings store (required).
    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// Returns an error if the origin is missing or malformed, a required
    /// bridge is missing, or a setting is out of range.
    pub fn build(self) -> Result<CoreConfig> {
        let origin = self.origin.ok_or_else(|| {
            Error::Config("Origin is required. Use .origin() to set it.".to_string())
        })?;
        let origin = Url::parse(&origin)
            .map_err(|e| Error::Config(format!("Invalid origin '{}': {}", origin, e)))?;

        let cache_store = self.cache_store.ok_or_else(cache_store_missing_error)?;
        let settings_store = self
            .settings_store
            .ok_or_else(settings_store_missing_error)?;

        let config = CoreConfig {
            origin,
            content_manifest_path: self
                .content_manifest_path
                .unwrap_or_else(|| DEFAULT_CONTENT_MANIFEST_PATH.to_string()),
            offline_manifest_path: self
                .offline_manifest_path
                .unwrap_or_else(|| DEFAULT_OFFLINE_MANIFEST_PATH.to_string()),
            packages_base_path: self
                .packages_base_path
                .unwrap_or_else(|| DEFAULT_PACKAGES_BASE_PATH.to_string()),
            fallback_packages: self
                .fallback_packages
                .unwrap_or_else(default_fallback_packages),
            namespaces: self.namespaces.unwrap_or_default(),
            app_shell_routes: self
                .app_shell_routes
                .unwrap_or_else(default_app_shell_routes),
            interceptor_batch_size: self.interceptor_batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            message_timeout: self.message_timeout.unwrap_or(DEFAULT_MESSAGE_TIMEOUT),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            http_client: self.http_client.or_else(provide_default_http_client),
            cache_store,
            settings_store,
        };

        config.validate()?;
        Ok(config)
    }
}
