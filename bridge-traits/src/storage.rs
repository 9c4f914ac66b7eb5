//! Storage Abstractions
//!
//! Persistent response cache and key-value settings.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Content type stored for extracted documents.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A stored response body and the content type it was served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub content_type: String,
    pub body: Bytes,
}

impl CacheEntry {
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    pub fn pdf(body: impl Into<Bytes>) -> Self {
        Self::new(PDF_CONTENT_TYPE, body)
    }

    pub fn size(&self) -> usize {
        self.body.len()
    }
}

/// Namespaced URL → response store that survives restarts.
///
/// Keys are absolute URLs. Each `put` must be atomic: a reader observes either
/// the previous entry or the complete new one, never a partial body.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::{CacheEntry, CacheStore};
///
/// async fn store(cache: &dyn CacheStore, url: &str, pdf: Bytes) -> Result<()> {
///     cache.put("plpc-v2-pdfs", url, CacheEntry::pdf(pdf)).await
/// }
/// ```
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Insert or replace the entry stored under `key`.
    async fn put(&self, namespace: &str, key: &str, entry: CacheEntry) -> Result<()>;

    /// Look up an exact key (the cache "match" operation).
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>>;

    async fn contains(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self.get(namespace, key).await?.is_some())
    }

    /// All keys stored in a namespace, in no particular order.
    async fn keys(&self, namespace: &str) -> Result<Vec<String>>;

    /// Remove one entry. Returns whether it existed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// Remove a whole namespace. Returns whether anything was removed.
    async fn delete_namespace(&self, namespace: &str) -> Result<bool>;

    /// Names of namespaces currently holding at least one entry.
    async fn namespaces(&self) -> Result<Vec<String>>;
}

/// Key-value preferences storage
///
/// Holds the sync bookkeeping: offline flag, last catalog fingerprint and the
/// selected/downloaded category lists.
///
/// # Example
///
/// ```ignore
/// async fn enable_offline(store: &dyn SettingsStore) -> Result<()> {
///     store.set_bool("ALLOW_OFFLINE", true).await
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Store a string value
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store a boolean value
    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    /// Retrieve a boolean value
    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    /// Delete a setting
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check if a key exists
    async fn has_key(&self, key: &str) -> Result<bool>;

    /// List all keys
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Clear all settings
    async fn clear_all(&self) -> Result<()>;
}
