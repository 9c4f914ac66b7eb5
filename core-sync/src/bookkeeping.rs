//! Persistent sync bookkeeping
//!
//! Small records kept in the [`SettingsStore`] across restarts. Category
//! lists are stored as JSON arrays of strings.

use bridge_traits::{Clock, SettingsStore};
use chrono::{DateTime, Utc};
use core_library::ManifestFingerprint;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;

pub const ALLOW_OFFLINE_KEY: &str = "ALLOW_OFFLINE";
pub const MANIFEST_HASH_KEY: &str = "lastManifestHash";
pub const SELECTED_CATEGORIES_KEY: &str = "selectedCategoriesForDownload";
pub const DOWNLOADED_CATEGORIES_KEY: &str = "downloadedCategories";
pub const LAST_SYNC_KEY: &str = "lastOfflineSyncAt";

const ALL_KEYS: [&str; 5] = [
    ALLOW_OFFLINE_KEY,
    MANIFEST_HASH_KEY,
    SELECTED_CATEGORIES_KEY,
    DOWNLOADED_CATEGORIES_KEY,
    LAST_SYNC_KEY,
];

pub struct Bookkeeping {
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
}

impl Bookkeeping {
    pub fn new(settings: Arc<dyn SettingsStore>, clock: Arc<dyn Clock>) -> Self {
        Self { settings, clock }
    }

    pub async fn offline_enabled(&self) -> Result<bool> {
        Ok(self
            .settings
            .get_bool(ALLOW_OFFLINE_KEY)
            .await?
            .unwrap_or(false))
    }

    pub async fn set_offline_enabled(&self, enabled: bool) -> Result<()> {
        self.settings.set_bool(ALLOW_OFFLINE_KEY, enabled).await?;
        Ok(())
    }

    pub async fn fingerprint(&self) -> Result<Option<ManifestFingerprint>> {
        Ok(self
            .settings
            .get_string(MANIFEST_HASH_KEY)
            .await?
            .filter(|hash| !hash.is_empty())
            .map(ManifestFingerprint::new))
    }

    pub async fn set_fingerprint(&self, fingerprint: &ManifestFingerprint) -> Result<()> {
        self.settings
            .set_string(MANIFEST_HASH_KEY, fingerprint.as_str())
            .await?;
        Ok(())
    }

    pub async fn selected_categories(&self) -> Result<Vec<String>> {
        self.read_list(SELECTED_CATEGORIES_KEY).await
    }

    pub async fn set_selected_categories(&self, categories: &[String]) -> Result<()> {
        self.write_list(SELECTED_CATEGORIES_KEY, categories).await
    }

    pub async fn downloaded_categories(&self) -> Result<Vec<String>> {
        self.read_list(DOWNLOADED_CATEGORIES_KEY).await
    }

    /// Adds categories to the downloaded list; returns the updated list.
    pub async fn add_downloaded_categories(&self, categories: &[String]) -> Result<Vec<String>> {
        let mut downloaded = self.downloaded_categories().await?;
        let before = downloaded.len();
        for category in categories {
            if !downloaded.contains(category) {
                downloaded.push(category.clone());
            }
        }
        if downloaded.len() != before {
            self.write_list(DOWNLOADED_CATEGORIES_KEY, &downloaded).await?;
        }
        Ok(downloaded)
    }

    pub async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(raw) = self.settings.get_string(LAST_SYNC_KEY).await? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                warn!(value = %raw, error = %e, "Ignoring malformed sync timestamp");
                Ok(None)
            }
        }
    }

    /// Bookkeeping for a session that finished without being cancelled.
    pub async fn record_finished_session(
        &self,
        fingerprint: Option<&ManifestFingerprint>,
        completed_categories: &[String],
    ) -> Result<Vec<String>> {
        self.set_offline_enabled(true).await?;
        if let Some(fingerprint) = fingerprint {
            self.set_fingerprint(fingerprint).await?;
        }
        self.settings
            .set_string(LAST_SYNC_KEY, &self.clock.now().to_rfc3339())
            .await?;
        let downloaded = self.add_downloaded_categories(completed_categories).await?;
        debug!(categories = ?downloaded, "Recorded finished session");
        Ok(downloaded)
    }

    /// Removes every bookkeeping key.
    pub async fn clear(&self) -> Result<()> {
        for key in ALL_KEYS {
            self.settings.delete(key).await?;
        }
        Ok(())
    }

    async fn read_list(&self, key: &str) -> Result<Vec<String>> {
        let Some(raw) = self.settings.get_string(key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(list) => Ok(list),
            Err(e) => {
                warn!(key, error = %e, "Ignoring malformed category list");
                Ok(Vec::new())
            }
        }
    }

    async fn write_list(&self, key: &str, values: &[String]) -> Result<()> {
        let raw = serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string());
        self.settings.set_string(key, &raw).await?;
        Ok(())
    }
}
