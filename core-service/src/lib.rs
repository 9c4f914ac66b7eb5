//! Offline service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, cache and
//! settings storage) into the offline core and exposes [`OfflineService`] to
//! the host UI. Desktop apps typically keep the default `desktop-shims`
//! feature, which builds every bridge from `bridge-desktop`; other hosts pass
//! their own adapters through [`CoreConfig`].

pub mod error;
pub mod service;

pub use error::{CoreError, Result};
pub use service::{ChangeCheck, OfflineService};

pub use core_interceptor::{BatchOutcome, BatchProgress, FetchRequest, FetchResponse};
pub use core_library::DocumentRecord;
pub use core_runtime::config::{CoreConfig, CoreConfigBuilder};
pub use core_sync::{SyncPhase, SyncReport, SyncState};

#[cfg(feature = "desktop-shims")]
use std::path::PathBuf;
#[cfg(feature = "desktop-shims")]
use std::sync::Arc;

/// Convenience bootstrapper for desktop hosts.
///
/// Opens `cache.db` and `settings.db` under `data_dir` (or the per-user data
/// directory) and serves documents for `origin`.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// let service = core_service::bootstrap_desktop("https://charts.example.org", None).await?;
/// service.initialize().await?;
/// # Ok(())
/// # }
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(origin: &str, data_dir: Option<PathBuf>) -> Result<OfflineService> {
    use bridge_desktop::{default_data_dir, ReqwestHttpClient, SqliteCacheStore, SqliteSettingsStore};

    let data_dir = match data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };
    let cache = SqliteCacheStore::new(data_dir.join("cache.db")).await?;
    let settings = SqliteSettingsStore::new(data_dir.join("settings.db")).await?;

    let config = CoreConfig::builder()
        .origin(origin)
        .http_client(Arc::new(ReqwestHttpClient::new()))
        .cache_store(Arc::new(cache))
        .settings_store(Arc::new(settings))
        .build()
        .map_err(|err| CoreError::InitializationFailed(err.to_string()))?;

    OfflineService::new(config).await
}
