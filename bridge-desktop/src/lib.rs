//! # Desktop Bridge Implementations
//!
//! Default implementations of the bridge traits for desktop hosts
//! (macOS, Windows, Linux):
//! - `HttpClient` using `reqwest`
//! - `CacheStore` using a SQLite blob table
//! - `SettingsStore` using a SQLite key-value table
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteCacheStore, SqliteSettingsStore};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let data_dir = bridge_desktop::default_data_dir()?;
//!     let cache = SqliteCacheStore::new(data_dir.join("cache.db")).await?;
//!     let settings = SqliteSettingsStore::new(data_dir.join("settings.db")).await?;
//!     let http = ReqwestHttpClient::new();
//!     // Hand these to CoreConfig::builder()
//!     Ok(())
//! }
//! ```

mod cache_store;
mod db;
mod http;
mod settings;

pub use cache_store::SqliteCacheStore;
pub use db::default_data_dir;
pub use http::ReqwestHttpClient;
pub use settings::SqliteSettingsStore;
