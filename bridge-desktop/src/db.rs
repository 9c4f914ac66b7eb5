//! Shared SQLite pool setup.

use bridge_traits::error::{BridgeError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;

const APP_DIR: &str = "chart-library";

/// Per-user data directory for the library databases.
pub fn default_data_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or_else(|| BridgeError::NotAvailable("local data directory".to_string()))
}

/// Open (creating if needed) a file-backed database.
pub(crate) async fn open_file(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(BridgeError::Io)?;
    }

    // SQLite URLs want forward slashes even on Windows
    let path_str = db_path.to_string_lossy().replace('\\', "/");
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path_str))
        .map_err(|e| BridgeError::DatabaseError(format!("Invalid database path: {}", e)))?
        .create_if_missing(true);

    SqlitePool::connect_with(options)
        .await
        .map_err(|e| BridgeError::DatabaseError(format!("Failed to connect to DB: {}", e)))
}

/// A private in-memory database.
///
/// Every SQLite connection to `:memory:` gets its own database, so the pool is
/// pinned to one connection that is never recycled.
pub(crate) async fn open_in_memory() -> Result<SqlitePool> {
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .map_err(|e| BridgeError::DatabaseError(format!("Failed to connect to DB: {}", e)))
}

pub(crate) fn db_error(context: &str) -> impl Fn(sqlx::Error) -> BridgeError + '_ {
    move |e| BridgeError::DatabaseError(format!("{}: {}", context, e))
}
