//! Response cache backed by SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::Result,
    storage::{CacheEntry, CacheStore},
};
use bytes::Bytes;
use sqlx::{sqlite::SqlitePool, Row};
use std::path::PathBuf;
use tracing::debug;

use crate::db::{db_error, open_file, open_in_memory};

/// SQLite-backed [`CacheStore`].
///
/// One row per `(namespace, key)`. Writes are single `INSERT .. ON CONFLICT`
/// statements, so SQLite guarantees a reader never sees a half-written body.
pub struct SqliteCacheStore {
    pool: SqlitePool,
}

impl SqliteCacheStore {
    /// Open a cache database at the given path
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        let pool = open_file(&db_path).await?;
        Self::init_schema(&pool).await?;
        debug!(path = ?db_path, "Initialized cache store");
        Ok(Self { pool })
    }

    /// Create an in-memory cache (for testing)
    pub async fn in_memory() -> Result<Self> {
        let pool = open_in_memory().await?;
        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                content_type TEXT NOT NULL,
                body BLOB NOT NULL,
                size INTEGER NOT NULL,
                stored_at INTEGER NOT NULL,
                PRIMARY KEY (namespace, key)
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(db_error("Failed to create cache table"))?;
        Ok(())
    }

    /// Total stored bytes in a namespace.
    pub async fn namespace_size(&self, namespace: &str) -> Result<u64> {
        let row = sqlx::query("SELECT COALESCE(SUM(size), 0) FROM cache_entries WHERE namespace = ?")
            .bind(namespace)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("Failed to sum cache size"))?;
        let size: i64 = row.get(0);
        Ok(size.max(0) as u64)
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn put(&self, namespace: &str, key: &str, entry: CacheEntry) -> Result<()> {
        let size = entry.size() as i64;
        sqlx::query(
            r#"
            INSERT INTO cache_entries (namespace, key, content_type, body, size, stored_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(namespace, key) DO UPDATE SET
                content_type = excluded.content_type,
                body = excluded.body,
                size = excluded.size,
                stored_at = excluded.stored_at
            "#,
        )
        .bind(namespace)
        .bind(key)
        .bind(&entry.content_type)
        .bind(entry.body.as_ref())
        .bind(size)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to store cache entry"))?;

        debug!(namespace, key, size, "Stored cache entry");
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(
            "SELECT content_type, body FROM cache_entries WHERE namespace = ? AND key = ?",
        )
        .bind(namespace)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to read cache entry"))?;

        Ok(row.map(|row| {
            let content_type: String = row.get(0);
            let body: Vec<u8> = row.get(1);
            CacheEntry {
                content_type,
                body: Bytes::from(body),
            }
        }))
    }

    async fn contains(&self, namespace: &str, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM cache_entries WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error("Failed to check cache entry"))?;
        Ok(row.is_some())
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM cache_entries WHERE namespace = ? ORDER BY key")
            .bind(namespace)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list cache keys"))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE namespace = ? AND key = ?")
            .bind(namespace)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to delete cache entry"))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE namespace = ?")
            .bind(namespace)
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to delete cache namespace"))?;

        debug!(namespace, removed = result.rows_affected(), "Deleted cache namespace");
        Ok(result.rows_affected() > 0)
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT namespace FROM cache_entries ORDER BY namespace")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error("Failed to list cache namespaces"))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }
}
