use crate::error::{AppError, Result};
use crate::models::BlobHandle;
use chrono::Utc;
use sqlx::SqlitePool;

/// Immutable byte storage addressed by opaque handles.
///
/// Blobs are append-only: `put` always allocates a fresh handle, nothing is ever
/// updated in place, and handles are never reused even after a row is removed.
#[derive(Debug, Clone)]
pub struct BlobArchive {
    pool: SqlitePool,
}

impl BlobArchive {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn put(&self, bytes: &[u8]) -> Result<BlobHandle> {
        let result = sqlx::query("INSERT INTO oc_blobs (body, created_at) VALUES (?1, ?2)")
            .bind(bytes)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;

        Ok(BlobHandle(result.last_insert_rowid()))
    }

    /// Fetch a blob's bytes, or `BlobMissing` when nothing backs the handle
    pub async fn get(&self, handle: BlobHandle) -> Result<Vec<u8>> {
        let body: Option<Vec<u8>> = sqlx::query_scalar("SELECT body FROM oc_blobs WHERE id = ?1")
            .bind(handle.0)
            .fetch_optional(&self.pool)
            .await?;

        body.ok_or_else(|| AppError::BlobMissing(handle.to_string()))
    }

    pub async fn exists(&self, handle: BlobHandle) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oc_blobs WHERE id = ?1")
            .bind(handle.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}
