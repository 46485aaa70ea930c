use crate::error::Result;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// SQLite database backing the blob archive and the snapshot index
#[derive(Debug, Clone)]
pub struct SnapshotDatabase {
    pool: SqlitePool,
    database_path: PathBuf,
}

/// Database schema version for migrations
const DB_SCHEMA_VERSION: &str = "1";

impl SnapshotDatabase {
    /// Open (or create) the database and make sure the schema exists
    pub async fn new(database_path: PathBuf) -> Result<Self> {
        info!("Initializing SQLite database at: {:?}", database_path);

        // Ensure parent directory exists
        if let Some(parent) = database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let connect_options = SqliteConnectOptions::new()
            .filename(&database_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal) // Concurrent readers while a poller writes
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30)) // Wait 30s for locked DB
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(connect_options).await?;

        let db = Self { pool, database_path };
        db.initialize_schema().await?;

        info!("SQLite database initialized successfully");
        Ok(db)
    }

    async fn initialize_schema(&self) -> Result<()> {
        let statements = [
            // Immutable snapshot bodies. AUTOINCREMENT keeps ids from ever being reused.
            r#"
            CREATE TABLE IF NOT EXISTS oc_blobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                body BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS oc_records (
                expiry INTEGER PRIMARY KEY,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS oc_date_list (
                expiry INTEGER NOT NULL REFERENCES oc_records(expiry),
                day INTEGER NOT NULL,
                PRIMARY KEY (expiry, day)
            )
            "#,
            // blob_id deliberately carries no foreign key: a sample may outlive its blob
            r#"
            CREATE TABLE IF NOT EXISTS oc_samples (
                expiry INTEGER NOT NULL REFERENCES oc_records(expiry),
                day INTEGER NOT NULL,
                ts INTEGER NOT NULL,
                blob_id INTEGER NOT NULL,
                PRIMARY KEY (expiry, day, ts)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_oc_samples_blob ON oc_samples(blob_id)",
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        sqlx::query("INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)")
            .bind(DB_SCHEMA_VERSION)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.database_path
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        self.pool.close().await;
        info!("SQLite database connection pool closed");
    }
}

/// Row counts shown by `status` and `/health`
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DatabaseStats {
    pub records: i64,
    pub days: i64,
    pub samples: i64,
    pub blobs: i64,
    /// Blobs no sample points at any more (replaced same-second writes, interrupted writes)
    pub orphan_blobs: i64,
}

pub async fn get_database_stats(pool: &SqlitePool) -> Result<DatabaseStats> {
    let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oc_records")
        .fetch_one(pool)
        .await?;
    let days: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oc_date_list")
        .fetch_one(pool)
        .await?;
    let samples: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oc_samples")
        .fetch_one(pool)
        .await?;
    let blobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oc_blobs")
        .fetch_one(pool)
        .await?;
    let orphan_blobs: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM oc_blobs b WHERE NOT EXISTS (SELECT 1 FROM oc_samples s WHERE s.blob_id = b.id)",
    )
    .fetch_one(pool)
    .await?;

    Ok(DatabaseStats {
        records,
        days,
        samples,
        blobs,
        orphan_blobs,
    })
}
