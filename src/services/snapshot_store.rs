//! Time-bucketed snapshot index: expiry → day → timestamp → blob.
//!
//! Snapshot bodies live in the [`BlobArchive`]; this module only maintains the
//! per-expiry index and resolves it back into snapshots.
//!
//! A write stores the blob first and then updates the index (record row,
//! `dateList` entry and sample handle) inside one transaction, so `dateList`
//! and the day buckets never diverge. A crash between the two steps leaves at
//! most an orphan blob.

use crate::error::{AppError, Result};
use crate::models::{
    parse_strike, BlobHandle, DayReadout, Expiry, MetricSnapshot, OptionSide, SampleTimestamp, SideMetrics,
    SnapshotRecord, TradingDay, STRIKE_EPSILON,
};
use crate::services::blob_archive::BlobArchive;
use crate::services::database::SnapshotDatabase;
use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
    archive: BlobArchive,
}

/// What a single `write` changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub handle: BlobHandle,
    /// First write ever for this expiry
    pub created_record: bool,
    /// The day was not yet in `dateList`
    pub new_day: bool,
    /// Handle previously stored for the same (expiry, day, timestamp); its blob is now orphaned
    pub replaced: Option<BlobHandle>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpirySummary {
    pub expiry: Expiry,
    pub days: i64,
    pub samples: i64,
    pub last_sample: Option<SampleTimestamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Days that had samples but were missing from `dateList`
    pub days_added: u64,
    /// `dateList` days without any sample. Left in place: `dateList` never shrinks.
    pub empty_days: u64,
}

/// One point of a per-strike series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrikeSample {
    pub timestamp: SampleTimestamp,
    #[serde(flatten)]
    pub metrics: SideMetrics,
}

/// The tracked metrics of one strike and side across a day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrikeHistory {
    pub expiry: Expiry,
    pub day: TradingDay,
    pub strike: String,
    pub side: OptionSide,
    pub samples: Vec<StrikeSample>,
}

impl SnapshotStore {
    pub fn new(db: &SnapshotDatabase) -> Self {
        let pool = db.pool().clone();
        Self {
            archive: BlobArchive::new(pool.clone()),
            pool,
        }
    }

    pub fn archive(&self) -> &BlobArchive {
        &self.archive
    }

    /// Persist one snapshot under (expiry, day, timestamp), replacing any sample already there
    pub async fn write(
        &self,
        expiry: Expiry,
        day: TradingDay,
        timestamp: SampleTimestamp,
        snapshot: &MetricSnapshot,
    ) -> Result<WriteOutcome> {
        let bytes = serde_json::to_vec(snapshot)?;
        let handle = self.archive.put(&bytes).await?;
        let now = Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;

        // Write first so the transaction takes the write lock up front
        let created_record = sqlx::query(
            "INSERT OR IGNORE INTO oc_records (expiry, created_at, updated_at) VALUES (?1, ?2, ?2)",
        )
        .bind(expiry)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if !created_record {
            sqlx::query("UPDATE oc_records SET updated_at = ?2 WHERE expiry = ?1")
                .bind(expiry)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        let new_day = sqlx::query("INSERT OR IGNORE INTO oc_date_list (expiry, day) VALUES (?1, ?2)")
            .bind(expiry)
            .bind(day)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;

        let replaced: Option<i64> =
            sqlx::query_scalar("SELECT blob_id FROM oc_samples WHERE expiry = ?1 AND day = ?2 AND ts = ?3")
                .bind(expiry)
                .bind(day)
                .bind(timestamp)
                .fetch_optional(&mut *tx)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO oc_samples (expiry, day, ts, blob_id) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (expiry, day, ts) DO UPDATE SET blob_id = excluded.blob_id
            "#,
        )
        .bind(expiry)
        .bind(day)
        .bind(timestamp)
        .bind(handle.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let outcome = WriteOutcome {
            handle,
            created_record,
            new_day,
            replaced: replaced.map(BlobHandle),
        };

        if created_record {
            info!(expiry, "Created snapshot record");
        }
        if let Some(old) = outcome.replaced {
            debug!(expiry, day, timestamp, old = %old, new = %handle, "Replaced sample, old blob orphaned");
        }

        Ok(outcome)
    }

    /// Read one day of an expiry back with every blob resolved.
    ///
    /// Samples whose blob is missing or undecodable are logged and skipped; the
    /// rest of the day is still returned.
    pub async fn read(&self, expiry: Expiry, day: TradingDay) -> Result<DayReadout> {
        if !self.record_exists(expiry).await? {
            return Err(AppError::NotFound {
                message: format!("No snapshot record for expiry {}", expiry),
                available_days: Vec::new(),
            });
        }

        let date_list = self.date_list(expiry).await?;
        let handles = self.day_handles(expiry, day).await?;

        if handles.is_empty() {
            let mut available: BTreeSet<TradingDay> = date_list.clone();
            available.extend(self.sampled_days(expiry).await?);
            available.remove(&day);

            let message = if date_list.contains(&day) {
                format!("Day {} is listed for expiry {} but has no samples", day, expiry)
            } else {
                format!("No samples for expiry {} on day {}", expiry, day)
            };
            return Err(AppError::NotFound {
                message,
                available_days: available.into_iter().collect(),
            });
        }

        let mut samples = BTreeMap::new();
        for (timestamp, handle) in handles {
            let bytes = match self.archive.get(handle).await {
                Ok(bytes) => bytes,
                Err(AppError::BlobMissing(_)) => {
                    warn!(expiry, day, timestamp, handle = %handle, "Blob missing, skipping sample");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match serde_json::from_slice::<MetricSnapshot>(&bytes) {
                Ok(snapshot) => {
                    samples.insert(timestamp, snapshot);
                }
                Err(e) => {
                    warn!(expiry, day, timestamp, handle = %handle, error = %e, "Undecodable blob, skipping sample");
                }
            }
        }

        let mut readout = DayReadout {
            expiry,
            date_list,
            day: BTreeMap::new(),
        };
        readout.day.insert(day, samples);
        Ok(readout)
    }

    /// The raw handle index of an expiry
    pub async fn record(&self, expiry: Expiry) -> Result<SnapshotRecord> {
        if !self.record_exists(expiry).await? {
            return Err(AppError::not_found(format!("No snapshot record for expiry {}", expiry)));
        }

        let mut record = SnapshotRecord {
            expiry,
            date_list: self.date_list(expiry).await?,
            day: BTreeMap::new(),
        };

        let rows = sqlx::query("SELECT day, ts, blob_id FROM oc_samples WHERE expiry = ?1 ORDER BY day, ts")
            .bind(expiry)
            .fetch_all(&self.pool)
            .await?;

        for row in rows {
            let day: i64 = row.try_get("day")?;
            let ts: i64 = row.try_get("ts")?;
            let blob_id: i64 = row.try_get("blob_id")?;
            record.day.entry(day).or_default().insert(ts, BlobHandle(blob_id));
        }

        Ok(record)
    }

    pub async fn date_list(&self, expiry: Expiry) -> Result<BTreeSet<TradingDay>> {
        let days: Vec<i64> = sqlx::query_scalar("SELECT day FROM oc_date_list WHERE expiry = ?1 ORDER BY day")
            .bind(expiry)
            .fetch_all(&self.pool)
            .await?;
        Ok(days.into_iter().collect())
    }

    pub async fn expiry_summaries(&self) -> Result<Vec<ExpirySummary>> {
        let rows = sqlx::query(
            r#"
            SELECT r.expiry AS expiry,
                   (SELECT COUNT(*) FROM oc_date_list d WHERE d.expiry = r.expiry) AS days,
                   (SELECT COUNT(*) FROM oc_samples s WHERE s.expiry = r.expiry) AS samples,
                   (SELECT MAX(ts) FROM oc_samples s WHERE s.expiry = r.expiry) AS last_sample
            FROM oc_records r
            ORDER BY r.expiry
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<ExpirySummary> {
                Ok(ExpirySummary {
                    expiry: row.try_get("expiry")?,
                    days: row.try_get("days")?,
                    samples: row.try_get("samples")?,
                    last_sample: row.try_get("last_sample")?,
                })
            })
            .collect()
    }

    /// Re-add every sampled day that is missing from `dateList`
    pub async fn rebuild_date_lists(&self) -> Result<RepairReport> {
        let days_added = sqlx::query("INSERT OR IGNORE INTO oc_date_list (expiry, day) SELECT DISTINCT expiry, day FROM oc_samples")
            .execute(&self.pool)
            .await?
            .rows_affected();

        let empty_days: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM oc_date_list d
            WHERE NOT EXISTS (SELECT 1 FROM oc_samples s WHERE s.expiry = d.expiry AND s.day = d.day)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        if days_added > 0 {
            warn!(days_added, "Repaired dateList entries missing for sampled days");
        }

        Ok(RepairReport {
            days_added,
            empty_days: empty_days.max(0) as u64,
        })
    }

    /// Series of one strike's tracked metrics over a day
    pub async fn strike_history(
        &self,
        expiry: Expiry,
        day: TradingDay,
        strike: f64,
        side: OptionSide,
    ) -> Result<StrikeHistory> {
        let readout = self.read(expiry, day).await?;

        let mut strike_key: Option<String> = None;
        let mut samples = Vec::new();

        if let Some(bucket) = readout.samples(day) {
            for (timestamp, snapshot) in bucket {
                let side_data = match side {
                    OptionSide::Call => &snapshot.ce_data,
                    OptionSide::Put => &snapshot.pe_data,
                };

                let found = side_data
                    .iter()
                    .find(|(key, _)| parse_strike(key).is_some_and(|k| (k - strike).abs() < STRIKE_EPSILON));

                if let Some((key, metrics)) = found {
                    strike_key.get_or_insert_with(|| key.clone());
                    samples.push(StrikeSample {
                        timestamp: *timestamp,
                        metrics: *metrics,
                    });
                }
            }
        }

        let strike = strike_key.ok_or_else(|| {
            AppError::not_found(format!(
                "Strike {} ({}) not present for expiry {} on day {}",
                strike, side, expiry, day
            ))
        })?;

        Ok(StrikeHistory {
            expiry,
            day,
            strike,
            side,
            samples,
        })
    }

    async fn record_exists(&self, expiry: Expiry) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM oc_records WHERE expiry = ?1")
            .bind(expiry)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn day_handles(&self, expiry: Expiry, day: TradingDay) -> Result<Vec<(SampleTimestamp, BlobHandle)>> {
        let rows = sqlx::query("SELECT ts, blob_id FROM oc_samples WHERE expiry = ?1 AND day = ?2 ORDER BY ts")
            .bind(expiry)
            .bind(day)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| -> Result<(SampleTimestamp, BlobHandle)> {
                Ok((row.try_get("ts")?, BlobHandle(row.try_get("blob_id")?)))
            })
            .collect()
    }

    async fn sampled_days(&self, expiry: Expiry) -> Result<Vec<TradingDay>> {
        let days = sqlx::query_scalar("SELECT DISTINCT day FROM oc_samples WHERE expiry = ?1 ORDER BY day")
            .bind(expiry)
            .fetch_all(&self.pool)
            .await?;
        Ok(days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SECONDS_PER_DAY;
    use tempfile::{tempdir, TempDir};

    const EXPIRY: Expiry = 1416076200;
    const DAY: TradingDay = 1_731_024_000; // 2024-11-08T00:00:00Z

    async fn setup() -> (TempDir, SnapshotDatabase, SnapshotStore) {
        let temp_dir = tempdir().unwrap();
        let db = SnapshotDatabase::new(temp_dir.path().join("store.db")).await.unwrap();
        let store = SnapshotStore::new(&db);
        (temp_dir, db, store)
    }

    fn snapshot(oi: f64) -> MetricSnapshot {
        let mut snapshot = MetricSnapshot::default();
        snapshot.ce_data.insert(
            "18000".to_string(),
            SideMetrics {
                oi_percentage: Some(oi),
                oichng_percentage: None,
                vol_percentage: Some(1.5),
            },
        );
        snapshot.pe_data.insert("18000".to_string(), SideMetrics::default());
        snapshot
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let (_dir, _db, store) = setup().await;
        let written = snapshot(12.5);

        let outcome = store.write(EXPIRY, DAY, DAY + 33_300, &written).await.unwrap();
        assert!(outcome.created_record);
        assert!(outcome.new_day);
        assert_eq!(outcome.replaced, None);

        let readout = store.read(EXPIRY, DAY).await.unwrap();
        assert_eq!(readout.expiry, EXPIRY);
        assert_eq!(readout.date_list, BTreeSet::from([DAY]));
        assert_eq!(readout.samples(DAY).unwrap().get(&(DAY + 33_300)), Some(&written));
    }

    #[tokio::test]
    async fn test_date_list_set_semantics() {
        let (_dir, _db, store) = setup().await;

        // 3 days, 4 samples each
        for d in 0..3 {
            let day = DAY + d * SECONDS_PER_DAY;
            for i in 0..4 {
                store.write(EXPIRY, day, day + 100 + i * 10, &snapshot(i as f64)).await.unwrap();
            }
        }

        let record = store.record(EXPIRY).await.unwrap();
        assert_eq!(record.date_list.len(), 3);
        assert_eq!(record.sample_count(), 12);
        assert!(record.is_consistent());
    }

    #[tokio::test]
    async fn test_same_second_write_replaces_handle() {
        let (_dir, _db, store) = setup().await;
        let first = store.write(EXPIRY, DAY, DAY + 5, &snapshot(1.0)).await.unwrap();
        let second = store.write(EXPIRY, DAY, DAY + 5, &snapshot(2.0)).await.unwrap();

        assert!(!second.created_record);
        assert!(!second.new_day);
        assert_eq!(second.replaced, Some(first.handle));
        assert_ne!(first.handle, second.handle);

        let readout = store.read(EXPIRY, DAY).await.unwrap();
        let bucket = readout.samples(DAY).unwrap();
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket[&(DAY + 5)], snapshot(2.0));

        // Old blob is orphaned, never deleted
        assert!(store.archive().exists(first.handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_read_unknown_day_lists_available_days() {
        let (_dir, _db, store) = setup().await;
        store.write(EXPIRY, DAY, DAY + 10, &snapshot(1.0)).await.unwrap();
        store
            .write(EXPIRY, DAY + SECONDS_PER_DAY, DAY + SECONDS_PER_DAY + 10, &snapshot(1.0))
            .await
            .unwrap();

        let missing_day = DAY - SECONDS_PER_DAY;
        match store.read(EXPIRY, missing_day).await.unwrap_err() {
            AppError::NotFound { available_days, .. } => {
                assert_eq!(available_days, vec![DAY, DAY + SECONDS_PER_DAY]);
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_listed_day_without_samples_excludes_itself() {
        let (_dir, db, store) = setup().await;
        store.write(EXPIRY, DAY, DAY + 10, &snapshot(1.0)).await.unwrap();

        let listed_only = DAY + SECONDS_PER_DAY;
        sqlx::query("INSERT INTO oc_date_list (expiry, day) VALUES (?1, ?2)")
            .bind(EXPIRY)
            .bind(listed_only)
            .execute(db.pool())
            .await
            .unwrap();

        match store.read(EXPIRY, listed_only).await.unwrap_err() {
            AppError::NotFound { message, available_days } => {
                assert_eq!(available_days, vec![DAY]);
                assert!(message.contains("no samples"));
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_unknown_expiry() {
        let (_dir, _db, store) = setup().await;
        match store.read(EXPIRY, DAY).await.unwrap_err() {
            AppError::NotFound { available_days, .. } => assert!(available_days.is_empty()),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_skips_missing_and_corrupt_blobs() {
        let (_dir, db, store) = setup().await;
        let kept = store.write(EXPIRY, DAY, DAY + 10, &snapshot(1.0)).await.unwrap();
        let lost = store.write(EXPIRY, DAY, DAY + 20, &snapshot(2.0)).await.unwrap();
        let corrupt = store.write(EXPIRY, DAY, DAY + 30, &snapshot(3.0)).await.unwrap();

        sqlx::query("DELETE FROM oc_blobs WHERE id = ?1")
            .bind(lost.handle.0)
            .execute(db.pool())
            .await
            .unwrap();
        sqlx::query("UPDATE oc_blobs SET body = ?2 WHERE id = ?1")
            .bind(corrupt.handle.0)
            .bind(b"not json".to_vec())
            .execute(db.pool())
            .await
            .unwrap();

        let readout = store.read(EXPIRY, DAY).await.unwrap();
        let bucket = readout.samples(DAY).unwrap();
        assert_eq!(bucket.len(), 1);
        assert!(bucket.contains_key(&(DAY + 10)));
        assert!(store.archive().exists(kept.handle).await.unwrap());
    }

    #[tokio::test]
    async fn test_rebuild_date_lists_repairs_missing_day() {
        let (_dir, db, store) = setup().await;
        store.write(EXPIRY, DAY, DAY + 10, &snapshot(1.0)).await.unwrap();
        store
            .write(EXPIRY, DAY + SECONDS_PER_DAY, DAY + SECONDS_PER_DAY + 10, &snapshot(1.0))
            .await
            .unwrap();

        // Simulate a writer that crashed between the bucket set and the dateList add
        sqlx::query("DELETE FROM oc_date_list WHERE expiry = ?1 AND day = ?2")
            .bind(EXPIRY)
            .bind(DAY)
            .execute(db.pool())
            .await
            .unwrap();
        assert!(!store.record(EXPIRY).await.unwrap().is_consistent());

        let report = store.rebuild_date_lists().await.unwrap();
        assert_eq!(report.days_added, 1);
        assert_eq!(report.empty_days, 0);
        assert!(store.record(EXPIRY).await.unwrap().is_consistent());

        let again = store.rebuild_date_lists().await.unwrap();
        assert_eq!(again.days_added, 0);
    }

    #[tokio::test]
    async fn test_strike_history() {
        let (_dir, _db, store) = setup().await;
        for (i, oi) in [10.0, 11.0, 12.5].iter().enumerate() {
            store.write(EXPIRY, DAY, DAY + i as i64 * 10, &snapshot(*oi)).await.unwrap();
        }

        let history = store.strike_history(EXPIRY, DAY, 18000.0, OptionSide::Call).await.unwrap();
        assert_eq!(history.strike, "18000");
        let series: Vec<Option<f64>> = history.samples.iter().map(|s| s.metrics.oi_percentage).collect();
        assert_eq!(series, vec![Some(10.0), Some(11.0), Some(12.5)]);

        let err = store.strike_history(EXPIRY, DAY, 18100.0, OptionSide::Put).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_expiry_summaries() {
        let (_dir, _db, store) = setup().await;
        store.write(EXPIRY, DAY, DAY + 10, &snapshot(1.0)).await.unwrap();
        store.write(EXPIRY, DAY, DAY + 20, &snapshot(1.0)).await.unwrap();
        store.write(EXPIRY + 604_800, DAY, DAY + 30, &snapshot(1.0)).await.unwrap();

        let summaries = store.expiry_summaries().await.unwrap();
        let expiries: Vec<Expiry> = summaries.iter().map(|s| s.expiry).collect();
        assert_eq!(expiries, vec![EXPIRY, EXPIRY + 604_800]);
        assert_eq!(summaries[0].days, 1);
        assert_eq!(summaries[0].samples, 2);
        assert_eq!(summaries[0].last_sample, Some(DAY + 20));
    }
}
