use crate::models::MetricSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Upstream expiry identifier, stored verbatim as the partition key
pub type Expiry = i64;

/// Midnight-UTC Unix timestamp of a calendar day
pub type TradingDay = i64;

/// Fetch instant, Unix seconds
pub type SampleTimestamp = i64;

pub const SECONDS_PER_DAY: i64 = 86_400;

/// Opaque reference to an immutable blob. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobHandle(pub i64);

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob:{}", self.0)
    }
}

/// Persisted index for one expiry. Field names are an external contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub expiry: Expiry,
    #[serde(rename = "dateList")]
    pub date_list: BTreeSet<TradingDay>,
    pub day: BTreeMap<TradingDay, BTreeMap<SampleTimestamp, BlobHandle>>,
}

impl SnapshotRecord {
    /// `dateList` and the keys of `day` hold the same set of days
    pub fn is_consistent(&self) -> bool {
        self.date_list.len() == self.day.len() && self.day.keys().all(|d| self.date_list.contains(d))
    }

    pub fn sample_count(&self) -> usize {
        self.day.values().map(|bucket| bucket.len()).sum()
    }
}

/// Result of reading one day of an expiry back, with blobs resolved
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayReadout {
    pub expiry: Expiry,
    #[serde(rename = "dateList")]
    pub date_list: BTreeSet<TradingDay>,
    pub day: BTreeMap<TradingDay, BTreeMap<SampleTimestamp, MetricSnapshot>>,
}

impl DayReadout {
    pub fn samples(&self, day: TradingDay) -> Option<&BTreeMap<SampleTimestamp, MetricSnapshot>> {
        self.day.get(&day)
    }
}

/// Floor a Unix timestamp to its midnight-UTC trading day
pub fn trading_day_of(timestamp: SampleTimestamp) -> TradingDay {
    timestamp.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY
}

/// (TradingDay, SampleTimestamp) for a wall-clock instant
pub fn bucket_for(now: DateTime<Utc>) -> (TradingDay, SampleTimestamp) {
    let ts = now.timestamp();
    (trading_day_of(ts), ts)
}
