//! Request-facing composition of the fetcher, the analytics engine and the store.
//!
//! Every operation validates its parameters first (`InvalidInput`), then
//! answers from a short-lived cache of live chains or from the snapshot store.

use crate::constants::{DEFAULT_SEGMENT, LIVE_CACHE_TTL_MS};
use crate::error::{AppError, Result};
use crate::models::{
    trading_day_of, DayReadout, Expiry, MetricName, OptionChainPayload, OptionSide, ReversalReport, SideMetrics,
    TradingDay,
};
use crate::services::analytics::{self, AnalyticsEngine, FutureQuote};
use crate::services::snapshot_store::{SnapshotStore, StrikeHistory};
use crate::services::upstream::MarketDataFetcher;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Raw lookup parameters as they arrive from a query string or a stream request.
///
/// Values are kept as text (numbers are accepted too) and validated per operation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LookupParams {
    #[serde(default, alias = "sid", deserialize_with = "text")]
    pub symbol: Option<String>,
    #[serde(default, alias = "seg", deserialize_with = "text")]
    pub segment: Option<String>,
    #[serde(default, alias = "exp", alias = "exp_sid", deserialize_with = "text")]
    pub expiry: Option<String>,
    #[serde(default, deserialize_with = "text")]
    pub strike: Option<String>,
    #[serde(default, rename = "type", alias = "side", deserialize_with = "text")]
    pub option_type: Option<String>,
    #[serde(default, alias = "day", deserialize_with = "text")]
    pub date: Option<String>,
    /// Tracked metric for percentage lookups; `OI_percentage` when absent
    #[serde(default, deserialize_with = "text")]
    pub metric: Option<String>,
}

fn text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

impl LookupParams {
    fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::InvalidInput(format!("Missing required parameter: {}", name)))
    }

    pub fn symbol(&self) -> Result<u64> {
        let raw = Self::required(&self.symbol, "symbol")?;
        raw.parse()
            .map_err(|_| AppError::InvalidInput(format!("Invalid symbol '{}': expected a numeric security id", raw)))
    }

    pub fn segment(&self, default: u32) -> Result<u32> {
        match self.segment.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| AppError::InvalidInput(format!("Invalid segment '{}'", raw))),
        }
    }

    pub fn expiry(&self) -> Result<Expiry> {
        let raw = Self::required(&self.expiry, "expiry")?;
        raw.parse()
            .map_err(|_| AppError::InvalidInput(format!("Invalid expiry '{}': expected an integer id", raw)))
    }

    pub fn strike(&self) -> Result<f64> {
        let raw = Self::required(&self.strike, "strike")?;
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v > 0.0)
            .ok_or_else(|| AppError::InvalidInput(format!("Invalid strike '{}'", raw)))
    }

    pub fn side(&self) -> Result<OptionSide> {
        let raw = Self::required(&self.option_type, "type")?;
        OptionSide::from_str(raw).map_err(AppError::InvalidInput)
    }

    pub fn metric(&self) -> Result<MetricName> {
        match self.metric.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(MetricName::OiPercentage),
            Some(raw) => MetricName::from_str(raw).map_err(AppError::InvalidInput),
        }
    }

    pub fn optional_side(&self) -> Result<Option<OptionSide>> {
        match self.option_type.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            None => Ok(None),
            Some(raw) => OptionSide::from_str(raw).map(Some).map_err(AppError::InvalidInput),
        }
    }

    /// Trading day from either `YYYY-MM-DD` or a Unix timestamp (floored to midnight UTC)
    pub fn trading_day(&self) -> Result<TradingDay> {
        let raw = Self::required(&self.date, "date")?;
        if let Ok(ts) = raw.parse::<i64>() {
            return Ok(trading_day_of(ts));
        }
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            AppError::InvalidInput(format!("Invalid date '{}': expected YYYY-MM-DD or a Unix timestamp", raw))
        })?;
        date.and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .ok_or_else(|| AppError::InvalidInput(format!("Invalid date '{}'", raw)))
    }
}

/// Live chain with reversals attached, as served to API and stream clients
#[derive(Debug, Clone, Serialize)]
pub struct LiveChain {
    pub symbol: u64,
    pub segment: u32,
    pub expiry: Expiry,
    pub timestamp: i64,
    pub future: Option<FutureQuote>,
    pub reversal_summary: ReversalReport,
    #[serde(flatten)]
    pub chain: OptionChainPayload,
}

/// Delta of one leg, or both legs when no side was requested
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DeltaAnswer {
    Single(f64),
    Both { ce: Option<f64>, pe: Option<f64> },
}

struct CachedChain {
    fetched_at: Instant,
    chain: Arc<OptionChainPayload>,
}

type ChainKey = (u64, u32, Expiry);

pub struct QueryService {
    fetcher: Arc<dyn MarketDataFetcher>,
    store: SnapshotStore,
    analytics: AnalyticsEngine,
    cache: RwLock<HashMap<ChainKey, CachedChain>>,
    cache_ttl: Duration,
    default_segment: u32,
}

pub type SharedQueryService = Arc<QueryService>;

impl QueryService {
    pub fn new(fetcher: Arc<dyn MarketDataFetcher>, store: SnapshotStore, analytics: AnalyticsEngine) -> Self {
        Self {
            fetcher,
            store,
            analytics,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: Duration::from_millis(LIVE_CACHE_TTL_MS),
            default_segment: DEFAULT_SEGMENT,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_default_segment(mut self, segment: u32) -> Self {
        self.default_segment = segment;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Live chain through the TTL cache
    async fn chain(&self, symbol: u64, segment: u32, expiry: Expiry) -> Result<Arc<OptionChainPayload>> {
        let key = (symbol, segment, expiry);

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&key) {
                if cached.fetched_at.elapsed() < self.cache_ttl {
                    return Ok(cached.chain.clone());
                }
            }
        }

        debug!(symbol, segment, expiry, "Fetching live chain");
        let chain = Arc::new(self.fetcher.fetch(symbol, segment, expiry).await?);

        let mut cache = self.cache.write().await;
        let ttl = self.cache_ttl;
        cache.retain(|_, cached| cached.fetched_at.elapsed() < ttl);
        cache.insert(
            key,
            CachedChain {
                fetched_at: Instant::now(),
                chain: chain.clone(),
            },
        );

        Ok(chain)
    }

    async fn chain_for(&self, params: &LookupParams) -> Result<Arc<OptionChainPayload>> {
        let symbol = params.symbol()?;
        let segment = params.segment(self.default_segment)?;
        let expiry = params.expiry()?;
        self.chain(symbol, segment, expiry).await
    }

    pub async fn expiry_dates(&self, params: &LookupParams) -> Result<Vec<Expiry>> {
        let symbol = params.symbol()?;
        let segment = params.segment(self.default_segment)?;
        self.fetcher.fetch_expiries(symbol, segment).await
    }

    pub async fn live_chain(&self, params: &LookupParams) -> Result<LiveChain> {
        self.live_chain_at(params, Utc::now()).await
    }

    pub async fn live_chain_at(&self, params: &LookupParams, now: DateTime<Utc>) -> Result<LiveChain> {
        let symbol = params.symbol()?;
        let segment = params.segment(self.default_segment)?;
        let expiry = params.expiry()?;

        let mut chain = (*self.chain(symbol, segment, expiry).await?).clone();
        let reversal_summary = self.analytics.compute_reversal(&mut chain, expiry, now);
        let future = analytics::get_future(&chain).ok();

        Ok(LiveChain {
            symbol,
            segment,
            expiry,
            timestamp: now.timestamp(),
            future,
            reversal_summary,
            chain,
        })
    }

    pub async fn percentage(&self, params: &LookupParams) -> Result<f64> {
        let (strike, side, metric) = (params.strike()?, params.side()?, params.metric()?);
        let chain = self.chain_for(params).await?;
        match metric {
            MetricName::OiPercentage => analytics::get_percentage(&chain, strike, side),
            other => analytics::get_metric(&chain, strike, side, other),
        }
    }

    /// Every tracked metric of one leg; absent values stay null
    pub async fn percentage_metrics(&self, params: &LookupParams) -> Result<SideMetrics> {
        let (strike, side) = (params.strike()?, params.side()?);
        let chain = self.chain_for(params).await?;
        analytics::get_percentage_metrics(&chain, strike, side)
    }

    pub async fn iv(&self, params: &LookupParams) -> Result<f64> {
        let (strike, side) = (params.strike()?, params.side()?);
        let chain = self.chain_for(params).await?;
        analytics::get_iv(&chain, strike, side)
    }

    pub async fn delta(&self, params: &LookupParams) -> Result<DeltaAnswer> {
        let strike = params.strike()?;
        let side = params.optional_side()?;
        let chain = self.chain_for(params).await?;

        match side {
            Some(side) => analytics::get_delta(&chain, strike, side).map(DeltaAnswer::Single),
            None => {
                if chain.strike_entry(strike).is_none() {
                    return Err(AppError::not_found(format!("Strike {} not found in option chain", strike)));
                }
                Ok(DeltaAnswer::Both {
                    ce: analytics::get_delta(&chain, strike, OptionSide::Call).ok(),
                    pe: analytics::get_delta(&chain, strike, OptionSide::Put).ok(),
                })
            }
        }
    }

    pub async fn future(&self, params: &LookupParams) -> Result<FutureQuote> {
        let chain = self.chain_for(params).await?;
        analytics::get_future(&chain)
    }

    pub async fn history(&self, params: &LookupParams) -> Result<DayReadout> {
        let expiry = params.expiry()?;
        let day = params.trading_day()?;
        self.store.read(expiry, day).await
    }

    pub async fn strike_history(&self, params: &LookupParams) -> Result<StrikeHistory> {
        let expiry = params.expiry()?;
        let day = params.trading_day()?;
        let strike = params.strike()?;
        let side = params.side()?;
        self.store.strike_history(expiry, day, strike, side).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricSnapshot, SideMetrics};
    use crate::services::database::SnapshotDatabase;
    use crate::services::upstream::testing::ScriptedFetcher;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn raw_chain() -> Value {
        json!({
            "data": {
                "sltp": 18040.0,
                "oc": {
                    "18000": {
                        "ce": { "iv": 13.8, "ltp": 150.0, "OI_percentage": 8.25, "optgeeks": { "delta": 0.55 } },
                        "pe": { "iv": 14.1, "ltp": 108.0, "OI_percentage": 6.5 }
                    }
                }
            }
        })
    }

    fn params(pairs: &[(&str, &str)]) -> LookupParams {
        let value: serde_json::Map<String, Value> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        serde_json::from_value(Value::Object(value)).unwrap()
    }

    async fn setup(fetcher: ScriptedFetcher) -> (TempDir, Arc<ScriptedFetcher>, QueryService) {
        let temp_dir = tempdir().unwrap();
        let db = SnapshotDatabase::new(temp_dir.path().join("query.db")).await.unwrap();
        let fetcher = Arc::new(fetcher);
        let service = QueryService::new(fetcher.clone(), SnapshotStore::new(&db), AnalyticsEngine::default());
        (temp_dir, fetcher, service)
    }

    #[test]
    fn test_param_validation() {
        let p = params(&[("sid", "13"), ("exp", "1416076200"), ("strike", "18000"), ("type", "ce")]);
        assert_eq!(p.symbol().unwrap(), 13);
        assert_eq!(p.segment(0).unwrap(), 0);
        assert_eq!(p.expiry().unwrap(), 1416076200);
        assert_eq!(p.strike().unwrap(), 18000.0);
        assert_eq!(p.side().unwrap(), OptionSide::Call);

        let missing = params(&[("symbol", "13")]);
        assert!(matches!(missing.expiry(), Err(AppError::InvalidInput(_))));
        assert!(matches!(missing.optional_side(), Ok(None)));

        let bad = params(&[("symbol", "NIFTY"), ("strike", "-5"), ("type", "FUT")]);
        assert!(matches!(bad.symbol(), Err(AppError::InvalidInput(_))));
        assert!(matches!(bad.strike(), Err(AppError::InvalidInput(_))));
        assert!(matches!(bad.side(), Err(AppError::InvalidInput(_))));
    }

    #[test]
    fn test_trading_day_formats() {
        let by_date = params(&[("date", "2024-11-08")]);
        assert_eq!(by_date.trading_day().unwrap(), 1_731_024_000);

        let by_ts = params(&[("date", "1731057300")]);
        assert_eq!(by_ts.trading_day().unwrap(), 1_731_024_000);

        assert!(params(&[("date", "08/11/2024")]).trading_day().is_err());
    }

    #[test]
    fn test_params_accept_numbers() {
        let p: LookupParams =
            serde_json::from_value(json!({ "action": "start_streaming", "sid": 13, "exp_sid": 1416076200, "seg": null }))
                .unwrap();
        assert_eq!(p.symbol().unwrap(), 13);
        assert_eq!(p.expiry().unwrap(), 1416076200);
        assert_eq!(p.segment(2).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_point_lookups_share_cached_chain() {
        let (_dir, fetcher, service) = setup(ScriptedFetcher::repeating(raw_chain())).await;
        let p = params(&[("symbol", "13"), ("expiry", "1416076200"), ("strike", "18000"), ("type", "PE")]);

        assert_eq!(service.percentage(&p).await.unwrap(), 6.5);
        assert_eq!(service.iv(&p).await.unwrap(), 14.1);
        assert_eq!(fetcher.call_count(), 1);

        // PE has no upstream delta
        assert!(matches!(service.delta(&p).await, Err(AppError::NotFound { .. })));

        let both = params(&[("symbol", "13"), ("expiry", "1416076200"), ("strike", "18000")]);
        assert_eq!(
            service.delta(&both).await.unwrap(),
            DeltaAnswer::Both { ce: Some(0.55), pe: None }
        );

        let future = service.future(&both).await.unwrap();
        assert_eq!(future.future, 18042.0);
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_percentage_metric_selection() {
        let (_dir, fetcher, service) = setup(ScriptedFetcher::repeating(raw_chain())).await;
        let base = [("symbol", "13"), ("expiry", "1416076200"), ("strike", "18000"), ("type", "CE")];

        let mut chosen = base.to_vec();
        chosen.push(("metric", "oi_percentage"));
        assert_eq!(service.percentage(&params(&chosen)).await.unwrap(), 8.25);

        let mut absent = base.to_vec();
        absent.push(("metric", "vol_percentage"));
        assert!(matches!(service.percentage(&params(&absent)).await, Err(AppError::NotFound { .. })));

        let mut unknown = base.to_vec();
        unknown.push(("metric", "gamma"));
        assert!(matches!(service.percentage(&params(&unknown)).await, Err(AppError::InvalidInput(_))));

        let all = service.percentage_metrics(&params(&base)).await.unwrap();
        assert_eq!(
            all,
            SideMetrics { oi_percentage: Some(8.25), oichng_percentage: None, vol_percentage: None }
        );
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_cache_expires() {
        let (_dir, fetcher, service) = setup(ScriptedFetcher::repeating(raw_chain())).await;
        let service = service.with_cache_ttl(Duration::ZERO);
        let p = params(&[("symbol", "13"), ("expiry", "1416076200"), ("strike", "18000"), ("type", "CE")]);

        service.iv(&p).await.unwrap();
        service.iv(&p).await.unwrap();
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_upstream() {
        let (_dir, fetcher, service) = setup(ScriptedFetcher::repeating(raw_chain())).await;
        let p = params(&[("symbol", "13"), ("expiry", "1416076200"), ("strike", "abc"), ("type", "CE")]);

        assert!(matches!(service.iv(&p).await, Err(AppError::InvalidInput(_))));
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_upstream_failure_is_reported() {
        let fetcher = ScriptedFetcher::new(vec![Err(AppError::UpstreamUnavailable("timeout".into()))]);
        let (_dir, _fetcher, service) = setup(fetcher).await;
        let p = params(&[("symbol", "13"), ("expiry", "1416076200")]);

        let err = service.live_chain(&p).await.unwrap_err();
        assert_eq!(err.status_code(), 502);
    }

    #[tokio::test]
    async fn test_live_chain_carries_reversals() {
        let (_dir, _fetcher, service) = setup(ScriptedFetcher::repeating(raw_chain())).await;
        let p = params(&[("sid", "13"), ("exp_sid", "1416076200")]);
        let now = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 11, 8, 18, 30, 0).unwrap();

        let live = service.live_chain_at(&p, now).await.unwrap();
        assert_eq!(live.reversal_summary.computed, 1);
        assert!((live.reversal_summary.days_to_expiry - 6.0).abs() < 1e-9);

        let json = serde_json::to_value(&live).unwrap();
        assert!(json["data"]["oc"]["18000"]["reversal"]["reversal"].is_number());
        assert_eq!(json["future"]["future"], 18042.0);
        assert_eq!(json["expiry"], 1416076200);
    }

    #[tokio::test]
    async fn test_history_from_store() {
        let (_dir, _fetcher, service) = setup(ScriptedFetcher::new(Vec::new())).await;
        let mut snapshot = MetricSnapshot::default();
        snapshot.ce_data.insert("18000".into(), SideMetrics { oi_percentage: Some(1.0), ..Default::default() });
        service
            .store()
            .write(1416076200, 1_731_024_000, 1_731_057_300, &snapshot)
            .await
            .unwrap();

        let p = params(&[("expiry", "1416076200"), ("date", "2024-11-08")]);
        let readout = service.history(&p).await.unwrap();
        assert_eq!(readout.samples(1_731_024_000).unwrap().len(), 1);

        let other_day = params(&[("expiry", "1416076200"), ("date", "2024-11-07")]);
        match service.history(&other_day).await.unwrap_err() {
            AppError::NotFound { available_days, .. } => assert_eq!(available_days, vec![1_731_024_000]),
            other => panic!("expected NotFound, got {:?}", other),
        }

        let series = params(&[("expiry", "1416076200"), ("date", "2024-11-08"), ("strike", "18000"), ("type", "CE")]);
        let history = service.strike_history(&series).await.unwrap();
        assert_eq!(history.samples.len(), 1);
    }
}
