use crate::constants::UPSTREAM_TIMEOUT_SECS;
use crate::error::{AppError, Result};
use crate::models::{value_as_f64, Expiry, OptionChainPayload};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

/// Source of live option-chain snapshots
#[async_trait]
pub trait MarketDataFetcher: Send + Sync {
    /// Fetch the full chain of one contract series.
    ///
    /// Fails with `UpstreamUnavailable` on transport errors and with
    /// `MalformedPayload` when the answer lacks `data.oc`.
    async fn fetch(&self, symbol: u64, segment: u32, expiry: Expiry) -> Result<OptionChainPayload>;

    /// Expiries currently listed for an underlying
    async fn fetch_expiries(&self, symbol: u64, segment: u32) -> Result<Vec<Expiry>>;
}

/// HTTP client for the upstream option-chain endpoints
pub struct HttpFetcher {
    chain_url: String,
    expiry_list_url: String,
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(chain_url: String, expiry_list_url: String) -> Result<Self> {
        let chain_url = chain_url.trim().to_string();
        let expiry_list_url = expiry_list_url.trim().to_string();

        for url in [&chain_url, &expiry_list_url] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(AppError::Config(format!(
                    "Invalid upstream url: must start with http:// or https://, got: '{}'",
                    url
                )));
            }
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPSTREAM_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            chain_url,
            expiry_list_url,
            client,
        })
    }

    async fn post_json(&self, url: &str, body: Value) -> Result<Value> {
        debug!("POST {} {}", url, body);

        let response = self
            .client
            .post(url)
            .header("Accept", "application/json, text/plain, */*")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let error_msg = format!("Upstream request failed: {} (url: {})", e, url);
                error!("{}", error_msg);
                AppError::UpstreamUnavailable(error_msg)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            return Err(AppError::UpstreamUnavailable(format!(
                "Upstream returned error status {}: {}",
                status, body
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("Failed to read response body: {}", e)))?;

        serde_json::from_str(&text)
            .map_err(|e| AppError::MalformedPayload(format!("Response is not JSON: {}", e)))
    }
}

#[async_trait]
impl MarketDataFetcher for HttpFetcher {
    async fn fetch(&self, symbol: u64, segment: u32, expiry: Expiry) -> Result<OptionChainPayload> {
        let body = json!({ "Data": { "Seg": segment, "Sid": symbol, "Exp": expiry } });
        let raw = self.post_json(&self.chain_url, body).await?;
        OptionChainPayload::from_upstream(raw)
    }

    async fn fetch_expiries(&self, symbol: u64, segment: u32) -> Result<Vec<Expiry>> {
        let body = json!({ "Data": { "Seg": segment, "Sid": symbol } });
        let raw = self.post_json(&self.expiry_list_url, body).await?;
        parse_expiry_list(&raw)
    }
}

/// Extract the expiry ids from an expiry-list answer.
///
/// Accepts `data.explist` as well as the nested `data.fut.data.explist` shape.
pub fn parse_expiry_list(raw: &Value) -> Result<Vec<Expiry>> {
    let envelope = match raw {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    };

    let list = envelope
        .pointer("/data/explist")
        .or_else(|| envelope.pointer("/data/fut/data/explist"))
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::MalformedPayload("missing 'data.explist'".to_string()))?;

    let mut expiries: Vec<Expiry> = list
        .iter()
        .filter_map(value_as_f64)
        .map(|v| v as Expiry)
        .collect();
    expiries.sort_unstable();
    expiries.dedup();
    Ok(expiries)
}
