//! Typed model of the upstream option-chain response.
//!
//! The upstream payload is only partially populated: strikes can lack a CE or
//! PE leg, legs can lack any field, and numbers sometimes arrive as strings.
//! Every field here is optional and defaults on absence; unknown fields are
//! preserved in `extra` so the live chain can be passed through unchanged.

use crate::error::{AppError, Result};
use crate::models::{OptionSide, ReversalResult};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Tolerance used when matching a numeric strike against the string keys of `data.oc`
pub const STRIKE_EPSILON: f64 = 1e-6;

/// Full upstream response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionChainPayload {
    pub data: OptionChainData,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptionChainData {
    /// Strike-wise chain, in upstream order. Keys look like "18000" or "18000.000000".
    #[serde(default, deserialize_with = "lenient_strikes")]
    pub oc: IndexMap<String, StrikeEntry>,

    /// Last traded price of the underlying
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub sltp: Option<f64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Call and put legs at one strike
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrikeEntry {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub ce: Option<SideQuote>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub pe: Option<SideQuote>,

    /// Attached by the analytics engine; null when it could not be computed
    #[serde(default, deserialize_with = "lenient")]
    pub reversal: Option<ReversalResult>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One leg (CE or PE) of a strike
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SideQuote {
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub iv: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub ltp: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub oi: Option<f64>,

    #[serde(
        rename = "OI_percentage",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub oi_percentage: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub oichng_percentage: Option<f64>,

    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub vol_percentage: Option<f64>,

    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub optgeeks: Option<Greeks>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SideQuote {
    pub fn delta(&self) -> Option<f64> {
        self.optgeeks.as_ref().and_then(|g| g.delta)
    }
}

/// Pricing-model sensitivities reported by the upstream
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Greeks {
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub theta: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub vega: Option<f64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StrikeEntry {
    pub fn side(&self, side: OptionSide) -> Option<&SideQuote> {
        match side {
            OptionSide::Call => self.ce.as_ref(),
            OptionSide::Put => self.pe.as_ref(),
        }
    }
}

impl OptionChainPayload {
    /// Validate and decode a raw upstream response.
    ///
    /// The upstream answers either with the envelope itself or with an array
    /// whose first element is the envelope. Anything without `data.oc` is malformed.
    pub fn from_upstream(raw: Value) -> Result<Self> {
        let envelope = match raw {
            Value::Array(mut items) => {
                if items.is_empty() {
                    return Err(AppError::MalformedPayload("empty response array".to_string()));
                }
                items.swap_remove(0)
            }
            other => other,
        };

        let data = envelope
            .get("data")
            .ok_or_else(|| AppError::MalformedPayload("missing 'data'".to_string()))?;
        match data.get("oc") {
            Some(Value::Object(_)) => {}
            Some(_) => return Err(AppError::MalformedPayload("'data.oc' is not an object".to_string())),
            None => return Err(AppError::MalformedPayload("missing 'data.oc'".to_string())),
        }

        serde_json::from_value(envelope)
            .map_err(|e| AppError::MalformedPayload(format!("undecodable option chain: {}", e)))
    }

    /// Spot / last price of the underlying
    pub fn spot(&self) -> Option<f64> {
        self.data.sltp
    }

    /// Strike keys with their numeric value, in upstream order. Unparseable keys are dropped.
    pub fn strikes(&self) -> Vec<(String, f64)> {
        self.data
            .oc
            .keys()
            .filter_map(|key| parse_strike(key).map(|strike| (key.clone(), strike)))
            .collect()
    }

    /// Look up a strike by numeric value, tolerating "18000" vs "18000.000000" key spellings
    pub fn strike_entry(&self, strike: f64) -> Option<(&String, &StrikeEntry)> {
        self.data
            .oc
            .iter()
            .find(|(key, _)| parse_strike(key).is_some_and(|k| (k - strike).abs() < STRIKE_EPSILON))
    }

    pub fn strike_entry_mut(&mut self, strike: f64) -> Option<&mut StrikeEntry> {
        self.data
            .oc
            .iter_mut()
            .find(|(key, _)| parse_strike(key).is_some_and(|k| (k - strike).abs() < STRIKE_EPSILON))
            .map(|(_, entry)| entry)
    }
}

pub fn parse_strike(key: &str) -> Option<f64> {
    key.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Read a JSON number or numeric string as f64
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_f64))
}

/// Decode a nested object, treating anything of the wrong shape as absent
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Decode `data.oc` entry by entry. A strike whose value is not a usable
/// object keeps its key with empty legs instead of failing the whole chain.
fn lenient_strikes<'de, D>(deserializer: D) -> std::result::Result<IndexMap<String, StrikeEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<IndexMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let entry = match value {
                Value::Object(_) => serde_json::from_value::<StrikeEntry>(value).unwrap_or_else(|e| {
                    tracing::debug!(strike = %key, error = %e, "Undecodable strike entry, using empty legs");
                    StrikeEntry::default()
                }),
                other => {
                    tracing::debug!(strike = %key, kind = value_kind(&other), "Non-object strike entry, using empty legs");
                    StrikeEntry::default()
                }
            };
            (key, entry)
        })
        .collect())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
