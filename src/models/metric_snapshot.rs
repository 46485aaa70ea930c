use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Tracked per-strike metrics, named exactly as the upstream names them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricName {
    #[serde(rename = "OI_percentage")]
    OiPercentage,
    #[serde(rename = "oichng_percentage")]
    OiChangePercentage,
    #[serde(rename = "vol_percentage")]
    VolumePercentage,
}

impl MetricName {
    pub const ALL: [MetricName; 3] = [
        MetricName::OiPercentage,
        MetricName::OiChangePercentage,
        MetricName::VolumePercentage,
    ];

    /// Parse a metric name, case-insensitively, as spelled in the upstream payload
    pub fn from_str(s: &str) -> Result<Self, String> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(MetricName::as_str).collect();
                format!("Invalid metric: '{}'. Valid values: {}", s, valid.join(", "))
            })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::OiPercentage => "OI_percentage",
            MetricName::OiChangePercentage => "oichng_percentage",
            MetricName::VolumePercentage => "vol_percentage",
        }
    }
}

/// The three tracked values for one strike and side. Missing values serialize as `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SideMetrics {
    #[serde(rename = "OI_percentage", default)]
    pub oi_percentage: Option<f64>,
    #[serde(default)]
    pub oichng_percentage: Option<f64>,
    #[serde(default)]
    pub vol_percentage: Option<f64>,
}

impl SideMetrics {
    pub fn get(&self, name: MetricName) -> Option<f64> {
        match name {
            MetricName::OiPercentage => self.oi_percentage,
            MetricName::OiChangePercentage => self.oichng_percentage,
            MetricName::VolumePercentage => self.vol_percentage,
        }
    }
}

/// One persisted sample: tracked metrics for every strike, split by side
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    #[serde(default)]
    pub ce_data: IndexMap<String, SideMetrics>,
    #[serde(default)]
    pub pe_data: IndexMap<String, SideMetrics>,
}

impl MetricSnapshot {
    pub fn strike_count(&self) -> usize {
        self.ce_data.len().max(self.pe_data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.ce_data.is_empty() && self.pe_data.is_empty()
    }
}
