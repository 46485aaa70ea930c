use crate::constants::{
    DEFAULT_MAX_BACKOFF_SECS, DEFAULT_POLL_INTERVAL_SECS, MAX_BACKOFF_EXPONENT, PAUSE_CHECK_INTERVAL_SECS,
};
use crate::models::Expiry;
use crate::services::trading_hours::MaintenanceWindow;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One contract series tracked by a polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedContract {
    /// Upstream security id of the underlying
    pub symbol: u64,
    /// Upstream exchange segment
    pub segment: u32,
    pub expiry: Expiry,
}

impl TrackedContract {
    pub fn new(symbol: u64, segment: u32, expiry: Expiry) -> Self {
        Self { symbol, segment, expiry }
    }

    /// Parse from "symbol:segment:expiry" (e.g. "13:0:1416076200")
    pub fn from_str(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 3 {
            return Err(format!(
                "Invalid contract '{}'. Expected symbol:segment:expiry",
                s
            ));
        }

        let symbol = parts[0]
            .parse::<u64>()
            .map_err(|_| format!("Invalid symbol '{}' in '{}'", parts[0], s))?;
        let segment = parts[1]
            .parse::<u32>()
            .map_err(|_| format!("Invalid segment '{}' in '{}'", parts[1], s))?;
        let expiry = parts[2]
            .parse::<Expiry>()
            .map_err(|_| format!("Invalid expiry '{}' in '{}'", parts[2], s))?;

        Ok(Self::new(symbol, segment, expiry))
    }

    /// Parse a comma-separated list of contracts
    pub fn parse_list(s: &str) -> Result<Vec<Self>, String> {
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Self::from_str)
            .collect()
    }
}

impl fmt::Display for TrackedContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.symbol, self.segment, self.expiry)
    }
}

/// Configuration for one polling loop
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub contract: TrackedContract,

    /// Sleep between two successful cycles
    pub interval: Duration,

    /// Ceiling for the error backoff
    pub max_backoff: Duration,

    /// Re-check cadence while inside the maintenance window
    pub pause_check_interval: Duration,

    pub maintenance_window: MaintenanceWindow,
}

impl PollConfig {
    pub fn new(contract: TrackedContract) -> Self {
        Self {
            contract,
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_backoff: Duration::from_secs(DEFAULT_MAX_BACKOFF_SECS),
            pause_check_interval: Duration::from_secs(PAUSE_CHECK_INTERVAL_SECS),
            maintenance_window: MaintenanceWindow::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    pub fn with_maintenance_window(mut self, window: MaintenanceWindow) -> Self {
        self.maintenance_window = window;
        self
    }

    /// Sleep after a cycle: `interval * 2^min(failures, 3)`, capped at `max_backoff`
    pub fn backoff_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return self.interval;
        }
        let exponent = consecutive_failures.min(MAX_BACKOFF_EXPONENT);
        self.interval
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff.max(self.interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_from_str() {
        let contract = TrackedContract::from_str("13:0:1416076200").unwrap();
        assert_eq!(contract, TrackedContract::new(13, 0, 1416076200));
        assert_eq!(contract.to_string(), "13:0:1416076200");

        assert!(TrackedContract::from_str("13:0").is_err());
        assert!(TrackedContract::from_str("abc:0:1").is_err());
        assert!(TrackedContract::from_str("13:0:soon").is_err());
    }

    #[test]
    fn test_contract_parse_list() {
        let contracts = TrackedContract::parse_list("13:0:1416076200, 25:0:1416680999,").unwrap();
        assert_eq!(contracts.len(), 2);
        assert_eq!(contracts[1].symbol, 25);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = PollConfig::new(TrackedContract::new(13, 0, 1));
        assert_eq!(config.backoff_delay(0), Duration::from_secs(10));
        assert_eq!(config.backoff_delay(1), Duration::from_secs(20));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(40));
        // 80s is capped at the 60s ceiling
        assert_eq!(config.backoff_delay(3), Duration::from_secs(60));
        assert_eq!(config.backoff_delay(12), Duration::from_secs(60));
    }

    #[test]
    fn test_backoff_without_cap_pressure() {
        let config = PollConfig::new(TrackedContract::new(13, 0, 1))
            .with_interval(Duration::from_secs(1))
            .with_max_backoff(Duration::from_secs(60));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(config.backoff_delay(9), Duration::from_secs(8));
    }
}
