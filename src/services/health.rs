use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Lifecycle state of one polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Fetching,
    Extracting,
    Persisting,
    Sleeping,
    /// Inside the maintenance window, not fetching
    Paused,
    Stopped,
}

/// Published by each polling loop after every state change
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub state: SchedulerState,
    pub iteration_count: u64,
    pub successful_cycles: u64,
    pub failed_cycles: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<String>,
    pub last_error: Option<String>,
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            iteration_count: 0,
            successful_cycles: 0,
            failed_cycles: 0,
            consecutive_failures: 0,
            last_success: None,
            last_error: None,
        }
    }
}

/// Health snapshot served at `/health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthStats {
    /// Keyed by tracked contract ("symbol:segment:expiry")
    pub workers: BTreeMap<String, WorkerStats>,

    // Maintenance window info
    pub in_maintenance_window: bool,
    pub maintenance_window: String,

    pub active_streams: usize,

    // System info
    pub uptime_secs: u64,
    pub current_system_time: String,
}

impl Default for HealthStats {
    fn default() -> Self {
        Self {
            workers: BTreeMap::new(),
            in_maintenance_window: false,
            maintenance_window: String::new(),
            active_streams: 0,
            uptime_secs: 0,
            current_system_time: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub type SharedHealthStats = Arc<RwLock<HealthStats>>;

pub fn new_shared_health_stats() -> SharedHealthStats {
    Arc::new(RwLock::new(HealthStats::default()))
}
