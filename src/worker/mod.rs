pub mod snapshot_worker;

pub use snapshot_worker::{CycleOutcome, SnapshotWorker};

use crate::models::PollConfig;
use crate::services::{MarketDataFetcher, SharedHealthStats, SnapshotStore};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Start one snapshot worker per tracked contract on `runtime`
pub fn spawn_snapshot_workers(
    runtime: &Handle,
    configs: Vec<PollConfig>,
    fetcher: Arc<dyn MarketDataFetcher>,
    store: SnapshotStore,
    health_stats: SharedHealthStats,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    configs
        .into_iter()
        .map(|config| {
            let worker = SnapshotWorker::new(config, fetcher.clone(), store.clone(), health_stats.clone());
            runtime.spawn(worker.run(shutdown.clone()))
        })
        .collect()
}
