use crate::error::Result;
use crate::models::{bucket_for, PollConfig, SampleTimestamp, TradingDay};
use crate::services::trading_hours::get_pause_interval;
use crate::services::{
    metric_extractor, MarketDataFetcher, SchedulerState, SharedHealthStats, SnapshotStore, WorkerStats, WriteOutcome,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Result of one scheduler cycle. Failures never leave the cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Persisted(WriteOutcome),
    /// Fetch, decode or persist failed; nothing was written to the index
    Skipped(String),
    /// Inside the maintenance window, no fetch attempted
    Paused,
}

/// Fetch → extract → persist loop for one tracked contract
pub struct SnapshotWorker {
    config: PollConfig,
    fetcher: Arc<dyn MarketDataFetcher>,
    store: SnapshotStore,
    health_stats: SharedHealthStats,
    stats: WorkerStats,
}

impl SnapshotWorker {
    pub fn new(
        config: PollConfig,
        fetcher: Arc<dyn MarketDataFetcher>,
        store: SnapshotStore,
        health_stats: SharedHealthStats,
    ) -> Self {
        Self {
            config,
            fetcher,
            store,
            health_stats,
            stats: WorkerStats::default(),
        }
    }

    pub fn stats(&self) -> &WorkerStats {
        &self.stats
    }

    async fn set_state(&mut self, state: SchedulerState) {
        self.stats.state = state;
        let mut health = self.health_stats.write().await;
        health
            .workers
            .insert(self.config.contract.to_string(), self.stats.clone());
    }

    /// Run a single cycle at `now`
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        if self.config.maintenance_window.contains(now) {
            if self.stats.state != SchedulerState::Paused {
                info!(window = %self.config.maintenance_window, "Snapshot worker: Entering maintenance window");
            }
            self.set_state(SchedulerState::Paused).await;
            return CycleOutcome::Paused;
        }

        self.stats.iteration_count += 1;
        let (day, timestamp) = bucket_for(now);

        let outcome = match self.fetch_and_persist(day, timestamp).await {
            Ok(written) => {
                self.stats.successful_cycles += 1;
                self.stats.consecutive_failures = 0;
                self.stats.last_success = Some(now.to_rfc3339());
                debug!(
                    iteration = self.stats.iteration_count,
                    day,
                    timestamp,
                    handle = %written.handle,
                    new_day = written.new_day,
                    "Snapshot worker: Sample persisted"
                );
                CycleOutcome::Persisted(written)
            }
            Err(e) => {
                self.stats.failed_cycles += 1;
                self.stats.consecutive_failures = self.stats.consecutive_failures.saturating_add(1);
                self.stats.last_error = Some(e.to_string());
                if e.is_upstream() {
                    warn!(
                        iteration = self.stats.iteration_count,
                        consecutive_failures = self.stats.consecutive_failures,
                        error = %e,
                        "Snapshot worker: Upstream failed, skipping cycle"
                    );
                } else {
                    error!(
                        iteration = self.stats.iteration_count,
                        consecutive_failures = self.stats.consecutive_failures,
                        error = %e,
                        "Snapshot worker: Cycle failed"
                    );
                }
                CycleOutcome::Skipped(e.to_string())
            }
        };

        self.set_state(SchedulerState::Idle).await;
        outcome
    }

    async fn fetch_and_persist(&mut self, day: TradingDay, timestamp: SampleTimestamp) -> Result<WriteOutcome> {
        let contract = self.config.contract;

        self.set_state(SchedulerState::Fetching).await;
        let payload = self
            .fetcher
            .fetch(contract.symbol, contract.segment, contract.expiry)
            .await?;

        self.set_state(SchedulerState::Extracting).await;
        let snapshot = metric_extractor::extract(&payload);
        if snapshot.is_empty() {
            warn!(expiry = contract.expiry, "Snapshot worker: Upstream chain has no strikes");
        } else {
            debug!(strikes = snapshot.strike_count(), "Snapshot worker: Extracted metrics");
        }

        self.set_state(SchedulerState::Persisting).await;
        self.store
            .write(contract.expiry, day, timestamp, &snapshot)
            .await
    }

    /// Poll until `shutdown` flips to true (or its sender goes away).
    ///
    /// Shutdown interrupts both the sleep and an in-flight cycle.
    #[instrument(skip_all, fields(contract = %self.config.contract))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            max_backoff_secs = self.config.max_backoff.as_secs_f64(),
            window = %self.config.maintenance_window,
            "Starting snapshot worker"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let loop_start = std::time::Instant::now();
            let now = Utc::now();

            let outcome = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                outcome = self.run_cycle(now) => outcome,
            };

            let delay = match outcome {
                CycleOutcome::Paused => {
                    get_pause_interval(&self.config.maintenance_window, now, self.config.pause_check_interval)
                }
                _ => {
                    self.set_state(SchedulerState::Sleeping).await;
                    self.config.backoff_delay(self.stats.consecutive_failures)
                }
            };

            if !matches!(outcome, CycleOutcome::Paused) {
                info!(
                    iteration = self.stats.iteration_count,
                    persisted = matches!(outcome, CycleOutcome::Persisted(_)),
                    consecutive_failures = self.stats.consecutive_failures,
                    loop_duration_secs = loop_start.elapsed().as_secs_f64(),
                    next_cycle_secs = delay.as_secs_f64(),
                    "Snapshot worker: Iteration completed"
                );
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = sleep(delay) => {}
            }
        }

        self.set_state(SchedulerState::Stopped).await;
        info!(
            iterations = self.stats.iteration_count,
            "Snapshot worker stopped"
        );
    }
}
