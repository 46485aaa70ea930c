//! Per-client live push streams.
//!
//! Each connected client owns at most one stream. The registry maps a client id
//! to the stop signal and generation of its current stream; the stream loop
//! itself runs as its own task and pushes events into the connection's channel.

use crate::services::query_service::{LiveChain, LookupParams, SharedQueryService};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, info, instrument};

pub type ClientId = String;

/// Lifecycle notifications sent to a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Connected,
    StreamingStarted,
    StreamingStopped,
}

/// One message pushed to a client: `{"event": ..., "data": ...}`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    LiveData(Box<LiveChain>),
    LiveDataError { error: String },
    Status { status: StreamStatus, client_id: ClientId },
}

struct StreamHandle {
    generation: u64,
    stop: watch::Sender<bool>,
}

/// Active streams keyed by client
#[derive(Default)]
pub struct StreamRegistry {
    streams: RwLock<HashMap<ClientId, StreamHandle>>,
    next_generation: AtomicU64,
}

pub type SharedStreamRegistry = Arc<StreamRegistry>;

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new stream for `client_id`, stopping any stream it already had.
    ///
    /// Returns the generation of the new stream and its stop receiver.
    pub async fn start(&self, client_id: &str) -> (u64, watch::Receiver<bool>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (stop, stop_rx) = watch::channel(false);

        let previous = self
            .streams
            .write()
            .await
            .insert(client_id.to_string(), StreamHandle { generation, stop });

        if let Some(previous) = previous {
            debug!(client_id, old = previous.generation, new = generation, "Replacing stream");
            let _ = previous.stop.send(true);
        }

        (generation, stop_rx)
    }

    /// Stop and forget the client's stream. Returns whether one was active.
    pub async fn stop(&self, client_id: &str) -> bool {
        match self.streams.write().await.remove(client_id) {
            Some(handle) => {
                let _ = handle.stop.send(true);
                true
            }
            None => false,
        }
    }

    /// Called by a stream loop on exit: drops the entry only if it still belongs to that loop
    pub async fn finish(&self, client_id: &str, generation: u64) {
        let mut streams = self.streams.write().await;
        if streams.get(client_id).is_some_and(|h| h.generation == generation) {
            streams.remove(client_id);
        }
    }

    pub async fn is_active(&self, client_id: &str) -> bool {
        self.streams.read().await.contains_key(client_id)
    }

    pub async fn len(&self) -> usize {
        self.streams.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.streams.read().await.is_empty()
    }
}

/// Everything one stream loop needs
pub struct StreamTask {
    pub registry: SharedStreamRegistry,
    pub query: SharedQueryService,
    pub client_id: ClientId,
    pub generation: u64,
    pub params: LookupParams,
    pub interval: Duration,
    pub stop: watch::Receiver<bool>,
    pub events: mpsc::Sender<StreamEvent>,
}

/// Push a live chain every `interval` until stopped or the client goes away.
///
/// A failed cycle is reported as `live_data_error` and the stream carries on.
#[instrument(skip_all, fields(client_id = %task.client_id, generation = task.generation))]
pub async fn run_stream(task: StreamTask) {
    let StreamTask {
        registry,
        query,
        client_id,
        generation,
        params,
        interval,
        mut stop,
        events,
    } = task;

    info!("Stream started");
    let mut iteration: u64 = 0;

    loop {
        if *stop.borrow() {
            break;
        }
        iteration += 1;

        let event = tokio::select! {
            biased;
            _ = stop.changed() => break,
            result = query.live_chain(&params) => match result {
                Ok(live) => StreamEvent::LiveData(Box::new(live)),
                Err(e) => {
                    debug!(iteration, error = %e, "Stream cycle failed");
                    StreamEvent::LiveDataError { error: e.to_string() }
                }
            },
        };

        if *stop.borrow() || events.send(event).await.is_err() {
            break;
        }

        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    registry.finish(&client_id, generation).await;
    info!(iterations = iteration, "Stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::services::analytics::AnalyticsEngine;
    use crate::services::database::SnapshotDatabase;
    use crate::services::query_service::QueryService;
    use crate::services::snapshot_store::SnapshotStore;
    use crate::services::upstream::testing::ScriptedFetcher;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};
    use tokio::time::timeout;

    fn raw_chain() -> serde_json::Value {
        json!({ "data": { "sltp": 18040.0, "oc": { "18000": { "ce": { "ltp": 150.0 }, "pe": { "ltp": 108.0 } } } } })
    }

    async fn query(fetcher: ScriptedFetcher) -> (TempDir, SharedQueryService) {
        let temp_dir = tempdir().unwrap();
        let db = SnapshotDatabase::new(temp_dir.path().join("stream.db")).await.unwrap();
        let service = QueryService::new(Arc::new(fetcher), SnapshotStore::new(&db), AnalyticsEngine::default())
            .with_cache_ttl(Duration::ZERO);
        (temp_dir, Arc::new(service))
    }

    fn params() -> LookupParams {
        serde_json::from_value(json!({ "sid": 13, "exp_sid": 1416076200 })).unwrap()
    }

    async fn spawn(
        registry: &SharedStreamRegistry,
        query: &SharedQueryService,
        client_id: &str,
        interval: Duration,
    ) -> (u64, mpsc::Receiver<StreamEvent>, tokio::task::JoinHandle<()>) {
        let (generation, stop) = registry.start(client_id).await;
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(run_stream(StreamTask {
            registry: registry.clone(),
            query: query.clone(),
            client_id: client_id.to_string(),
            generation,
            params: params(),
            interval,
            stop,
            events: tx,
        }));
        (generation, rx, handle)
    }

    #[test]
    fn test_event_wire_shape() {
        let status = StreamEvent::Status {
            status: StreamStatus::StreamingStarted,
            client_id: "abc".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({ "event": "status", "data": { "status": "streaming_started", "client_id": "abc" } })
        );

        let error = StreamEvent::LiveDataError { error: "boom".to_string() };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({ "event": "live_data_error", "data": { "error": "boom" } })
        );
    }

    #[tokio::test]
    async fn test_stop_removes_entry_and_ends_events() {
        let (_dir, query) = query(ScriptedFetcher::repeating(raw_chain())).await;
        let registry: SharedStreamRegistry = Arc::new(StreamRegistry::new());
        let interval = Duration::from_millis(50);

        let (_, mut rx, handle) = spawn(&registry, &query, "client-1", interval).await;

        let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(first, StreamEvent::LiveData(_)));
        assert!(registry.is_active("client-1").await);

        assert!(registry.stop("client-1").await);
        assert!(!registry.is_active("client-1").await);

        // Loop ends within one cadence and closes the channel
        timeout(interval * 2, handle).await.unwrap().unwrap();
        while let Ok(Some(event)) = timeout(Duration::from_millis(10), rx.recv()).await {
            // At most the event already in flight before the stop
            assert!(matches!(event, StreamEvent::LiveData(_)));
        }
        assert!(rx.recv().await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_cycle_emits_error_and_continues() {
        let fetcher = ScriptedFetcher::new(vec![Err(AppError::UpstreamUnavailable("timeout".into()))])
            .then_repeat(raw_chain());
        let (_dir, query) = query(fetcher).await;
        let registry: SharedStreamRegistry = Arc::new(StreamRegistry::new());

        let (_, mut rx, handle) = spawn(&registry, &query, "client-2", Duration::from_millis(10)).await;

        let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(first, StreamEvent::LiveDataError { .. }));
        let second = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(second, StreamEvent::LiveData(_)));

        registry.stop("client-2").await;
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_restart_replaces_previous_stream() {
        let (_dir, query) = query(ScriptedFetcher::repeating(raw_chain())).await;
        let registry: SharedStreamRegistry = Arc::new(StreamRegistry::new());
        let interval = Duration::from_millis(20);

        let (first_gen, _rx1, first) = spawn(&registry, &query, "client-3", interval).await;
        let (second_gen, mut rx2, second) = spawn(&registry, &query, "client-3", interval).await;
        assert_ne!(first_gen, second_gen);

        // The old loop stops, and its exit must not remove the new entry
        timeout(Duration::from_secs(1), first).await.unwrap().unwrap();
        assert!(registry.is_active("client-3").await);
        assert_eq!(registry.len().await, 1);

        timeout(Duration::from_secs(2), rx2.recv()).await.unwrap().unwrap();
        registry.stop("client-3").await;
        timeout(Duration::from_secs(1), second).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_closed_connection_cleans_up() {
        let (_dir, query) = query(ScriptedFetcher::repeating(raw_chain())).await;
        let registry: SharedStreamRegistry = Arc::new(StreamRegistry::new());

        let (_, rx, handle) = spawn(&registry, &query, "client-4", Duration::from_millis(10)).await;
        drop(rx);

        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(!registry.is_active("client-4").await);
    }
}
