use crate::cli::UpstreamArgs;
use crate::commands::open_database;
use crate::server::{self, AppState, ServerConfig};
use crate::services::{
    new_shared_health_stats, AnalyticsEngine, MaintenanceWindow, MarketDataFetcher, QueryService, SnapshotStore,
    StreamRegistry,
};
use crate::{utils, worker};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info};

pub async fn run(db_path: PathBuf, config: ServerConfig, window: MaintenanceWindow, upstream: UpstreamArgs) {
    println!("🚀 Starting optionpulse server on port {}", config.port);

    let fetcher: Arc<dyn MarketDataFetcher> = match upstream.fetcher() {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(2);
        }
    };

    let db = open_database(db_path).await;
    let store = SnapshotStore::new(&db);

    // Samples written by an interrupted run may be missing from dateList
    match store.rebuild_date_lists().await {
        Ok(report) if report.days_added > 0 => {
            println!("🔧 Repaired {} missing dateList day(s)", report.days_added);
        }
        Ok(_) => {}
        Err(e) => eprintln!("⚠️  Warning: dateList check failed: {}", e),
    }

    let health_stats = new_shared_health_stats();
    health_stats.write().await.maintenance_window = window.to_string();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Pollers run on a dedicated runtime, HTTP on the main one
    let worker_thread = if config.pollers.is_empty() {
        println!("ℹ️  No tracked contracts, serving lookups only");
        None
    } else {
        let worker_threads = utils::get_worker_threads();
        println!(
            "⚙️  Creating dedicated worker runtime ({} threads) for {} contract(s)...",
            worker_threads,
            config.pollers.len()
        );

        let pollers = config.pollers.clone();
        let fetcher = fetcher.clone();
        let store = store.clone();
        let health_stats = health_stats.clone();

        Some(std::thread::spawn(move || {
            let worker_runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(worker_threads)
                .thread_name("worker-pool")
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(error = %e, "Failed to create worker runtime");
                    return;
                }
            };

            worker_runtime.block_on(async {
                let handles = worker::spawn_snapshot_workers(
                    &tokio::runtime::Handle::current(),
                    pollers,
                    fetcher,
                    store,
                    health_stats,
                    shutdown_rx,
                );
                futures::future::join_all(handles).await;
            });
        }))
    };

    info!(expiry_epoch_offset = config.expiry_epoch_offset, "Analytics engine configured");
    let query = QueryService::new(fetcher, store, AnalyticsEngine::new(config.expiry_epoch_offset))
        .with_cache_ttl(config.cache_ttl)
        .with_default_segment(config.default_segment);

    let app_state = AppState {
        query: Arc::new(query),
        registry: Arc::new(StreamRegistry::new()),
        health_stats,
        maintenance_window: window,
        stream_interval: config.stream_interval,
        started_at: Instant::now(),
    };

    let shutdown = async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    };

    println!("🌐 Starting HTTP server...");
    if let Err(e) = server::serve(app_state, config.port, shutdown).await {
        eprintln!("❌ Server error: {}", e);
        std::process::exit(1);
    }

    if let Some(handle) = worker_thread {
        let _ = tokio::task::spawn_blocking(move || handle.join()).await;
    }
    db.close().await;
    println!("👋 Stopped");
}
