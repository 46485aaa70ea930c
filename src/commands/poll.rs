use crate::cli::UpstreamArgs;
use crate::commands::open_database;
use crate::models::PollConfig;
use crate::services::{new_shared_health_stats, MarketDataFetcher, SnapshotStore};
use crate::worker;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

pub async fn run(db_path: PathBuf, configs: Vec<PollConfig>, upstream: UpstreamArgs) {
    if configs.is_empty() {
        eprintln!("❌ Nothing to poll: pass --track symbol:segment:expiry (or set TRACK)");
        std::process::exit(2);
    }

    let fetcher: Arc<dyn MarketDataFetcher> = match upstream.fetcher() {
        Ok(fetcher) => Arc::new(fetcher),
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(2);
        }
    };

    let db = open_database(db_path).await;
    let store = SnapshotStore::new(&db);
    let health_stats = new_shared_health_stats();

    println!("⚡ Polling {} contract(s), Ctrl+C to stop:", configs.len());
    for config in &configs {
        println!(
            "   🔹 {} every {}s (pause {})",
            config.contract,
            config.interval.as_secs(),
            config.maintenance_window
        );
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = worker::spawn_snapshot_workers(
        &tokio::runtime::Handle::current(),
        configs,
        fetcher,
        store,
        health_stats.clone(),
        shutdown_rx,
    );

    tokio::signal::ctrl_c().await.ok();
    info!("Shutdown signal received, stopping pollers");
    let _ = shutdown_tx.send(true);
    futures::future::join_all(handles).await;

    println!("\n📊 Summary:");
    for (contract, stats) in &health_stats.read().await.workers {
        println!(
            "   {}: {} persisted, {} failed",
            contract, stats.successful_cycles, stats.failed_cycles
        );
    }

    db.close().await;
}
