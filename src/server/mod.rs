pub mod api;
pub mod ws;

use crate::constants::{
    DEFAULT_PORT, DEFAULT_SEGMENT, LIVE_CACHE_TTL_MS, STREAM_INTERVAL_SECS, UPSTREAM_EXPIRY_EPOCH_OFFSET_SECS,
};
use crate::models::PollConfig;
use crate::services::{
    MaintenanceWindow, SharedHealthStats, SharedQueryService, SharedStreamRegistry,
};
use axum::{extract::FromRef, routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tower_http::cors::{Any, CorsLayer};

/// Settings for the `serve` command
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub default_segment: u32,
    pub stream_interval: Duration,
    pub cache_ttl: Duration,
    /// Seconds added to an upstream expiry id to get Unix seconds
    pub expiry_epoch_offset: i64,
    /// Contracts polled in the background while serving
    pub pollers: Vec<PollConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            default_segment: DEFAULT_SEGMENT,
            stream_interval: Duration::from_secs(STREAM_INTERVAL_SECS),
            cache_ttl: Duration::from_millis(LIVE_CACHE_TTL_MS),
            expiry_epoch_offset: UPSTREAM_EXPIRY_EPOCH_OFFSET_SECS,
            pollers: Vec::new(),
        }
    }
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub query: SharedQueryService,
    pub registry: SharedStreamRegistry,
    pub health_stats: SharedHealthStats,
    pub maintenance_window: MaintenanceWindow,
    pub stream_interval: Duration,
    pub started_at: Instant,
}

// FromRef implementations to extract specific state components
impl FromRef<AppState> for SharedQueryService {
    fn from_ref(app_state: &AppState) -> SharedQueryService {
        app_state.query.clone()
    }
}

impl FromRef<AppState> for SharedHealthStats {
    fn from_ref(app_state: &AppState) -> SharedHealthStats {
        app_state.health_stats.clone()
    }
}

impl FromRef<AppState> for SharedStreamRegistry {
    fn from_ref(app_state: &AppState) -> SharedStreamRegistry {
        app_state.registry.clone()
    }
}

pub fn router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(api::health_handler))
        .route("/api/exp-date", get(api::exp_date_handler))
        .route("/api/option-chain", get(api::option_chain_handler))
        .route("/api/percentage", get(api::percentage_handler))
        .route("/api/percentage/all", get(api::percentage_metrics_handler))
        .route("/api/iv", get(api::iv_handler))
        .route("/api/delta", get(api::delta_handler))
        .route("/api/future", get(api::future_handler))
        .route("/api/history", get(api::history_handler))
        .route("/api/history/strike", get(api::strike_history_handler))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(app_state)
}

/// Start the axum server and run until `shutdown` resolves
pub async fn serve<F>(app_state: AppState, port: u16, shutdown: F) -> crate::error::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!("Registering routes:");
    tracing::info!("  GET /health");
    tracing::info!("  GET /api/exp-date?sid=13");
    tracing::info!("  GET /api/option-chain?sid=13&exp=1416076200");
    tracing::info!("  GET /api/{{percentage,iv,delta}}?sid=13&exp=1416076200&strike=18000&type=CE");
    tracing::info!("  GET /api/percentage/all?sid=13&exp=1416076200&strike=18000&type=CE");
    tracing::info!("  GET /api/future?sid=13&exp=1416076200");
    tracing::info!("  GET /api/history?expiry=1416076200&date=2024-11-08");
    tracing::info!("  GET /api/history/strike?expiry=1416076200&date=2024-11-08&strike=18000&type=PE");
    tracing::info!("  GET /ws (start_streaming / stop_streaming)");

    let app = router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
