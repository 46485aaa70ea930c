use crate::error::AppError;
use crate::models::{DayReadout, Expiry, SideMetrics};
use crate::server::AppState;
use crate::services::{
    HealthStats, LiveChain, LookupParams, SharedHealthStats, SharedQueryService, StrikeHistory,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, instrument, warn};

/// `AppError` rendered as `{"error": ...}` with its HTTP status
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self.0, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self.0, "Request rejected");
        }

        let body = match &self.0 {
            AppError::NotFound { message, available_days } if !available_days.is_empty() => {
                json!({ "error": message, "available_days": available_days })
            }
            AppError::NotFound { message, .. } => json!({ "error": message }),
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
pub struct ExpiryDatesResponse {
    pub symbol: String,
    pub expiries: Vec<Expiry>,
}

#[derive(Debug, Serialize)]
pub struct PercentageResponse {
    pub percentage: f64,
}

#[derive(Debug, Serialize)]
pub struct PercentageMetricsResponse {
    pub metrics: SideMetrics,
}

#[derive(Debug, Serialize)]
pub struct IvResponse {
    pub iv: f64,
}

#[derive(Debug, Serialize)]
pub struct DeltaResponse {
    pub delta: crate::services::DeltaAnswer,
}

#[derive(Debug, Serialize)]
pub struct FutureResponse {
    pub future: f64,
    pub atm_strike: f64,
    pub spot: f64,
}

/// GET /health - Scheduler and stream statistics
#[instrument(skip(health_state, app_state))]
pub async fn health_handler(
    State(health_state): State<SharedHealthStats>,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    // Short timeout so a busy writer never stalls the health check
    let health_snapshot = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        health_state.read(),
    )
    .await;

    let mut health_stats = match health_snapshot {
        Ok(health) => health.clone(),
        Err(_) => {
            warn!("Health stats lock timeout, using defaults");
            HealthStats::default()
        }
    };

    let now = Utc::now();
    health_stats.in_maintenance_window = app_state.maintenance_window.contains(now);
    health_stats.maintenance_window = app_state.maintenance_window.to_string();
    health_stats.active_streams = app_state.registry.len().await;
    health_stats.uptime_secs = app_state.started_at.elapsed().as_secs();
    health_stats.current_system_time = now.to_rfc3339();

    (StatusCode::OK, Json(health_stats)).into_response()
}

/// GET /api/exp-date?symbol|sid[&seg]
pub async fn exp_date_handler(
    State(query): State<SharedQueryService>,
    Query(params): Query<LookupParams>,
) -> ApiResult<ExpiryDatesResponse> {
    let expiries = query.expiry_dates(&params).await?;
    if expiries.is_empty() {
        return Err(AppError::not_found("No expiry dates found").into());
    }

    Ok(Json(ExpiryDatesResponse {
        symbol: params.symbol.unwrap_or_default(),
        expiries,
    }))
}

/// GET /api/option-chain?symbol|sid&expiry|exp[&seg]
pub async fn option_chain_handler(
    State(query): State<SharedQueryService>,
    Query(params): Query<LookupParams>,
) -> ApiResult<LiveChain> {
    Ok(Json(query.live_chain(&params).await?))
}

/// GET /api/percentage?symbol&expiry&strike&type[&metric]
pub async fn percentage_handler(
    State(query): State<SharedQueryService>,
    Query(params): Query<LookupParams>,
) -> ApiResult<PercentageResponse> {
    let percentage = query.percentage(&params).await?;
    Ok(Json(PercentageResponse { percentage }))
}

/// GET /api/percentage/all?symbol&expiry&strike&type
pub async fn percentage_metrics_handler(
    State(query): State<SharedQueryService>,
    Query(params): Query<LookupParams>,
) -> ApiResult<PercentageMetricsResponse> {
    let metrics = query.percentage_metrics(&params).await?;
    Ok(Json(PercentageMetricsResponse { metrics }))
}

/// GET /api/iv?symbol&expiry&strike&type
pub async fn iv_handler(
    State(query): State<SharedQueryService>,
    Query(params): Query<LookupParams>,
) -> ApiResult<IvResponse> {
    let iv = query.iv(&params).await?;
    Ok(Json(IvResponse { iv }))
}

/// GET /api/delta?symbol&expiry&strike[&type]
pub async fn delta_handler(
    State(query): State<SharedQueryService>,
    Query(params): Query<LookupParams>,
) -> ApiResult<DeltaResponse> {
    let delta = query.delta(&params).await?;
    Ok(Json(DeltaResponse { delta }))
}

/// GET /api/future?symbol&expiry
pub async fn future_handler(
    State(query): State<SharedQueryService>,
    Query(params): Query<LookupParams>,
) -> ApiResult<FutureResponse> {
    let quote = query.future(&params).await?;
    Ok(Json(FutureResponse {
        future: quote.future,
        atm_strike: quote.atm_strike,
        spot: quote.spot,
    }))
}

/// GET /api/history?expiry&date
pub async fn history_handler(
    State(query): State<SharedQueryService>,
    Query(params): Query<LookupParams>,
) -> ApiResult<DayReadout> {
    Ok(Json(query.history(&params).await?))
}

/// GET /api/history/strike?expiry&date&strike&type
pub async fn strike_history_handler(
    State(query): State<SharedQueryService>,
    Query(params): Query<LookupParams>,
) -> ApiResult<StrikeHistory> {
    Ok(Json(query.strike_history(&params).await?))
}
