//! Report API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<ApiState>`.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::engine::Orchestrator;
use crate::types::{PassSummary, Period, Report, ReportError};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

impl ApiState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct LatestResponse {
    pub period: Period,
    /// False when the current period has no reports yet and `reports`
    /// holds each region's most recent report instead.
    pub current: bool,
    pub reports: Vec<Report>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodResponse {
    pub period: Period,
    pub reports: Vec<Report>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegionHistoryResponse {
    pub region: String,
    pub city: Option<String>,
    pub reports: Vec<Report>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Handler error. Internal details are logged, never returned.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(ReportError),
}

impl From<ReportError> for ApiError {
    fn from(e: ReportError) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(e) => {
                error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to process request".to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/reports/latest
pub async fn get_latest(State(state): State<AppState>) -> Result<Json<LatestResponse>, ApiError> {
    let period = state.orchestrator.current_period();
    let store = state.orchestrator.store();

    let reports = store.find_by_period(period.start).await?;
    if !reports.is_empty() {
        return Ok(Json(LatestResponse { period, current: true, reports }));
    }

    let reports = store.find_latest_per_region().await?;
    Ok(Json(LatestResponse { period, current: false, reports }))
}

/// GET /api/reports/period/:date
pub async fn get_by_period(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<PeriodResponse>, ApiError> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date {date:?}, expected YYYY-MM-DD")))?;

    let period = Period::containing(date, state.orchestrator.anchor());
    let reports = state.orchestrator.store().find_by_period(period.start).await?;
    Ok(Json(PeriodResponse { period, reports }))
}

/// GET /api/reports/region/:region
pub async fn get_region_history(
    State(state): State<AppState>,
    Path(region): Path<String>,
) -> Result<Json<RegionHistoryResponse>, ApiError> {
    let reports = state.orchestrator.store().find_history(&region).await?;
    let city = state.orchestrator.registry().city_for(&region).map(str::to_string);
    Ok(Json(RegionHistoryResponse { region, city, reports }))
}

/// POST /api/reports/generate
pub async fn generate(State(state): State<AppState>) -> Result<Json<PassSummary>, ApiError> {
    info!("Manual report pass requested");
    let summary = state.orchestrator.run_pass().await?;
    Ok(Json(summary))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
