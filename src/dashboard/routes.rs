//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is the shared coordinator.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::engine::coordinator::{Coordinator, CoordinatorStatus};
use crate::types::{AegisError, BreakerState, LedgerEntry};

pub type AppState = Arc<Coordinator>;

const DEFAULT_DECISION_LIMIT: u32 = 50;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DecisionsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EmergencyStopRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerResponse {
    pub circuit_breaker: BreakerState,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Maps engine errors onto HTTP statuses.
pub struct ApiError(AegisError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AegisError::NotHalted(_) => StatusCode::CONFLICT,
            AegisError::ResetRejected { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

impl From<AegisError> for ApiError {
    fn from(e: AegisError) -> Self {
        ApiError(e)
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

/// GET /api/status
pub async fn get_status(State(coordinator): State<AppState>) -> Json<CoordinatorStatus> {
    Json(coordinator.get_status().await)
}

/// GET /api/decisions?limit=N
pub async fn get_decisions(
    State(coordinator): State<AppState>,
    Query(query): Query<DecisionsQuery>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_DECISION_LIMIT);
    Ok(Json(coordinator.get_recent_entries(limit).await?))
}

/// POST /api/emergency-stop
pub async fn emergency_stop(
    State(coordinator): State<AppState>,
    body: Option<Json<EmergencyStopRequest>>,
) -> Json<BreakerResponse> {
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "operator request".to_string());
    warn!(reason = %reason, "Emergency stop requested via dashboard");
    Json(BreakerResponse {
        circuit_breaker: coordinator.trigger_emergency_stop(&reason),
    })
}

/// POST /api/reset
pub async fn reset(State(coordinator): State<AppState>) -> Result<Json<BreakerResponse>, ApiError> {
    let state = coordinator.reset_after_halt().await?;
    Ok(Json(BreakerResponse {
        circuit_breaker: state,
    }))
}
