//! HTTP handlers.

pub mod candidates;
pub mod confirmations;
pub mod merge;
pub mod requests;

use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use service_core::error::AppError;

use crate::dtos::HealthResponse;
use crate::services::metrics::get_metrics;
use crate::AppState;

/// Liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "payout-service".to_string(),
        timestamp: Utc::now(),
    })
}

/// Readiness probe: checks the database connection.
pub async fn ready(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    if let Err(e) = state.db.health_check().await {
        tracing::error!("Readiness check failed: {}", e);
        return Err(AppError::ServiceUnavailable);
    }

    Ok(Json(HealthResponse {
        status: "ready".to_string(),
        service: "payout-service".to_string(),
        timestamp: Utc::now(),
    }))
}

/// Prometheus metrics endpoint.
pub async fn metrics() -> (StatusCode, String) {
    (StatusCode::OK, get_metrics())
}
