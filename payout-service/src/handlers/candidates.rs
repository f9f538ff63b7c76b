//! Candidate item discovery.

use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::models::CandidateItem;
use crate::AppState;

/// List every quotation item eligible for a payment request: fresh items from
/// signed or completed quotations, plus draft and rejected requests, with
/// merge groups projected for display.
pub async fn list_candidates(
    State(state): State<AppState>,
) -> Result<Json<Vec<CandidateItem>>, AppError> {
    let candidates = state.db.list_candidates().await?;
    Ok(Json(candidates))
}
