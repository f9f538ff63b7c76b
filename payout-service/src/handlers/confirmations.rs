//! Confirmation batch handlers: create, inspect, revert, remittance views
//! and the payout CSV export.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{
    ConfirmationResponse, RemittanceGroupsResponse, RevertConfirmationResponse,
    UpdateRemittanceSettingsRequest,
};
use crate::middleware::ActorContext;
use crate::models::PaymentConfirmation;
use crate::services::export::payout_csv;
use crate::services::metrics::{record_error, CONFIRMATIONS_TOTAL, CONFIRMED_AMOUNT_TOTAL};
use crate::AppState;

/// Confirm every approved request as one batch.
pub async fn create_confirmation(
    State(state): State<AppState>,
    actor: ActorContext,
) -> Result<(StatusCode, Json<ConfirmationResponse>), AppError> {
    let (confirmation, items) = state
        .db
        .confirm_approved(actor.audit_name())
        .await
        .inspect_err(|_| record_error("confirmation_error"))?;

    CONFIRMATIONS_TOTAL.with_label_values(&["create"]).inc();
    CONFIRMED_AMOUNT_TOTAL
        .with_label_values(&["create"])
        .inc_by(confirmation.total_amount as f64);

    Ok((
        StatusCode::CREATED,
        Json(ConfirmationResponse {
            confirmation,
            items,
        }),
    ))
}

/// List confirmation batches, newest first.
pub async fn list_confirmations(
    State(state): State<AppState>,
) -> Result<Json<Vec<PaymentConfirmation>>, AppError> {
    let confirmations = state.db.list_confirmations().await?;
    Ok(Json(confirmations))
}

/// Get one confirmation with its snapshot items.
pub async fn get_confirmation(
    State(state): State<AppState>,
    Path(confirmation_id): Path<Uuid>,
) -> Result<Json<ConfirmationResponse>, AppError> {
    let (confirmation, items) = state
        .db
        .get_confirmation(confirmation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Confirmation not found")))?;

    Ok(Json(ConfirmationResponse {
        confirmation,
        items,
    }))
}

/// Revert a confirmed batch, restoring its requests to pending.
pub async fn revert_confirmation(
    State(state): State<AppState>,
    Path(confirmation_id): Path<Uuid>,
) -> Result<Json<RevertConfirmationResponse>, AppError> {
    let restored_request_ids = state
        .db
        .revert_confirmation(confirmation_id)
        .await
        .inspect_err(|_| record_error("confirmation_error"))?;

    CONFIRMATIONS_TOTAL.with_label_values(&["revert"]).inc();

    Ok(Json(RevertConfirmationResponse {
        confirmation_id,
        restored_request_ids,
    }))
}

/// Update the payout toggles for one remittance name on a confirmation.
pub async fn update_remittance_settings(
    State(state): State<AppState>,
    Path(confirmation_id): Path<Uuid>,
    Json(payload): Json<UpdateRemittanceSettingsRequest>,
) -> Result<Json<PaymentConfirmation>, AppError> {
    payload.validate()?;

    let confirmation = state
        .db
        .update_remittance_settings(confirmation_id, &payload.remittance_name, payload.settings())
        .await?;

    Ok(Json(confirmation))
}

/// View a confirmation's items grouped by payee, with netting applied.
pub async fn remittance_groups(
    State(state): State<AppState>,
    Path(confirmation_id): Path<Uuid>,
) -> Result<Json<RemittanceGroupsResponse>, AppError> {
    let (confirmation, groups) = state
        .db
        .remittance_groups(confirmation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Confirmation not found")))?;

    Ok(Json(RemittanceGroupsResponse {
        confirmation_id: confirmation.confirmation_id,
        confirmation_date: confirmation.confirmation_date,
        groups,
    }))
}

/// Download the payout CSV for a confirmation.
pub async fn export_csv(
    State(state): State<AppState>,
    Path(confirmation_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (confirmation, groups) = state
        .db
        .remittance_groups(confirmation_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Confirmation not found")))?;

    let csv = payout_csv(confirmation.confirmation_date, &groups);
    let filename = format!(
        "payout_{}.csv",
        confirmation.confirmation_date.format("%Y%m%d")
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        csv,
    ))
}
